use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use image::DynamicImage;
use image::imageops::FilterType;
use log::debug;
use ndarray::prelude::*;
use ort::session::Session;
use ort::value::Tensor;
use serde::Serialize;

use crate::config::DetectorOptions;
use crate::errors::{Error, Result};
use crate::utils::build_session;

/// 检测模型的类别表，下标即模型输出的类别 ID
///
/// 多数类别是逗号连接的多词标签，匹配时会拆分为独立词元
pub const CATEGORIES: [&str; 46] = [
    "shirt, blouse",
    "top, t-shirt, sweatshirt",
    "sweater",
    "cardigan",
    "jacket",
    "vest",
    "pants",
    "shorts",
    "skirt",
    "coat",
    "dress",
    "jumpsuit",
    "cape",
    "glasses",
    "hat",
    "headband, head covering, hair accessory",
    "tie",
    "glove",
    "watch",
    "belt",
    "leg warmer",
    "tights, stockings",
    "sock",
    "shoe",
    "bag, wallet",
    "scarf",
    "umbrella",
    "hood",
    "collar",
    "lapel",
    "epaulette",
    "sleeve",
    "pocket",
    "neckline",
    "buckle",
    "zipper",
    "applique",
    "bead",
    "bow",
    "flower",
    "fringe",
    "ribbon",
    "rivet",
    "ruffle",
    "sequin",
    "tassel",
];

/// 图片预处理的均值和标准差（ImageNet 常数）
const PIXEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const PIXEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 检测框，原点在图片左上角，单位为像素
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x: x.max(0.), y: y.max(0.), w: w.max(0.), h: h.max(0.) }
    }

    /// 以 (x1, y1, x2, y2) 形式返回对角坐标
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        (self.x, self.y, self.x + self.w, self.y + self.h)
    }
}

/// 单条检测结果
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    /// 模型输出的原始类别标签
    pub category: String,
    /// 规范化后的标签词元集合
    pub tokens: HashSet<String>,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    pub fn new(category: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        let category = category.into();
        let tokens = normalize_label(&category);
        Self { category, tokens, confidence, bbox }
    }
}

/// 将逗号连接的原始标签拆分为规范化词元集合
///
/// 匹配一律基于集合交集而非子串，避免 "sleeve" 误命中 "sleeveless" 之类的情况
pub fn normalize_label(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 服装定位检测器
pub trait GarmentDetect: Send + Sync {
    /// 对一张图片运行检测，返回置信度超过阈值的检测框
    ///
    /// 没有检测到任何目标时返回空列表，这是合法结果；
    /// 整图兜底与否由调用方决定，不属于检测器的职责
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>>;
}

/// 基于 ONNX 会话的服装检测器
///
/// 模型为 DETR 风格的 query-box 头：输出 logits (1, Q, C+1) 和归一化的
/// cxcywh 框 (1, Q, 4)，最后一个类别是 no-object
pub struct GarmentDetector {
    session: Mutex<Session>,
    threshold: f32,
    size: u32,
    max_size: u32,
}

impl GarmentDetector {
    pub fn load(model: &Path, opts: &DetectorOptions) -> Result<Self> {
        let session = build_session(model, opts.det_threads)
            .map_err(|e| Error::ResourceLoad(format!("检测模型 {}: {e}", model.display())))?;
        Ok(Self {
            session: Mutex::new(session),
            threshold: opts.det_threshold,
            size: opts.det_size,
            max_size: opts.det_max_size,
        })
    }

    /// 短边缩放到目标尺寸，长边超出上限时按长边缩放
    fn input_size(&self, width: u32, height: u32) -> (u32, u32) {
        let (min, max) = (width.min(height) as f32, width.max(height) as f32);
        let mut scale = self.size as f32 / min;
        if scale * max > self.max_size as f32 {
            scale = self.max_size as f32 / max;
        }
        let w = ((width as f32 * scale).round() as u32).max(1);
        let h = ((height as f32 * scale).round() as u32).max(1);
        (w, h)
    }

    fn preprocess(&self, image: &DynamicImage) -> Array4<f32> {
        let (w, h) = self.input_size(image.width(), image.height());
        let resized = image.resize_exact(w, h, FilterType::Triangle).to_rgb8();

        let mut pixels = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
        for (x, y, p) in resized.enumerate_pixels() {
            for c in 0..3 {
                pixels[[0, c, y as usize, x as usize]] =
                    (p[c] as f32 / 255. - PIXEL_MEAN[c]) / PIXEL_STD[c];
            }
        }
        pixels
    }
}

impl GarmentDetect for GarmentDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let pixels = self.preprocess(image);

        let mut session = self.session.lock().expect("检测会话锁失败");
        let input_name = session.inputs[0].name.clone();
        let logits_name = session.outputs[0].name.clone();
        let boxes_name = session
            .outputs
            .get(1)
            .map(|o| o.name.clone())
            .ok_or_else(|| Error::Detection("模型缺少检测框输出".to_string()))?;

        let tensor =
            Tensor::from_array(pixels).map_err(|e| Error::Detection(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![input_name => tensor])
            .map_err(|e| Error::Detection(e.to_string()))?;

        let (shape, logits) = outputs
            .get(logits_name.as_str())
            .ok_or_else(|| Error::Detection(format!("模型缺少输出 {logits_name}")))?
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Detection(e.to_string()))?;
        let (nq, nc) = (shape[1] as usize, shape[2] as usize);
        let logits = ArrayView2::from_shape((nq, nc), logits)
            .map_err(|e| Error::Detection(e.to_string()))?;

        let (shape, boxes) = outputs
            .get(boxes_name.as_str())
            .ok_or_else(|| Error::Detection(format!("模型缺少输出 {boxes_name}")))?
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Detection(e.to_string()))?;
        let boxes = ArrayView2::from_shape((shape[1] as usize, 4), boxes)
            .map_err(|e| Error::Detection(e.to_string()))?;

        let detections = post_process(
            logits,
            boxes,
            (image.width(), image.height()),
            self.threshold,
        );
        debug!("detected {} boxes (threshold {})", detections.len(), self.threshold);
        Ok(detections)
    }
}

/// 解析模型输出为检测结果
///
/// # Arguments
///
/// * `logits` - 类别打分，大小为 (Q, C+1)，最后一类为 no-object
/// * `boxes` - 归一化 cxcywh 框，大小为 (Q, 4)
/// * `orig_size` - 原图 (宽, 高)，框坐标按此还原为像素
/// * `threshold` - 置信度阈值
pub fn post_process(
    logits: ArrayView2<f32>,
    boxes: ArrayView2<f32>,
    orig_size: (u32, u32),
    threshold: f32,
) -> Vec<Detection> {
    let (width, height) = (orig_size.0 as f32, orig_size.1 as f32);
    let nc = logits.ncols();
    let mut detections = vec![];

    for (row, bbox) in logits.rows().into_iter().zip(boxes.rows()) {
        let probs = softmax(row);
        // 最后一个类别是 no-object，不参与取最大
        let (best, score) = probs[..nc - 1]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .expect("类别数不能为零");
        if *score < threshold {
            continue;
        }

        let (cx, cy, w, h) = (bbox[0], bbox[1], bbox[2], bbox[3]);
        let x1 = ((cx - w / 2.) * width).clamp(0., width);
        let y1 = ((cy - h / 2.) * height).clamp(0., height);
        let x2 = ((cx + w / 2.) * width).clamp(0., width);
        let y2 = ((cy + h / 2.) * height).clamp(0., height);

        let category = match CATEGORIES.get(best) {
            Some(name) => name.to_string(),
            None => format!("label_{best}"),
        };
        detections.push(Detection::new(
            category,
            *score,
            BBox::new(x1, y1, x2 - x1, y2 - y1),
        ));
    }

    detections
}

fn softmax(row: ArrayView1<f32>) -> Vec<f32> {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = row.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|x| x / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_label_splits_and_lowercases() {
        let tokens = normalize_label("Top, T-Shirt, Sweatshirt");
        assert_eq!(tokens.len(), 3);
        assert!(tokens.contains("top"));
        assert!(tokens.contains("t-shirt"));
        assert!(tokens.contains("sweatshirt"));
    }

    #[test]
    fn normalize_label_drops_empty_tokens() {
        let tokens = normalize_label(" shirt ,, ");
        assert_eq!(tokens.len(), 1);
        assert!(tokens.contains("shirt"));
    }

    #[test]
    fn bbox_is_clamped_non_negative() {
        let b = BBox::new(-3., -1., 10., 10.);
        assert_eq!((b.x, b.y), (0., 0.));
        assert_eq!(b.corners(), (0., 0., 10., 10.));
    }

    #[test]
    fn post_process_applies_threshold_and_no_object() {
        // 两个 query、两个真实类别 + no-object
        // 第一行：类别 0 高分；第二行：no-object 高分，应被丢弃
        let logits =
            ndarray::arr2(&[[8.0f32, 0.0, 0.0], [0.0, 0.0, 8.0]]);
        let boxes =
            ndarray::arr2(&[[0.5f32, 0.5, 0.5, 0.5], [0.25, 0.25, 0.1, 0.1]]);

        let dets = post_process(logits.view(), boxes.view(), (100, 200), 0.3);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].category, CATEGORIES[0]);
        assert!(dets[0].confidence > 0.9);

        // cxcywh (0.5, 0.5, 0.5, 0.5) 在 100x200 上应还原为 (25, 50, 50, 100)
        let b = dets[0].bbox;
        assert_eq!((b.x, b.y, b.w, b.h), (25., 50., 50., 100.));
    }

    #[test]
    fn post_process_empty_when_nothing_confident() {
        let logits = ndarray::arr2(&[[0.0f32, 0.0, 8.0]]);
        let boxes = ndarray::arr2(&[[0.5f32, 0.5, 0.2, 0.2]]);
        let dets = post_process(logits.view(), boxes.view(), (64, 64), 0.3);
        assert!(dets.is_empty());
    }
}
