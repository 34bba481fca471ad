use std::path::Path;
use std::sync::Mutex;

use image::DynamicImage;
use image::imageops::FilterType;
use log::{debug, info};
use ndarray::prelude::*;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{
    PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationDirection,
    TruncationParams, TruncationStrategy,
};

use crate::config::ClipOptions;
use crate::embedding::{EMBEDDING_DIM, Embedding};
use crate::errors::{Error, Result};
use crate::utils::build_session;

/// 视觉编码器的输入分辨率
pub const CLIP_INPUT_SIZE: u32 = 224;

/// 文本编码器的上下文长度
const CONTEXT_LENGTH: usize = 77;

/// CLIP 预处理像素均值和标准差
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// 图文双塔编码器
///
/// 两个编码器映射到同一个嵌入空间，输出可以直接比较和融合。
/// 对固定权重输出是确定的；设备差异只允许引入浮点容差内的偏差。
pub trait GarmentEncode: Send + Sync {
    /// 嵌入维数
    fn dim(&self) -> usize;

    /// 批量编码图片
    fn encode_images(&self, images: &[DynamicImage]) -> Result<Vec<Embedding>>;

    /// 批量编码文本
    fn encode_texts(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// 基于 ONNX 双会话的 CLIP 编码器
///
/// 单个推理设备天然串行，两个会话各自用互斥锁保护；
/// 调用方应当攒批调用而不是并发发起大量单条请求。
pub struct FashionClip {
    vision: Mutex<Session>,
    text: Mutex<Session>,
    tokenizer: Tokenizer,
    batch_size: usize,
}

impl FashionClip {
    /// 加载视觉、文本两个 ONNX 模型和配套的 BPE 词表
    pub fn load(
        vision_model: &Path,
        text_model: &Path,
        tokenizer_file: &Path,
        opts: &ClipOptions,
    ) -> Result<Self> {
        let vision = build_session(vision_model, opts.clip_threads)
            .map_err(|e| Error::ResourceLoad(format!("视觉模型 {}: {e}", vision_model.display())))?;
        let text = build_session(text_model, opts.clip_threads)
            .map_err(|e| Error::ResourceLoad(format!("文本模型 {}: {e}", text_model.display())))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(|e| Error::ResourceLoad(format!("词表 {}: {e}", tokenizer_file.display())))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(CONTEXT_LENGTH),
            direction: PaddingDirection::Right,
            pad_to_multiple_of: None,
            pad_id: 49407,
            pad_type_id: 0,
            pad_token: "<|endoftext|>".to_string(),
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: CONTEXT_LENGTH,
                strategy: TruncationStrategy::LongestFirst,
                stride: 0,
                direction: TruncationDirection::Right,
            }))
            .map_err(|e| Error::ResourceLoad(format!("词表截断配置: {e}")))?;

        info!("CLIP 编码器加载完成");
        Ok(Self {
            vision: Mutex::new(vision),
            text: Mutex::new(text),
            tokenizer,
            batch_size: opts.clip_batch_size.max(1),
        })
    }

    fn encode_image_chunk(&self, chunk: &[DynamicImage]) -> Result<Vec<Embedding>> {
        let pixels = image_tensor(chunk);

        let mut session = self.vision.lock().expect("视觉会话锁失败");
        let input_name = session.inputs[0].name.clone();
        let output_name = session.outputs[0].name.clone();

        let tensor = Tensor::from_array(pixels).map_err(|e| Error::Encode(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![input_name => tensor])
            .map_err(|e| Error::Encode(e.to_string()))?;

        extract_rows(&outputs, &output_name, chunk.len())
    }

    fn encode_text_chunk(&self, chunk: &[String]) -> Result<Vec<Embedding>> {
        let encodings = self
            .tokenizer
            .encode_batch(chunk.to_vec(), true)
            .map_err(|e| Error::Encode(format!("分词失败: {e}")))?;

        let mut input_ids = Array2::<i64>::zeros((chunk.len(), CONTEXT_LENGTH));
        let mut attention_mask = Array2::<i64>::zeros((chunk.len(), CONTEXT_LENGTH));
        for (i, enc) in encodings.iter().enumerate() {
            for (j, (id, mask)) in enc
                .get_ids()
                .iter()
                .zip(enc.get_attention_mask())
                .take(CONTEXT_LENGTH)
                .enumerate()
            {
                input_ids[[i, j]] = *id as i64;
                attention_mask[[i, j]] = *mask as i64;
            }
        }

        let mut session = self.text.lock().expect("文本会话锁失败");
        let input_names: Vec<String> =
            session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_name = session.outputs[0].name.clone();

        let ids = Tensor::from_array(input_ids).map_err(|e| Error::Encode(e.to_string()))?;
        let mask =
            Tensor::from_array(attention_mask).map_err(|e| Error::Encode(e.to_string()))?;

        // 部分导出只保留 input_ids 一个输入
        let outputs = if input_names.len() >= 2 {
            session.run(ort::inputs![
                input_names[0].clone() => ids,
                input_names[1].clone() => mask,
            ])
        } else {
            session.run(ort::inputs![input_names[0].clone() => ids])
        }
        .map_err(|e| Error::Encode(e.to_string()))?;

        extract_rows(&outputs, &output_name, chunk.len())
    }
}

impl GarmentEncode for FashionClip {
    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    fn encode_images(&self, images: &[DynamicImage]) -> Result<Vec<Embedding>> {
        let mut result = Vec::with_capacity(images.len());
        for chunk in images.chunks(self.batch_size) {
            result.extend(self.encode_image_chunk(chunk)?);
        }
        debug!("encoded {} images", images.len());
        Ok(result)
    }

    fn encode_texts(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut result = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            result.extend(self.encode_text_chunk(chunk)?);
        }
        debug!("encoded {} texts", texts.len());
        Ok(result)
    }
}

/// 把一批图片打包为 (n, 3, 224, 224) 的 NCHW 张量
fn image_tensor(images: &[DynamicImage]) -> Array4<f32> {
    let size = CLIP_INPUT_SIZE as usize;
    let mut pixels = Array4::<f32>::zeros((images.len(), 3, size, size));
    for (i, image) in images.iter().enumerate() {
        let resized = image
            .resize_exact(CLIP_INPUT_SIZE, CLIP_INPUT_SIZE, FilterType::Triangle)
            .to_rgb8();
        for (x, y, p) in resized.enumerate_pixels() {
            for c in 0..3 {
                pixels[[i, c, y as usize, x as usize]] =
                    (p[c] as f32 / 255. - CLIP_MEAN[c]) / CLIP_STD[c];
            }
        }
    }
    pixels
}

/// 从会话输出中取出 (n, dim) 的嵌入矩阵并逐行校验
fn extract_rows(
    outputs: &ort::session::SessionOutputs,
    name: &str,
    expected: usize,
) -> Result<Vec<Embedding>> {
    let (shape, data) = outputs
        .get(name)
        .ok_or_else(|| Error::Encode(format!("模型缺少输出 {name}")))?
        .try_extract_tensor::<f32>()
        .map_err(|e| Error::Encode(e.to_string()))?;

    let dim = *shape.last().unwrap_or(&0) as usize;
    if dim != EMBEDDING_DIM || data.len() != expected * dim {
        return Err(Error::Encode(format!(
            "输出形状不符: 期望 ({expected}, {EMBEDDING_DIM})，得到 {shape:?}"
        )));
    }

    let mut rows = Vec::with_capacity(expected);
    for row in data.chunks_exact(dim) {
        if row.iter().any(|x| !x.is_finite()) {
            return Err(Error::Encode("嵌入包含非有限值".to_string()));
        }
        rows.push(Embedding::new(row.to_vec()));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_tensor_shape_and_range() {
        let images =
            vec![DynamicImage::new_rgb8(64, 32), DynamicImage::new_rgb8(300, 300)];
        let t = image_tensor(&images);
        assert_eq!(t.shape(), &[2, 3, 224, 224]);
        // 全黑图片归一化后应当等于 -mean/std
        let expect = (0. - CLIP_MEAN[0]) / CLIP_STD[0];
        assert!((t[[0, 0, 0, 0]] - expect).abs() < 1e-6);
    }
}
