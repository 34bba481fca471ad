use std::collections::HashSet;

use image::DynamicImage;
use log::debug;

use crate::detector::{BBox, Detection};

/// 默认跳过的标签词元：袖子类检测框只覆盖衣物局部，对检索没有意义
pub const DEFAULT_SKIP: [&str; 4] = ["sleeve", "sleeveless", "short sleeve", "long sleeve"];

/// 默认关注的标签词元
pub const DEFAULT_INTEREST: [&str; 6] =
    ["shirt", "pants", "jacket", "t-shirt", "top", "sweatshirt"];

/// 裁剪策略：基于词元集合交集的跳过/关注名单
#[derive(Debug, Clone)]
pub struct CropPolicy {
    pub skip: HashSet<String>,
    pub interest: HashSet<String>,
}

impl Default for CropPolicy {
    fn default() -> Self {
        Self {
            skip: DEFAULT_SKIP.iter().map(|s| s.to_string()).collect(),
            interest: DEFAULT_INTEREST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CropPolicy {
    /// 用逗号分隔的自定义名单覆盖默认值
    pub fn with_overrides(skip: Option<&str>, interest: Option<&str>) -> Self {
        let parse = |s: &str| {
            s.split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect::<HashSet<_>>()
        };
        let mut policy = Self::default();
        if let Some(s) = skip {
            policy.skip = parse(s);
        }
        if let Some(s) = interest {
            policy.interest = parse(s);
        }
        policy
    }
}

/// 一块从原图裁出的服装子图
#[derive(Debug, Clone)]
pub struct Crop {
    pub image: DynamicImage,
    pub category: String,
    pub confidence: f32,
    pub bbox: BBox,
}

/// 按策略过滤检测框并裁剪出服装子图
pub struct Cropper {
    policy: CropPolicy,
}

impl Cropper {
    pub fn new(policy: CropPolicy) -> Self {
        Self { policy }
    }

    /// 过滤并裁剪，顺序与检测器输出保持一致
    ///
    /// 跳过名单的优先级高于关注名单：多标签检测框只要命中一个跳过词元，
    /// 即使同时命中关注词元也整体丢弃。空检测输入产生空结果，不做兜底。
    pub fn crop(&self, image: &DynamicImage, detections: &[Detection]) -> Vec<Crop> {
        let mut crops = vec![];
        for det in detections {
            if det.tokens.iter().any(|t| self.policy.skip.contains(t)) {
                debug!("skip {} ({:.2})", det.category, det.confidence);
                continue;
            }
            if !det.tokens.iter().any(|t| self.policy.interest.contains(t)) {
                continue;
            }
            crops.push(Crop {
                image: crop_region(image, det.bbox),
                category: det.category.clone(),
                confidence: det.confidence,
                bbox: det.bbox,
            });
        }
        crops
    }
}

impl Default for Cropper {
    fn default() -> Self {
        Self::new(CropPolicy::default())
    }
}

/// 按检测框裁剪子图，框自动收拢到图片范围内
fn crop_region(image: &DynamicImage, bbox: BBox) -> DynamicImage {
    let (x1, y1, x2, y2) = bbox.corners();
    let x = (x1.floor() as u32).min(image.width().saturating_sub(1));
    let y = (y1.floor() as u32).min(image.height().saturating_sub(1));
    let w = ((x2.ceil() as u32).min(image.width()) - x).max(1);
    let h = ((y2.ceil() as u32).min(image.height()) - y).max(1);
    image.crop_imm(x, y, w, h)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::detector::Detection;

    fn blank(w: u32, h: u32) -> DynamicImage {
        DynamicImage::new_rgb8(w, h)
    }

    fn det(label: &str) -> Detection {
        Detection::new(label, 0.9, BBox::new(10., 10., 50., 50.))
    }

    #[rstest]
    #[case::bare("sleeve")]
    #[case::mixed_case("Shirt, Sleeve")]
    #[case::variant("shirt, Long Sleeve")]
    #[case::sleeveless("top, sleeveless")]
    fn skip_takes_precedence_over_interest(#[case] label: &str) {
        let image = blank(100, 100);
        let cropper = Cropper::default();
        assert!(cropper.crop(&image, &[det(label)]).is_empty());
    }

    #[test]
    fn interest_tokens_are_matched_as_whole_tokens() {
        let image = blank(100, 100);
        let cropper = Cropper::default();
        // 多标签按完整词元求交集："top, t-shirt, sweatshirt" 命中关注集，
        // "tights, stockings" 整体不命中
        let detections = vec![det("top, t-shirt, sweatshirt"), det("tights, stockings")];
        let crops = cropper.crop(&image, &detections);
        assert_eq!(crops.len(), 1);
        assert_eq!(crops[0].category, "top, t-shirt, sweatshirt");
    }

    #[test]
    fn order_is_preserved() {
        let image = blank(200, 200);
        let cropper = Cropper::default();
        let detections = vec![det("pants"), det("hat"), det("jacket")];
        let crops = cropper.crop(&image, &detections);
        let categories: Vec<_> = crops.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(categories, ["pants", "jacket"]);
    }

    #[test]
    fn empty_detections_yield_empty_crops() {
        let cropper = Cropper::default();
        assert!(cropper.crop(&blank(10, 10), &[]).is_empty());
    }

    #[test]
    fn crop_carries_both_bbox_forms() {
        let image = blank(100, 100);
        let cropper = Cropper::default();
        let crops = cropper.crop(&image, &[det("shirt, blouse")]);
        let b = crops[0].bbox;
        assert_eq!((b.x, b.y, b.w, b.h), (10., 10., 50., 50.));
        assert_eq!(b.corners(), (10., 10., 60., 60.));
        assert_eq!(crops[0].image.width(), 50);
    }

    #[test]
    fn oversized_bbox_is_clamped_to_image() {
        let image = blank(40, 40);
        let cropper = Cropper::default();
        let detections = vec![Detection::new("pants", 0.8, BBox::new(20., 20., 100., 100.))];
        let crops = cropper.crop(&image, &detections);
        assert_eq!(crops[0].image.width(), 20);
        assert_eq!(crops[0].image.height(), 20);
    }
}
