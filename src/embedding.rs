use ndarray::prelude::*;

use crate::errors::{Error, Result};

/// 共享嵌入空间的维数
pub const EMBEDDING_DIM: usize = 512;

/// 归一化判定容差
const NORM_EPS: f32 = 1e-12;

/// 嵌入向量
///
/// 图片和文本编码器的输出都落在同一空间中，因此可以直接做内积比较，
/// 也可以逐元素平均后融合。入索引或参与比较之前必须先归一化。
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Array1<f32>);

impl Embedding {
    pub fn new(v: Vec<f32>) -> Self {
        Self(Array1::from_vec(v))
    }

    pub fn from_array(v: Array1<f32>) -> Self {
        Self(v)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        self.0.as_slice().expect("embedding 应当是连续内存")
    }

    pub fn view(&self) -> ArrayView1<'_, f32> {
        self.0.view()
    }

    /// 向量的 L2 范数
    pub fn norm(&self) -> f32 {
        self.0.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// 是否所有分量均为有限值
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|x| x.is_finite())
    }

    /// 返回单位化后的新向量
    ///
    /// 范数为零时拒绝除法，返回 [`Error::DegenerateEmbedding`]。
    pub fn normalized(&self) -> Result<Embedding> {
        let norm = self.norm();
        if !norm.is_finite() || norm < NORM_EPS {
            return Err(Error::DegenerateEmbedding);
        }
        Ok(Embedding(&self.0 / norm))
    }
}

/// 融合图片与文本嵌入为一条查询向量
///
/// - 只有图片：normalize(image)
/// - 只有文本：normalize(text)
/// - 两者都有：normalize(mean(image, text))
///
/// 三条路径统一归一化，保证所有查询处在同一个相似度尺度上。
pub fn fuse(image: Option<&Embedding>, text: Option<&Embedding>) -> Result<Embedding> {
    match (image, text) {
        (None, None) => Err(Error::InvalidQuery),
        (Some(v), None) | (None, Some(v)) => v.normalized(),
        (Some(a), Some(b)) => {
            let mean = (&a.0 + &b.0) * 0.5;
            Embedding(mean).normalized()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn normalized_is_unit_length() {
        let e = Embedding::new(vec![3.0, 4.0]);
        let n = e.normalized().unwrap();
        assert!(close(n.norm(), 1.0));
    }

    #[test]
    fn zero_norm_is_rejected() {
        let e = Embedding::new(vec![0.0; 8]);
        assert!(matches!(e.normalized(), Err(Error::DegenerateEmbedding)));
    }

    #[test]
    fn fuse_requires_at_least_one_modality() {
        assert!(matches!(fuse(None, None), Err(Error::InvalidQuery)));
    }

    #[test]
    fn fuse_normalizes_on_every_path() {
        let img = Embedding::new(vec![2.0, 0.0, 0.0]);
        let txt = Embedding::new(vec![0.0, 5.0, 0.0]);

        for e in [
            fuse(Some(&img), None).unwrap(),
            fuse(None, Some(&txt)).unwrap(),
            fuse(Some(&img), Some(&txt)).unwrap(),
        ] {
            assert!(close(e.norm(), 1.0));
        }
    }

    #[test]
    fn fuse_is_commutative() {
        let a = Embedding::new(vec![0.1, -0.7, 0.3, 0.9]);
        let b = Embedding::new(vec![0.5, 0.2, -0.4, 0.0]);

        let ab = fuse(Some(&a), Some(&b)).unwrap();
        let ba = fuse(Some(&b), Some(&a)).unwrap();
        for (x, y) in ab.as_slice().iter().zip(ba.as_slice()) {
            assert!(close(*x, *y));
        }
    }
}
