use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result, bail};
use log::debug;
use ndarray::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Neighbor, VectorIndex};
use crate::embedding::Embedding;
use crate::errors;

/// 平坦内积索引：对全量目录向量做精确暴力搜索
///
/// 这是检索质量的基线契约，近似索引的排序必须以它为参照。
pub struct FlatIndex {
    dim: usize,
    data: Array2<f32>,
}

/// 索引文件的序列化形式
#[derive(Serialize, Deserialize)]
struct FlatIndexData {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// 从 (n, dim) 的向量矩阵构建索引
    ///
    /// 所有分量必须是有限值，行向量应当已经归一化。
    pub fn build(data: Array2<f32>) -> Result<Self> {
        if data.iter().any(|x| !x.is_finite()) {
            bail!("索引向量包含非有限值");
        }
        let dim = data.ncols();
        debug!("building flat index: {} x {}", data.nrows(), dim);
        Ok(Self { dim, data })
    }

    /// 将索引写入文件
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("无法创建索引文件 {}", path.display()))?;
        let data = FlatIndexData {
            dim: self.dim,
            data: self.data.iter().copied().collect(),
        };
        bincode::serialize_into(BufWriter::new(file), &data)?;
        Ok(())
    }

    /// 从文件加载索引
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("无法打开索引文件 {}", path.display()))?;
        let raw: FlatIndexData = bincode::deserialize_from(BufReader::new(file))?;
        if raw.dim == 0 || raw.data.len() % raw.dim != 0 {
            bail!("索引文件损坏: dim = {}, len = {}", raw.dim, raw.data.len());
        }
        let rows = raw.data.len() / raw.dim;
        let data = Array2::from_shape_vec((rows, raw.dim), raw.data)?;
        Self::build(data)
    }

    /// 索引底层的向量矩阵
    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }
}

impl VectorIndex for FlatIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.data.nrows()
    }

    fn search(&self, queries: &[Embedding], k: usize) -> errors::Result<Vec<Vec<Neighbor>>> {
        Ok(queries
            .par_iter()
            .map(|q| {
                let scores = self.data.dot(&q.view());
                let mut neighbors: Vec<Neighbor> = scores
                    .iter()
                    .enumerate()
                    .map(|(row, &score)| Neighbor { row, score })
                    .collect();
                neighbors.sort_unstable_by(|a, b| b.score.total_cmp(&a.score));
                neighbors.truncate(k);
                neighbors
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::fuse;

    fn unit(v: Vec<f32>) -> Embedding {
        Embedding::new(v).normalized().unwrap()
    }

    fn basis_index() -> FlatIndex {
        // 三个标准正交基向量
        let data = ndarray::arr2(&[
            [1.0f32, 0., 0.],
            [0., 1., 0.],
            [0., 0., 1.],
        ]);
        FlatIndex::build(data).unwrap()
    }

    #[test]
    fn search_returns_descending_scores_within_bounds() {
        let index = basis_index();
        let q = unit(vec![0.8, 0.5, 0.1]);
        let result = &index.search(std::slice::from_ref(&q), 3).unwrap()[0];

        assert_eq!(result.len(), 3);
        for pair in result.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for n in result {
            assert!((-1.0..=1.0).contains(&n.score));
        }
        assert_eq!(result[0].row, 0);
    }

    #[test]
    fn search_truncates_to_corpus_size() {
        let index = basis_index();
        let q = unit(vec![1., 0., 0.]);
        let result = &index.search(std::slice::from_ref(&q), 10).unwrap()[0];
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn identical_vector_scores_one() {
        let index = basis_index();
        let q = fuse(Some(&Embedding::new(vec![0., 1., 0.])), None).unwrap();
        let result = &index.search(std::slice::from_ref(&q), 1).unwrap()[0];
        assert_eq!(result[0].row, 1);
        assert!((result[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn non_finite_vectors_are_rejected() {
        let data = ndarray::arr2(&[[f32::NAN, 0.]]);
        assert!(FlatIndex::build(data).is_err());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.flat");

        let index = basis_index();
        index.save(&path).unwrap();
        let loaded = FlatIndex::load(&path).unwrap();

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.dim(), 3);
        let q = unit(vec![0., 0., 1.]);
        let result = &loaded.search(std::slice::from_ref(&q), 1).unwrap()[0];
        assert_eq!(result[0].row, 2);
    }
}
