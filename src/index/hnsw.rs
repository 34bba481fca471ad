use anyhow::Result;
use ndarray::prelude::*;
use rayon::prelude::*;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::{Neighbor, VectorIndex};
use crate::embedding::Embedding;
use crate::errors;

/// 基于 HNSW 图的近似内积索引
///
/// 可选的吞吐优化：从与平坦索引相同的向量矩阵构建，
/// 召回损失以 HNSW 的图参数为界，排序应当与精确搜索基本一致。
pub struct HnswIndex {
    index: Index,
    dim: usize,
}

impl HnswIndex {
    /// 从 (n, dim) 向量矩阵构建
    pub fn build(data: ArrayView2<f32>) -> Result<Self> {
        let dim = data.ncols();
        let options = IndexOptions {
            dimensions: dim,
            metric: MetricKind::IP,
            quantization: ScalarKind::F32,
            // usearch 默认图参数
            connectivity: 32,
            expansion_add: 40,
            expansion_search: 16,
            ..Default::default()
        };
        let index = Index::new(&options)?;
        index.reserve(data.nrows())?;

        for (i, row) in data.outer_iter().enumerate() {
            index.add(i as u64, row.as_slice().expect("行向量应当连续"))?;
        }

        Ok(Self { index, dim })
    }
}

impl VectorIndex for HnswIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.index.size()
    }

    fn search(&self, queries: &[Embedding], k: usize) -> errors::Result<Vec<Vec<Neighbor>>> {
        queries
            .par_iter()
            .map(|q| {
                let matches = self
                    .index
                    .search(q.as_slice(), k)
                    .map_err(|e| errors::Error::Index(e.to_string()))?;
                Ok(matches
                    .keys
                    .iter()
                    .zip(&matches.distances)
                    // usearch 的 IP 距离定义为 1 - 内积
                    .map(|(&key, &distance)| Neighbor {
                        row: key as usize,
                        score: 1. - distance,
                    })
                    .collect())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hnsw_agrees_with_exact_search_on_small_corpus() {
        let data = ndarray::arr2(&[
            [1.0f32, 0., 0., 0.],
            [0., 1., 0., 0.],
            [0., 0., 1., 0.],
            [0., 0., 0., 1.],
        ]);
        let index = HnswIndex::build(data.view()).unwrap();
        assert_eq!(index.len(), 4);

        let q = Embedding::new(vec![0., 0., 1., 0.]);
        let result = &index.search(std::slice::from_ref(&q), 2).unwrap()[0];
        assert_eq!(result[0].row, 2);
        assert!((result[0].score - 1.0).abs() < 1e-5);
        assert!(result[0].score >= result[1].score);
    }
}
