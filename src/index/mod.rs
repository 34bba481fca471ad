mod flat;
mod hnsw;

pub use flat::FlatIndex;
pub use hnsw::HnswIndex;

use crate::embedding::Embedding;
use crate::errors::Result;

/// 最近邻搜索结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// 向量在索引中的行号，与目录元数据一一对应
    pub row: usize,
    /// 内积得分，向量已归一化时等价于余弦相似度
    pub score: f32,
}

/// 内积 top-k 向量索引
///
/// 服务期间只读，并发读取不需要加锁；重建索引由离线摄取完成，
/// 热替换通过整体引用切换实现。
pub trait VectorIndex: Send + Sync {
    /// 向量维数
    fn dim(&self) -> usize;

    /// 索引中的向量数量
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 批量搜索，对每条查询返回至多 k 个近邻，按得分降序
    ///
    /// 结果长度为 min(k, len)。查询向量必须已经归一化。
    fn search(&self, queries: &[Embedding], k: usize) -> Result<Vec<Vec<Neighbor>>>;
}
