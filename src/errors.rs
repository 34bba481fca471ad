use thiserror::Error;

/// 检索管线的错误类型
///
/// 批量调用中的单条查询错误（如 [`Error::InvalidQuery`]）不会中断兄弟查询，
/// 而是作为该位置的结果返回；资源级错误（[`Error::ResourceLoad`]）则直接使
/// 服务无法进入就绪状态。
#[derive(Debug, Error)]
pub enum Error {
    /// 图片无法解码或检测模型推理失败
    #[error("检测失败: {0}")]
    Detection(String),

    /// 编码模型推理失败，或输出向量包含非有限值
    #[error("编码失败: {0}")]
    Encode(String),

    /// 零范数向量无法归一化
    #[error("向量范数为零，无法归一化")]
    DegenerateEmbedding,

    /// 查询既没有图片也没有文本
    #[error("查询缺少图片和文本")]
    InvalidQuery,

    /// 元数据与向量索引行数不一致
    ///
    /// 摄取阶段遇到该错误会在写出任何产物之前中止，避免发布损坏的索引。
    #[error("元数据与索引不同步: metadata = {metadata}, index = {index}")]
    MetadataIndexMismatch { metadata: usize, index: usize },

    /// 向量索引内部错误
    #[error("索引错误: {0}")]
    Index(String),

    /// 缓存资源初始化失败
    #[error("资源加载失败: {0}")]
    ResourceLoad(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
