use log::info;

use crate::db::{self, CatalogItem, Database};
use crate::errors::{Error, Result};

/// 只读的目录元数据快照
///
/// 与向量索引在摄取时同步生成：`get(i)` 描述的正是嵌入矩阵第 i 行
/// 对应的目录条目。服务期间不可变，并发读取无需加锁。
pub struct CatalogStore {
    items: Vec<CatalogItem>,
}

impl CatalogStore {
    /// 从有序条目列表构建，校验行号与位置严格一致
    pub fn new(items: Vec<CatalogItem>) -> Result<Self> {
        for (i, item) in items.iter().enumerate() {
            if item.row_index != i as i64 {
                return Err(Error::ResourceLoad(format!(
                    "目录行号不连续: 位置 {i} 的记录行号为 {}",
                    item.row_index
                )));
            }
        }
        Ok(Self { items })
    }

    pub fn get(&self, row: usize) -> Option<&CatalogItem> {
        self.items.get(row)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// 从数据库加载目录快照
pub async fn load_store(pool: &Database) -> Result<CatalogStore> {
    let items = db::crud::fetch_catalog_ordered(pool)
        .await
        .map_err(|e| Error::ResourceLoad(format!("读取目录元数据失败: {e}")))?;
    info!("目录元数据加载完成: {} 条", items.len());
    CatalogStore::new(items)
}
