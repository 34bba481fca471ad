use sqlx::{Result, SqlitePool};

use super::CatalogItem;

/// 整体替换目录元数据
///
/// 摄取产物是成套再生的：单个事务内先清空旧记录再按行号写入，
/// 不存在部分更新的中间状态
pub async fn replace_catalog(pool: &SqlitePool, items: &[CatalogItem]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM catalog").execute(&mut *tx).await?;
    for item in items {
        sqlx::query(
            r#"
            INSERT INTO catalog (row_index, name, description, image_path, price)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.row_index)
        .bind(&item.name)
        .bind(&item.description)
        .bind(&item.image_path)
        .bind(&item.price)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// 按行号顺序读出全部目录条目
pub async fn fetch_catalog_ordered(pool: &SqlitePool) -> Result<Vec<CatalogItem>> {
    sqlx::query_as::<_, CatalogItem>(
        r#"
        SELECT row_index, name, description, image_path, price
        FROM catalog ORDER BY row_index ASC
        "#,
    )
    .fetch_all(pool)
    .await
}

/// 目录条目数量
pub async fn count_catalog(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM catalog").fetch_one(pool).await?;
    Ok(row.0)
}
