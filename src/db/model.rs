use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 目录条目
///
/// `row_index` 是该条目的嵌入在向量索引中的行号，两者由摄取流程
/// 同步生成，服务期间保持一一对应。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CatalogItem {
    pub row_index: i64,
    pub name: String,
    pub description: String,
    pub image_path: String,
    pub price: String,
}

/// 摄取输入的原始目录记录，字段宽松，待校验
///
/// 上游爬虫产出的 JSON 不保证字段齐全，价格可能是字符串也可能是数字
#[derive(Debug, Clone, Deserialize)]
pub struct RawCatalogRecord {
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(alias = "image_url")]
    pub image_path: Option<String>,
    #[serde(default)]
    pub price: Option<Value>,
}

impl RawCatalogRecord {
    /// 校验必填字段并转为显式记录
    ///
    /// name 和 image_path 为必填；缺失或为空的记录返回 None，由调用方隔离
    pub fn validate(self, row_index: i64) -> Option<CatalogItem> {
        let name = self.name.filter(|s| !s.trim().is_empty())?;
        let image_path = self.image_path.filter(|s| !s.trim().is_empty())?;
        let price = match self.price {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        Some(CatalogItem {
            row_index,
            name,
            description: self.description.unwrap_or_default(),
            image_path,
            price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_string_and_number_price() {
        let a: RawCatalogRecord =
            serde_json::from_str(r#"{"name":"Tee","image_path":"a.jpg","price":"$19.95"}"#)
                .unwrap();
        assert_eq!(a.validate(0).unwrap().price, "$19.95");

        let b: RawCatalogRecord =
            serde_json::from_str(r#"{"name":"Tee","image_url":"a.jpg","price":19.95}"#).unwrap();
        let item = b.validate(1).unwrap();
        assert_eq!(item.price, "19.95");
        assert_eq!(item.image_path, "a.jpg");
    }

    #[test]
    fn validate_quarantines_incomplete_records() {
        let a: RawCatalogRecord = serde_json::from_str(r#"{"description":"x"}"#).unwrap();
        assert!(a.validate(0).is_none());

        let b: RawCatalogRecord =
            serde_json::from_str(r#"{"name":"  ","image_path":"a.jpg"}"#).unwrap();
        assert!(b.validate(0).is_none());
    }
}
