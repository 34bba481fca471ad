use std::fs;

use image::{DynamicImage, Rgb, RgbImage};
use stylesearch::clip::GarmentEncode;
use stylesearch::config::ConfDir;
use stylesearch::db;
use stylesearch::embedding::Embedding;
use stylesearch::errors::Result;
use stylesearch::index::{FlatIndex, VectorIndex};
use stylesearch::ingest::{Ingestor, Manifest};

/// 测试用编码器：图片按平均颜色编码，文本取固定向量
struct StubEncode;

impl GarmentEncode for StubEncode {
    fn dim(&self) -> usize {
        4
    }

    fn encode_images(&self, images: &[DynamicImage]) -> Result<Vec<Embedding>> {
        Ok(images
            .iter()
            .map(|image| {
                let rgb = image.to_rgb8();
                let n = (rgb.width() * rgb.height()).max(1) as f32;
                let mut sum = [0f32; 3];
                for p in rgb.pixels() {
                    for c in 0..3 {
                        sum[c] += p[c] as f32;
                    }
                }
                Embedding::new(vec![sum[0] / n, sum[1] / n, sum[2] / n, 128.0])
            })
            .collect())
    }

    fn encode_texts(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|_| Embedding::new(vec![1., 1., 1., 1.])).collect())
    }
}

#[tokio::test]
async fn ingest_skips_missing_images_and_keeps_rows_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let conf_dir: ConfDir = dir.path().to_str().unwrap().parse().unwrap();

    // 两张真实图片 + 一条缺图记录 + 一条字段不全的记录
    let red = dir.path().join("red.png");
    let blue = dir.path().join("blue.png");
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 0, 0])))
        .save(&red)
        .unwrap();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([0, 0, 255])))
        .save(&blue)
        .unwrap();

    let catalog = serde_json::json!({
        "products": [
            { "name": "Red Tee", "description": "bright red", "image_path": red, "price": "$10" },
            { "name": "Ghost", "description": "no file", "image_path": dir.path().join("missing.png"), "price": "$1" },
            { "description": "no name at all", "image_path": blue },
            { "name": "Blue Jeans", "description": "deep blue", "image_path": blue, "price": 49.95 },
        ]
    });
    let catalog_path = dir.path().join("catalog.json");
    fs::write(&catalog_path, catalog.to_string()).unwrap();

    let report =
        Ingestor::new(conf_dir.clone()).run(&StubEncode, &catalog_path).await.unwrap();
    assert_eq!(report.total, 4);
    assert_eq!(report.ingested, 2);
    assert_eq!(report.skipped_missing, 1);
    assert_eq!(report.quarantined, 1);

    // 索引与元数据必须行行对应
    let index = FlatIndex::load(&conf_dir.index()).unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(index.dim(), 4);

    let pool = db::init_db(conf_dir.database()).await.unwrap();
    let items = db::crud::fetch_catalog_ordered(&pool).await.unwrap();
    pool.close().await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].row_index, 0);
    assert_eq!(items[0].name, "Red Tee");
    assert_eq!(items[1].row_index, 1);
    assert_eq!(items[1].name, "Blue Jeans");
    assert_eq!(items[1].price, "49.95");

    // 清单校验通过，且行数与产物一致
    let manifest = Manifest::verify(&conf_dir).unwrap();
    assert_eq!(manifest.count, 2);
    assert_eq!(manifest.dim, 4);

    // 索引行向量已归一化
    for row in index.vectors().outer_iter() {
        let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}

#[tokio::test]
async fn ingest_accepts_bare_array_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let conf_dir: ConfDir = dir.path().to_str().unwrap().parse().unwrap();

    let green = dir.path().join("green.png");
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([0, 255, 0])))
        .save(&green)
        .unwrap();

    let catalog = serde_json::json!([
        { "name": "Green Hoodie", "description": "grass green", "image_url": green, "price": "$25" },
    ]);
    let catalog_path = dir.path().join("catalog.json");
    fs::write(&catalog_path, catalog.to_string()).unwrap();

    let report =
        Ingestor::new(conf_dir.clone()).run(&StubEncode, &catalog_path).await.unwrap();
    assert_eq!(report.ingested, 1);

    let index = FlatIndex::load(&conf_dir.index()).unwrap();
    assert_eq!(index.len(), 1);
}
