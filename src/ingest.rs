use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{info, warn};
use ndarray::prelude::*;
use ndarray_npy::write_npy;
use serde::{Deserialize, Serialize};

use crate::clip::GarmentEncode;
use crate::config::ConfDir;
use crate::db::{self, RawCatalogRecord};
use crate::embedding::fuse;
use crate::errors::Error;
use crate::index::{FlatIndex, VectorIndex};
use crate::utils::{imread, pb_style};

/// 摄取产物清单
///
/// 嵌入矩阵、元数据和索引是成套再生的三件套，清单记录行数与
/// 各文件的校验和，加载时据此拒绝被部分更新过的产物组合。
#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub count: usize,
    pub dim: usize,
    pub embeddings_blake3: String,
    pub index_blake3: String,
}

impl Manifest {
    /// 针对当前磁盘上的产物生成清单
    pub fn create(conf_dir: &ConfDir, count: usize, dim: usize) -> Result<Self> {
        Ok(Self {
            count,
            dim,
            embeddings_blake3: hash_file(&conf_dir.embeddings())?,
            index_blake3: hash_file(&conf_dir.index())?,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("无法写入清单 {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("无法读取清单 {}", path.display()))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// 校验磁盘产物与清单一致
    pub fn verify(conf_dir: &ConfDir) -> Result<Self, Error> {
        let check = || -> Result<Self> {
            let manifest = Self::load(&conf_dir.manifest())?;
            if manifest.embeddings_blake3 != hash_file(&conf_dir.embeddings())? {
                anyhow::bail!("嵌入矩阵与清单不一致");
            }
            if manifest.index_blake3 != hash_file(&conf_dir.index())? {
                anyhow::bail!("索引文件与清单不一致");
            }
            Ok(manifest)
        };
        check().map_err(|e| Error::ResourceLoad(format!("产物清单校验失败: {e}")))
    }
}

fn hash_file(path: &Path) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("无法读取 {}", path.display()))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// 摄取统计
#[derive(Debug, Default)]
pub struct IngestReport {
    /// 输入记录总数
    pub total: usize,
    /// 成功入库的条目数
    pub ingested: usize,
    /// 因缺图或图片不可读而跳过的条目数
    pub skipped_missing: usize,
    /// 因字段缺失被隔离的记录数
    pub quarantined: usize,
}

/// 目录 JSON 的两种形态：裸数组或带 products 键的对象
#[derive(Deserialize)]
struct CatalogFile {
    products: Vec<RawCatalogRecord>,
}

/// 离线摄取流程：目录 JSON → 嵌入 + 元数据 + 索引三件套
///
/// 摄取绝不与服务并发运行；产物先写临时文件再整体改名，
/// 行数不一致会在写出任何产物之前中止。
pub struct Ingestor {
    conf_dir: ConfDir,
}

impl Ingestor {
    pub fn new(conf_dir: ConfDir) -> Self {
        Self { conf_dir }
    }

    pub async fn run(
        &self,
        encoder: &dyn GarmentEncode,
        catalog: &Path,
    ) -> Result<IngestReport> {
        let text = fs::read_to_string(catalog)
            .with_context(|| format!("无法读取目录文件 {}", catalog.display()))?;
        let records: Vec<RawCatalogRecord> =
            match serde_json::from_str::<CatalogFile>(&text) {
                Ok(file) => file.products,
                Err(_) => serde_json::from_str(&text)
                    .with_context(|| format!("目录文件格式错误 {}", catalog.display()))?,
            };

        let mut report = IngestReport { total: records.len(), ..Default::default() };
        info!("开始摄取 {} 条目录记录", records.len());

        // 校验与缺图过滤必须发生在编码之前，
        // 否则嵌入矩阵和元数据数组就有错位的可能
        let pb = ProgressBar::new(records.len() as u64).with_style(pb_style());
        let mut items = vec![];
        let mut images = vec![];
        let mut texts = vec![];
        for raw in records {
            pb.inc(1);
            let Some(item) = raw.validate(items.len() as i64) else {
                report.quarantined += 1;
                warn!("隔离字段不全的记录");
                continue;
            };
            let image = match imread(&item.image_path) {
                Ok(image) => image,
                Err(e) => {
                    report.skipped_missing += 1;
                    warn!("跳过 {}: {e}", item.name);
                    continue;
                }
            };
            texts.push(format!("{}: {}", item.name, item.description));
            images.push(image);
            items.push(item);
        }
        pb.finish_with_message("目录扫描完成");

        info!("编码 {} 条条目", items.len());
        let img_embs = encoder.encode_images(&images)?;
        let txt_embs = encoder.encode_texts(&texts)?;
        if img_embs.len() != items.len() || txt_embs.len() != items.len() {
            return Err(Error::MetadataIndexMismatch {
                metadata: items.len(),
                index: img_embs.len().min(txt_embs.len()),
            }
            .into());
        }

        // 目录侧的融合与查询侧一致：图文均值后归一化
        let dim = encoder.dim();
        let mut matrix = Array2::<f32>::zeros((items.len(), dim));
        for (i, (img, txt)) in img_embs.iter().zip(&txt_embs).enumerate() {
            let fused = fuse(Some(img), Some(txt))?;
            anyhow::ensure!(fused.dim() == dim, "嵌入维数不一致: {}", fused.dim());
            matrix.row_mut(i).assign(&fused.view());
        }

        self.write_artifacts(matrix, items, &mut report).await?;
        Ok(report)
    }

    async fn write_artifacts(
        &self,
        matrix: Array2<f32>,
        items: Vec<db::CatalogItem>,
        report: &mut IngestReport,
    ) -> Result<()> {
        if matrix.nrows() != items.len() {
            return Err(Error::MetadataIndexMismatch {
                metadata: items.len(),
                index: matrix.nrows(),
            }
            .into());
        }

        fs::create_dir_all(self.conf_dir.path())?;

        let emb_tmp = self.conf_dir.embeddings().with_extension("npy.tmp");
        write_npy(&emb_tmp, &matrix).context("写入嵌入矩阵失败")?;

        let index = FlatIndex::build(matrix)?;
        let index_tmp = self.conf_dir.index().with_extension("flat.tmp");
        index.save(&index_tmp)?;

        let pool = db::init_db(self.conf_dir.database()).await?;
        db::crud::replace_catalog(&pool, &items).await?;
        pool.close().await;

        // 库提交后原子改名产物，清单最后写；加载端以清单校验为准
        fs::rename(&emb_tmp, self.conf_dir.embeddings())?;
        fs::rename(&index_tmp, self.conf_dir.index())?;
        Manifest::create(&self.conf_dir, items.len(), index.dim())?
            .save(&self.conf_dir.manifest())?;

        report.ingested = items.len();
        info!("摄取完成: {} 条入库", items.len());
        Ok(())
    }
}
