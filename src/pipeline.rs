use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use log::{debug, info};
use ndarray::Array2;
use ndarray_npy::read_npy;
use serde::Serialize;
use tokio::sync::{OnceCell, RwLock};
use tokio::task::block_in_place;

use crate::clip::{FashionClip, GarmentEncode};
use crate::config::{ClipOptions, ConfDir, DetectorOptions};
use crate::cropper::Cropper;
use crate::db::{self, CatalogItem};
use crate::detector::{BBox, GarmentDetect, GarmentDetector};
use crate::embedding::{Embedding, fuse};
use crate::errors::{Error, Result};
use crate::index::{FlatIndex, HnswIndex, VectorIndex};
use crate::ingest::Manifest;
use crate::metadata::{self, CatalogStore};
use crate::metrics;

/// 一次成套加载的重资源
///
/// 进程生命周期内不可变，只能由 [`Retriever::reload`] 整体替换
pub struct Resources {
    pub detector: Box<dyn GarmentDetect>,
    pub encoder: Box<dyn GarmentEncode>,
    pub index: Box<dyn VectorIndex>,
    pub catalog: CatalogStore,
}

/// 资源加载器
///
/// 进程级上下文由它构建一次，之后整体注入 [`Retriever`]；
/// 任何一项资源初始化失败都会使服务无法进入就绪状态
pub trait ResourceLoader: Send + Sync {
    fn load(&self) -> impl Future<Output = Result<Resources>> + Send;
}

/// 默认的 ONNX 资源加载器：从配置目录读取模型与摄取产物
pub struct OnnxResourceLoader {
    conf_dir: ConfDir,
    detector: DetectorOptions,
    clip: ClipOptions,
    ann: bool,
}

impl OnnxResourceLoader {
    pub fn new(
        conf_dir: ConfDir,
        detector: DetectorOptions,
        clip: ClipOptions,
        ann: bool,
    ) -> Self {
        Self { conf_dir, detector, clip, ann }
    }
}

impl ResourceLoader for OnnxResourceLoader {
    fn load(&self) -> impl Future<Output = Result<Resources>> + Send {
        async move {
            Manifest::verify(&self.conf_dir)?;

            let (detector, encoder, index) = block_in_place(|| -> Result<_> {
                let detector =
                    GarmentDetector::load(&self.conf_dir.detector_model(), &self.detector)?;
                let encoder = FashionClip::load(
                    &self.conf_dir.clip_vision_model(),
                    &self.conf_dir.clip_text_model(),
                    &self.conf_dir.tokenizer(),
                    &self.clip,
                )?;
                let index: Box<dyn VectorIndex> = if self.ann {
                    let embeddings: Array2<f32> = read_npy(self.conf_dir.embeddings())
                        .map_err(|e| Error::ResourceLoad(format!("读取嵌入矩阵失败: {e}")))?;
                    Box::new(
                        HnswIndex::build(embeddings.view())
                            .map_err(|e| Error::ResourceLoad(e.to_string()))?,
                    )
                } else {
                    Box::new(
                        FlatIndex::load(&self.conf_dir.index())
                            .map_err(|e| Error::ResourceLoad(e.to_string()))?,
                    )
                };
                Ok((
                    Box::new(detector) as Box<dyn GarmentDetect>,
                    Box::new(encoder) as Box<dyn GarmentEncode>,
                    index,
                ))
            })?;

            let pool = db::init_db(self.conf_dir.database())
                .await
                .map_err(|e| Error::ResourceLoad(format!("打开元数据库失败: {e}")))?;
            let catalog = metadata::load_store(&pool).await?;
            pool.close().await;

            if catalog.len() != index.len() {
                return Err(Error::ResourceLoad(format!(
                    "元数据与索引行数不一致: {} != {}",
                    catalog.len(),
                    index.len()
                )));
            }

            info!("资源加载完成: 目录 {} 条", catalog.len());
            Ok(Resources { detector, encoder, index, catalog })
        }
    }
}

/// 带相似度得分的目录条目
#[derive(Debug, Clone, Serialize)]
pub struct ScoredItem {
    #[serde(flatten)]
    pub item: CatalogItem,
    pub score: f32,
}

/// 单条查询的检索结果，按得分严格降序，至多 k 条
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub hits: Vec<ScoredItem>,
}

/// 一块服装裁剪对应的检索结果
#[derive(Debug)]
pub struct OutfitMatch {
    pub category: String,
    pub confidence: f32,
    pub bbox: BBox,
    pub result: Result<SearchResult>,
}

/// 检索编排器
///
/// 组合裁剪、编码、融合、搜索与元数据回查。重资源经由单飞懒加载：
/// 首个调用触发加载，加载期间的并发调用共同等待同一次初始化，
/// 之后所有调用读取同一份只读快照。
pub struct Retriever<L> {
    loader: L,
    cropper: Cropper,
    resources: OnceCell<RwLock<Arc<Resources>>>,
}

impl<L: ResourceLoader> Retriever<L> {
    pub fn new(loader: L) -> Self {
        Self { loader, cropper: Cropper::default(), resources: OnceCell::new() }
    }

    pub fn with_cropper(mut self, cropper: Cropper) -> Self {
        self.cropper = cropper;
        self
    }

    /// 资源是否已经加载
    pub fn is_loaded(&self) -> bool {
        self.resources.initialized()
    }

    /// 获取资源快照，首次调用触发单飞加载
    async fn snapshot(&self) -> Result<Arc<Resources>> {
        let lock = self
            .resources
            .get_or_try_init(|| async {
                Ok(RwLock::new(Arc::new(self.loader.load().await?)))
            })
            .await?;
        Ok(lock.read().await.clone())
    }

    /// 重新加载资源并原子换入
    ///
    /// 在途调用持有旧快照的 Arc，会在旧数据上正常完成
    pub async fn reload(&self) -> Result<()> {
        let fresh = Arc::new(self.loader.load().await?);
        match self.resources.get() {
            Some(lock) => *lock.write().await = fresh,
            None => {
                let _ = self.resources.set(RwLock::new(fresh));
            }
        }
        Ok(())
    }

    /// 批量检索
    ///
    /// 图片与文本按位置配对，较短一侧之外的条目按该模态缺失处理，
    /// 空白文本同样视为缺失。每个槽位的失败互相隔离：结果向量中
    /// 对应位置是 `Err`，不影响兄弟查询。
    ///
    /// # Arguments
    ///
    /// * `images` - 查询图片，通常是已裁剪的服装子图
    /// * `texts` - 每个槽位的可选描述文本
    /// * `k` - 每条查询返回的结果数量
    pub async fn retrieve_batch(
        &self,
        images: &[DynamicImage],
        texts: &[Option<String>],
        k: usize,
    ) -> Result<Vec<Result<SearchResult>>> {
        let res = self.snapshot().await?;
        let n = images.len().max(texts.len());
        if n == 0 {
            return Ok(vec![]);
        }
        let start = Instant::now();

        // 压缩出实际需要编码的文本，并记住每个槽位的批内位置
        let mut text_pos = vec![None; n];
        let mut batch_texts = vec![];
        for (i, slot) in text_pos.iter_mut().enumerate() {
            let text = texts
                .get(i)
                .and_then(|t| t.as_deref())
                .map(str::trim)
                .filter(|t| !t.is_empty());
            if let Some(t) = text {
                *slot = Some(batch_texts.len());
                batch_texts.push(t.to_string());
            }
        }

        // 两种模态各自攒批编码，摊薄模型调用开销
        let img_embs = match images.is_empty() {
            true => vec![],
            false => block_in_place(|| res.encoder.encode_images(images))?,
        };
        let txt_embs = match batch_texts.is_empty() {
            true => vec![],
            false => block_in_place(|| res.encoder.encode_texts(&batch_texts))?,
        };
        if img_embs.len() != images.len() || txt_embs.len() != batch_texts.len() {
            return Err(Error::Encode("编码器返回的向量数量不符".to_string()));
        }

        // 逐槽融合，单槽失败只标记该槽
        let fused: Vec<Result<Embedding>> = (0..n)
            .map(|i| {
                let img = img_embs.get(i);
                let txt = text_pos[i].map(|j| &txt_embs[j]);
                fuse(img, txt)
            })
            .collect();

        // 有效查询合并为一次批量搜索
        let queries: Vec<Embedding> =
            fused.iter().filter_map(|r| r.as_ref().ok()).cloned().collect();
        let mut neighbor_lists = match queries.is_empty() {
            true => vec![],
            false => res.index.search(&queries, k)?,
        }
        .into_iter();

        let mut outcomes = Vec::with_capacity(n);
        for (i, slot) in fused.into_iter().enumerate() {
            let modality = match (i < images.len(), text_pos[i].is_some()) {
                (true, true) => "both",
                (true, false) => "image",
                _ => "text",
            };
            metrics::inc_query_count(modality);

            let outcome = slot.and_then(|_| {
                let neighbors =
                    neighbor_lists.next().expect("搜索结果数量与查询数量一致");
                let mut hits = Vec::with_capacity(neighbors.len());
                for neighbor in neighbors {
                    let item = res.catalog.get(neighbor.row).ok_or(
                        Error::MetadataIndexMismatch {
                            metadata: res.catalog.len(),
                            index: res.index.len(),
                        },
                    )?;
                    hits.push(ScoredItem { item: item.clone(), score: neighbor.score });
                }
                if let Some(top) = hits.first() {
                    metrics::observe_top_score(modality, top.score);
                }
                Ok(SearchResult { hits })
            });
            outcomes.push(outcome);
        }

        metrics::observe_search_duration("batch", start.elapsed().as_secs_f32());
        debug!("retrieve_batch: {} queries in {:.2?}", n, start.elapsed());
        Ok(outcomes)
    }

    /// 整身搭配检索：检测 → 裁剪 → 每块裁剪独立检索
    ///
    /// 文本（如果给了）应用到每一块裁剪上。没有产出任何可用裁剪时
    /// 退回为一条整图查询，保证图片查询总有结果可回。
    pub async fn search_outfit(
        &self,
        image: &DynamicImage,
        text: Option<&str>,
        k: usize,
    ) -> Result<Vec<OutfitMatch>> {
        let res = self.snapshot().await?;
        let detections = block_in_place(|| res.detector.detect(image))?;
        let crops = self.cropper.crop(image, &detections);
        debug!("search_outfit: {} detections, {} crops", detections.len(), crops.len());

        let (metas, crop_images): (Vec<_>, Vec<_>) = match crops.is_empty() {
            // 整图兜底是编排层的策略，不属于检测器或裁剪器
            true => (
                vec![(
                    "outfit".to_string(),
                    1.0,
                    BBox::new(0., 0., image.width() as f32, image.height() as f32),
                )],
                vec![image.clone()],
            ),
            false => crops
                .into_iter()
                .map(|c| ((c.category, c.confidence, c.bbox), c.image))
                .unzip(),
        };

        let texts = vec![text.map(str::to_string); crop_images.len()];
        let outcomes = self.retrieve_batch(&crop_images, &texts, k).await?;

        Ok(metas
            .into_iter()
            .zip(outcomes)
            .map(|((category, confidence, bbox), result)| OutfitMatch {
                category,
                confidence,
                bbox,
                result,
            })
            .collect())
    }
}
