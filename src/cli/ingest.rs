use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::clip::FashionClip;
use crate::config::{ClipOptions, Opts};
use crate::ingest::Ingestor;

#[derive(Parser, Debug, Clone)]
pub struct IngestCommand {
    #[command(flatten)]
    pub clip: ClipOptions,
    /// 目录 JSON 文件，裸数组或带 products 键的对象
    pub catalog: PathBuf,
}

impl SubCommandExtend for IngestCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let encoder = block_in_place(|| {
            FashionClip::load(
                &opts.conf_dir.clip_vision_model(),
                &opts.conf_dir.clip_text_model(),
                &opts.conf_dir.tokenizer(),
                &self.clip,
            )
        })?;

        let report = Ingestor::new(opts.conf_dir.clone()).run(&encoder, &self.catalog).await?;
        info!(
            "摄取完成: 共 {} 条，入库 {}，缺图跳过 {}，隔离 {}",
            report.total, report.ingested, report.skipped_missing, report.quarantined
        );
        Ok(())
    }
}
