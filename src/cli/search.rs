use std::convert::Infallible;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::warn;

use crate::cli::SubCommandExtend;
use crate::config::{ClipOptions, DetectorOptions, Opts, SearchOptions};
use crate::cropper::{CropPolicy, Cropper};
use crate::pipeline::{OnnxResourceLoader, Retriever, SearchResult};
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub detector: DetectorOptions,
    #[command(flatten)]
    pub clip: ClipOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 查询图片路径
    #[arg(short, long, value_name = "FILE")]
    pub image: Option<PathBuf>,
    /// 查询文本
    #[arg(short, long, value_name = "TEXT")]
    pub text: Option<String>,
    /// 跳过服装检测，直接以整图为一条查询
    #[arg(long)]
    pub no_crop: bool,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        if self.image.is_none() && self.text.is_none() {
            anyhow::bail!("查询至少需要图片或文本之一");
        }

        let loader = OnnxResourceLoader::new(
            opts.conf_dir.clone(),
            self.detector.clone(),
            self.clip.clone(),
            self.search.ann,
        );
        let cropper = Cropper::new(CropPolicy::with_overrides(
            self.detector.skip_labels.as_deref(),
            self.detector.interest_labels.as_deref(),
        ));
        let retriever = Retriever::new(loader).with_cropper(cropper);

        match &self.image {
            Some(path) if !self.no_crop => {
                let image = utils::imread(path)?;
                let matches = retriever
                    .search_outfit(&image, self.text.as_deref(), self.search.count)
                    .await?;
                for m in &matches {
                    println!("# {} ({:.2})", m.category, m.confidence);
                    match &m.result {
                        Ok(result) => print_result(result, self)?,
                        Err(e) => warn!("该裁剪检索失败: {e}"),
                    }
                }
            }
            image => {
                let images = match image {
                    Some(path) => vec![utils::imread(path)?],
                    None => vec![],
                };
                let outcomes = retriever
                    .retrieve_batch(&images, &[self.text.clone()], self.search.count)
                    .await?;
                for outcome in &outcomes {
                    print_result(outcome.as_ref().map_err(|e| anyhow::anyhow!("{e}"))?, self)?;
                }
            }
        }

        Ok(())
    }
}

fn print_result(result: &SearchResult, opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result.hits)?)
        }
        OutputFormat::Table => {
            for hit in &result.hits {
                println!(
                    "{:.4}\t{}\t{}\t{}",
                    hit.score, hit.item.name, hit.item.price, hit.item.image_path
                );
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}

impl FromStr for OutputFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            _ => unreachable!(),
        }
    }
}
