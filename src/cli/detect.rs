use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::{OutputFormat, SubCommandExtend};
use crate::config::{DetectorOptions, Opts};
use crate::detector::{GarmentDetect, GarmentDetector};
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct DetectCommand {
    #[command(flatten)]
    pub detector: DetectorOptions,
    /// 图片路径
    pub image: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for DetectCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let detector = block_in_place(|| {
            GarmentDetector::load(&opts.conf_dir.detector_model(), &self.detector)
        })?;
        let image = utils::imread(&self.image)?;
        let detections = block_in_place(|| detector.detect(&image))?;

        match self.output_format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&detections)?)
            }
            OutputFormat::Table => {
                for det in &detections {
                    let (x1, y1, x2, y2) = det.bbox.corners();
                    println!(
                        "{:.2}\t{}\t({x1:.0}, {y1:.0}, {x2:.0}, {y2:.0})",
                        det.confidence, det.category
                    );
                }
            }
        }
        Ok(())
    }
}
