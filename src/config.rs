use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "", "stylesearch").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
pub struct DetectorOptions {
    /// 检测置信度阈值
    #[arg(long, value_name = "T", default_value_t = 0.3)]
    pub det_threshold: f32,
    /// 检测输入的短边目标尺寸
    #[arg(long, value_name = "N", default_value_t = 800)]
    pub det_size: u32,
    /// 检测输入的长边上限，超出时按长边等比缩放
    #[arg(long, value_name = "N", default_value_t = 1333)]
    pub det_max_size: u32,
    /// 检测推理线程数，0 表示自动
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub det_threads: usize,
    /// 覆盖默认跳过标签，逗号分隔
    #[arg(long, value_name = "LABELS")]
    pub skip_labels: Option<String>,
    /// 覆盖默认关注标签，逗号分隔
    #[arg(long, value_name = "LABELS")]
    pub interest_labels: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct ClipOptions {
    /// 编码批大小，单次送入模型的图片/文本数量
    #[arg(long, value_name = "N", default_value_t = 16)]
    pub clip_batch_size: usize,
    /// 编码推理线程数，0 表示自动
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub clip_threads: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 每条查询返回的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 5)]
    pub count: usize,
    /// 使用 HNSW 近似索引加速搜索，召回以图参数为界
    #[arg(long)]
    pub ann: bool,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "stylesearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// stylesearch 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 从目录 JSON 构建嵌入、元数据和索引三件套
    Ingest(IngestCommand),
    /// 用图片和/或文本检索目录
    Search(SearchCommand),
    /// 检测图片中的服装并打印结果
    Detect(DetectCommand),
}

/// 配置目录，集中管理模型与产物文件的路径
#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回元数据数据库的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("stylesearch.db")
    }

    /// 返回嵌入矩阵文件的路径
    pub fn embeddings(&self) -> PathBuf {
        self.path.join("embeddings.npy")
    }

    /// 返回平坦索引文件的路径
    pub fn index(&self) -> PathBuf {
        self.path.join("index.flat")
    }

    /// 返回产物清单文件的路径
    pub fn manifest(&self) -> PathBuf {
        self.path.join("manifest.json")
    }

    /// 返回模型目录的路径
    pub fn model_dir(&self) -> PathBuf {
        self.path.join("models")
    }

    /// 返回检测模型的路径
    pub fn detector_model(&self) -> PathBuf {
        self.model_dir().join("detector.onnx")
    }

    /// 返回视觉编码模型的路径
    pub fn clip_vision_model(&self) -> PathBuf {
        self.model_dir().join("clip_vision.onnx")
    }

    /// 返回文本编码模型的路径
    pub fn clip_text_model(&self) -> PathBuf {
        self.model_dir().join("clip_text.onnx")
    }

    /// 返回分词词表的路径
    pub fn tokenizer(&self) -> PathBuf {
        self.model_dir().join("tokenizer.json")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
