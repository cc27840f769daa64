use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::db::{ImageFilter, SortOrder};
use crate::scoring::DEFAULT_API_SERVER;
use crate::walk::ArchiveKind;

static CONF_DIR: LazyLock<String> = LazyLock::new(|| {
    ProjectDirs::from("", "imagedb", "imagedb")
        .map(|dirs| dirs.config_dir().to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from(".imagedb"))
});

fn default_config_dir() -> &'static str {
    CONF_DIR.as_str()
}

fn default_workers() -> usize {
    num_cpus::get().saturating_sub(4).max(2)
}

#[derive(Parser, Debug, Clone)]
pub struct IndexOptions {
    /// 工作线程数量
    #[arg(short, long, value_name = "N", default_value_t = default_workers())]
    pub workers: usize,
    /// 图片最大边长，超过时等比缩小后再提交评分
    #[arg(long, value_name = "PIXELS", default_value_t = 336)]
    pub max_size: u32,
    /// 远程队列长度上限，超过时暂停提交
    #[arg(long, value_name = "N", default_value_t = 96)]
    pub max_queue: usize,
    /// 队列长度探测与结果同步的间隔，单位为毫秒
    #[arg(long, value_name = "MS", default_value_t = 250)]
    pub cooldown_ms: u64,
    /// 需要进入的归档格式，多个格式用逗号分隔
    #[arg(long, value_enum, value_delimiter = ',', default_value = "zip,rar,tar")]
    pub archives: Vec<ArchiveKind>,
    /// 使用同步接口逐张评分，不经过远程队列
    #[arg(long)]
    pub sync_scoring: bool,
    /// 遍历结束后等待剩余评分结果的最长时间，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    pub drain_timeout_secs: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct ScoringOptions {
    /// 评分服务地址
    #[arg(long, value_name = "URL", default_value = DEFAULT_API_SERVER)]
    pub api_server: String,
}

#[derive(Parser, Debug, Clone)]
pub struct QueryOptions {
    /// 查询的集合 ID，可以指定多次
    #[arg(short = 'C', long = "collection", value_name = "ID")]
    pub collections: Vec<i64>,
    /// 返回的结果数量
    #[arg(long, default_value_t = 64)]
    pub limit: i64,
    /// 跳过的结果数量
    #[arg(long, default_value_t = 0)]
    pub offset: i64,
    /// 排序方式，只对 search 有效
    #[arg(long, value_enum, default_value_t = SortOrder::PathAsc)]
    pub order: SortOrder,
    #[arg(long, value_name = "PIXELS")]
    pub width_min: Option<i64>,
    #[arg(long, value_name = "PIXELS")]
    pub width_max: Option<i64>,
    #[arg(long, value_name = "PIXELS")]
    pub height_min: Option<i64>,
    #[arg(long, value_name = "PIXELS")]
    pub height_max: Option<i64>,
    #[arg(long, value_name = "BYTES")]
    pub filesize_min: Option<i64>,
    #[arg(long, value_name = "BYTES")]
    pub filesize_max: Option<i64>,
    #[arg(long, value_name = "SCORE")]
    pub aesthetic_min: Option<f64>,
    #[arg(long, value_name = "SCORE")]
    pub aesthetic_max: Option<f64>,
    /// 相对于集合根目录的目录前缀
    #[arg(long, value_name = "PREFIX")]
    pub path_prefix: Option<String>,
    /// 文件名前缀
    #[arg(long, value_name = "PREFIX")]
    pub sub_path_prefix: Option<String>,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl QueryOptions {
    pub fn filter(&self) -> ImageFilter {
        ImageFilter {
            collections: self.collections.clone(),
            height_min: self.height_min,
            height_max: self.height_max,
            width_min: self.width_min,
            width_max: self.width_max,
            filesize_min: self.filesize_min,
            filesize_max: self.filesize_max,
            aesthetic_min: self.aesthetic_min,
            aesthetic_max: self.aesthetic_max,
            path_prefix: self.path_prefix.clone(),
            sub_path_prefix: self.sub_path_prefix.clone(),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imagedb", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imagedb 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 管理图片集合
    Collection(CollectionCommand),
    /// 索引集合中的图片
    Index(IndexCommand),
    /// 按条件列出图片
    Search(SearchCommand),
    /// 按向量距离查找相似图片
    Similar(SimilarCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("imagedb.db")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index_options() {
        let opts = Opts::parse_from(["imagedb", "-c", "/tmp/conf", "index", "3", "--archives", "zip"]);
        assert_eq!(opts.conf_dir.database(), PathBuf::from("/tmp/conf/imagedb.db"));
        let SubCommand::Index(cmd) = opts.subcmd else {
            panic!("expected index command");
        };
        assert_eq!(cmd.collection, 3);
        assert_eq!(cmd.index.archives, vec![ArchiveKind::Zip]);
        assert_eq!(cmd.index.max_size, 336);
        assert_eq!(cmd.index.max_queue, 96);
        assert!(cmd.index.workers >= 2);
    }

    #[test]
    fn test_default_archives() {
        let opts = Opts::parse_from(["imagedb", "index", "1"]);
        let SubCommand::Index(cmd) = opts.subcmd else {
            panic!("expected index command");
        };
        assert_eq!(cmd.index.archives, vec![ArchiveKind::Zip, ArchiveKind::Rar, ArchiveKind::Tar]);
        assert_eq!(cmd.scoring.api_server, "http://localhost:5000");
    }

    #[test]
    fn test_query_filter() {
        let opts = Opts::parse_from([
            "imagedb", "search", "-C", "1", "-C", "2", "--width-min", "10", "--path-prefix", "a/",
        ]);
        let SubCommand::Search(cmd) = opts.subcmd else {
            panic!("expected search command");
        };
        let filter = cmd.query.filter();
        assert_eq!(filter.collections, vec![1, 2]);
        assert_eq!(filter.width_min, Some(10));
        assert_eq!(filter.path_prefix.as_deref(), Some("a/"));
        assert_eq!(cmd.query.limit, 64);
    }
}
