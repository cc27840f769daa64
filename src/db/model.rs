use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Serialize;

use crate::filter::{FieldValue, FilterField, FilterOp, FilterSpec};

/// 图片集合，即一个被索引的根目录
#[derive(sqlx::FromRow, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: i64,
    /// 根目录路径
    pub directory: String,
}

/// 图片记录
#[derive(sqlx::FromRow, Serialize, Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// 图片 ID，首次插入时分配，之后不再变化
    pub id: i64,
    /// 所属集合 ID
    pub basedir_id: i64,
    /// 相对于集合根目录的目录，对于归档中的条目是归档文件本身的路径
    pub parent_path: String,
    /// 文件名，对于归档中的条目是归档内的路径
    pub sub_path: String,
    pub tags: Option<String>,
    /// 美学评分，评分服务返回结果之前为空
    pub aesthetic: Option<f64>,
    pub width: i64,
    pub height: i64,
    pub filesize: i64,
}

impl ImageRecord {
    /// 在集合根目录下的完整显示路径
    pub fn display_path(&self, root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(&self.parent_path).join(&self.sub_path)
    }
}

/// 插入或更新图片时使用的字段
#[derive(Debug, Clone, PartialEq)]
pub struct NewImage {
    pub basedir_id: i64,
    pub parent_path: String,
    pub sub_path: String,
    pub width: i64,
    pub height: i64,
    pub filesize: i64,
    /// 为空时保留数据库中已有的评分
    pub aesthetic: Option<f64>,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// 按路径升序
    #[default]
    PathAsc,
    /// 按路径降序
    PathDesc,
    /// 按美学评分升序
    AestheticAsc,
    /// 按美学评分降序
    AestheticDesc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::PathAsc => "ORDER BY parent_path ASC, sub_path ASC",
            Self::PathDesc => "ORDER BY parent_path DESC, sub_path DESC",
            Self::AestheticAsc => "ORDER BY aesthetic ASC",
            Self::AestheticDesc => "ORDER BY aesthetic DESC",
        }
    }
}

/// 图片过滤条件，除集合列表外的字段都是可选的
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageFilter {
    pub collections: Vec<i64>,
    pub height_min: Option<i64>,
    pub height_max: Option<i64>,
    pub width_min: Option<i64>,
    pub width_max: Option<i64>,
    pub filesize_min: Option<i64>,
    pub filesize_max: Option<i64>,
    pub aesthetic_min: Option<f64>,
    pub aesthetic_max: Option<f64>,
    /// 父目录前缀
    pub path_prefix: Option<String>,
    /// 文件名前缀
    pub sub_path_prefix: Option<String>,
}

fn like_prefix(prefix: &Option<String>) -> FieldValue {
    prefix.as_ref().map(|p| format!("{p}%")).into()
}

impl FilterSpec for ImageFilter {
    fn fields() -> Vec<FilterField<Self>> {
        vec![
            FilterField::new("collections")
                .column("basedir_id")
                .op(FilterOp::In)
                .placeholder("basedir_id_condition")
                .value(|f: &ImageFilter| f.collections.clone().into()),
            FilterField::new("height_min")
                .column("height")
                .op(FilterOp::Ge)
                .placeholder("height_min")
                .nullable()
                .value(|f: &ImageFilter| f.height_min.into()),
            FilterField::new("height_max")
                .column("height")
                .op(FilterOp::Le)
                .placeholder("height_max")
                .nullable()
                .value(|f: &ImageFilter| f.height_max.into()),
            FilterField::new("width_min")
                .column("width")
                .op(FilterOp::Ge)
                .placeholder("width_min")
                .nullable()
                .value(|f: &ImageFilter| f.width_min.into()),
            FilterField::new("width_max")
                .column("width")
                .op(FilterOp::Le)
                .placeholder("width_max")
                .nullable()
                .value(|f: &ImageFilter| f.width_max.into()),
            FilterField::new("filesize_min")
                .column("filesize")
                .op(FilterOp::Ge)
                .placeholder("filesize_min")
                .nullable()
                .value(|f: &ImageFilter| f.filesize_min.into()),
            FilterField::new("filesize_max")
                .column("filesize")
                .op(FilterOp::Le)
                .placeholder("filesize_max")
                .nullable()
                .value(|f: &ImageFilter| f.filesize_max.into()),
            FilterField::new("aesthetic_min")
                .column("aesthetic")
                .op(FilterOp::Ge)
                .placeholder("aesthetic_min")
                .nullable()
                .value(|f: &ImageFilter| f.aesthetic_min.into()),
            FilterField::new("aesthetic_max")
                .column("aesthetic")
                .op(FilterOp::Le)
                .placeholder("aesthetic_max")
                .nullable()
                .value(|f: &ImageFilter| f.aesthetic_max.into()),
            FilterField::new("path_prefix")
                .column("parent_path")
                .op(FilterOp::Like)
                .placeholder("parent_path_prefix")
                .nullable()
                .value(|f: &ImageFilter| like_prefix(&f.path_prefix)),
            FilterField::new("sub_path_prefix")
                .column("sub_path")
                .op(FilterOp::Like)
                .placeholder("sub_path_prefix")
                .nullable()
                .value(|f: &ImageFilter| like_prefix(&f.sub_path_prefix)),
        ]
    }
}

/// 相似度查询的一条结果
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SimilarImage {
    #[serde(flatten)]
    pub record: ImageRecord,
    /// 与目标向量的平方欧氏距离
    pub distance: f32,
}
