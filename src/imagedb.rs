use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use log::info;

use crate::config::ConfDir;
use crate::db::{self, Collection, Database, ImageFilter, ImageRecord, QueryError, SimilarImage};
use crate::db::{SortOrder, crud, knn};
use crate::filter::FilterCompiler;

/// 图片数据库，负责集合管理和查询
pub struct ImageDB {
    conf_dir: ConfDir,
    db: Database,
    compiler: FilterCompiler<ImageFilter>,
}

impl ImageDB {
    /// 打开配置目录下的数据库，不存在时创建
    pub async fn open(conf_dir: ConfDir) -> Result<Self> {
        std::fs::create_dir_all(conf_dir.path())
            .with_context(|| format!("无法创建配置目录: {}", conf_dir.path().display()))?;
        let db = db::init_db(conf_dir.database()).await?;
        let compiler = FilterCompiler::build()?;
        Ok(Self { conf_dir, db, compiler })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// 数据库文件路径，工作线程使用它打开各自的连接
    pub fn database_path(&self) -> PathBuf {
        self.conf_dir.database()
    }

    /// 添加集合，路径会被规范化为绝对路径
    pub async fn add_collection(&self, directory: impl AsRef<Path>) -> Result<Collection> {
        let directory = directory.as_ref();
        let directory = directory
            .canonicalize()
            .with_context(|| format!("无法访问目录: {}", directory.display()))?;
        if !directory.is_dir() {
            bail!("不是目录: {}", directory.display());
        }
        let directory = directory.to_string_lossy().into_owned();

        let id = crud::add_collection(&self.db, &directory).await?;
        info!("添加集合 {}: {}", id, directory);
        Ok(Collection { id, directory })
    }

    pub async fn collections(&self) -> Result<Vec<Collection>> {
        Ok(crud::list_collections(&self.db).await?)
    }

    pub async fn collection(&self, id: i64) -> Result<Collection> {
        crud::get_collection(&self.db, id).await?.ok_or_else(|| anyhow!("集合 {} 不存在", id))
    }

    /// 删除集合及其下的所有图片和向量
    pub async fn delete_collection(&self, id: i64) -> Result<()> {
        crud::delete_collection(&self.db, id).await?;
        info!("删除集合 {}", id);
        Ok(())
    }

    /// 集合 ID 到根目录的映射，用于显示完整路径
    pub async fn roots(&self) -> Result<HashMap<i64, String>> {
        let collections = self.collections().await?;
        Ok(collections.into_iter().map(|c| (c.id, c.directory)).collect())
    }

    pub async fn search(
        &self,
        filter: &ImageFilter,
        order: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImageRecord>, QueryError> {
        crud::read_images(&self.db, &self.compiler, filter, order, limit, offset).await
    }

    pub async fn similar(
        &self,
        filter: &ImageFilter,
        target: &[f32],
        limit: i64,
    ) -> Result<Vec<SimilarImage>, QueryError> {
        knn::match_embeddings(&self.db, &self.compiler, filter, target, limit).await
    }

    /// 读取图片的向量
    pub async fn embedding(&self, id: i64) -> Result<Option<Vec<f32>>> {
        Ok(crud::read_embedding(&self.db, id).await?)
    }
}
