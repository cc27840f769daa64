use std::path::Path;

use log::info;
use sqlx::{SqlitePool, sqlite::*};
use thiserror::Error;

pub mod crud;
pub mod knn;
pub mod model;

pub use model::*;

pub type Database = SqlitePool;

/// 查询参数错误
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("limit 必须大于 0，实际为 {0}")]
    InvalidLimit(i64),
    #[error("至少需要指定一个集合")]
    NoCollections,
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
}

fn connect_options(filename: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .filename(filename)
        .create_if_missing(true)
}

/// 打开数据库并执行迁移
pub async fn init_db(filename: impl AsRef<Path>) -> Result<Database, sqlx::Error> {
    let filename = filename.as_ref();
    info!("初始化数据库连接: {}", filename.display());

    let pool = SqlitePool::connect_with(connect_options(filename)).await?;

    info!("检查数据库迁移");
    sqlx::migrate!().run(&pool).await?;

    Ok(pool)
}

/// 创建只有一个连接的连接池，连接在第一次使用时才建立
///
/// 用于给每个工作线程分配独占的连接，调用前数据库必须已经通过 [`init_db`] 完成迁移。
/// 必须在 tokio 运行时上下文中调用。
pub fn connect_single(filename: impl AsRef<Path>) -> Database {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_lazy_with(connect_options(filename.as_ref()))
}
