use anyhow::anyhow;
use log::{debug, warn};
use sqlx::query::QueryAs;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Executor, Result, Sqlite, SqlitePool};

use super::{Collection, ImageFilter, ImageRecord, NewImage, QueryError, SortOrder};
use crate::filter::{FilterCompiler, Predicate, SqlArg};

/// 按顺序绑定编译后的过滤参数
pub(super) fn bind_args<'q, O>(
    mut query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    args: &[SqlArg],
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlArg::Null => query.bind(None::<i64>),
            SqlArg::Int(v) => query.bind(*v),
            SqlArg::Float(v) => query.bind(*v),
            SqlArg::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

/// 编译过滤条件，集合列表不能为空
pub(super) fn compile_filter(
    compiler: &FilterCompiler<ImageFilter>,
    filter: &ImageFilter,
) -> std::result::Result<Predicate, QueryError> {
    if filter.collections.is_empty() {
        return Err(QueryError::NoCollections);
    }
    let predicate = compiler.compile(filter);
    debug!("过滤条件: {} {:?}", predicate.sql, predicate.placeholders);
    Ok(predicate)
}

/// 向量以 f32 数组的原始字节存储
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(embedding).to_vec()
}

pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    bytemuck::pod_collect_to_vec(blob)
}

/// 添加集合，目录已存在时返回已有的 ID
pub async fn add_collection<'c, E>(executor: E, directory: &str) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO basedir (directory) VALUES (?)
        ON CONFLICT (directory) DO UPDATE SET directory = excluded.directory
        RETURNING id
        "#,
    )
    .bind(directory)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

pub async fn list_collections(executor: &SqlitePool) -> Result<Vec<Collection>> {
    sqlx::query_as("SELECT id, directory FROM basedir ORDER BY id").fetch_all(executor).await
}

pub async fn get_collection(executor: &SqlitePool, id: i64) -> Result<Option<Collection>> {
    sqlx::query_as("SELECT id, directory FROM basedir WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// 删除集合及其下的所有图片和向量
///
/// 三条删除语句都会执行，任何一条失败都会在最后一起报告。
pub async fn delete_collection(executor: &SqlitePool, id: i64) -> anyhow::Result<()> {
    let statements = [
        "DELETE FROM embeddings WHERE id IN (SELECT id FROM images WHERE basedir_id = ?)",
        "DELETE FROM images WHERE basedir_id = ?",
        "DELETE FROM basedir WHERE id = ?",
    ];

    let mut errors = vec![];
    for sql in statements {
        if let Err(e) = sqlx::query(sql).bind(id).execute(executor).await {
            warn!("删除集合 {} 失败: {}", id, e);
            errors.push(e.to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("删除集合 {} 时发生 {} 个错误: {}", id, errors.len(), errors.join("; ")))
    }
}

/// 根据路径查找图片
pub async fn find_image<'c, E>(
    executor: E,
    basedir_id: i64,
    parent_path: &str,
    sub_path: &str,
) -> Result<Option<ImageRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT * FROM images
        WHERE basedir_id = ? AND parent_path = ? AND sub_path = ?
        "#,
    )
    .bind(basedir_id)
    .bind(parent_path)
    .bind(sub_path)
    .fetch_optional(executor)
    .await
}

pub async fn get_image<'c, E>(executor: E, id: i64) -> Result<Option<ImageRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM images WHERE id = ?").bind(id).fetch_optional(executor).await
}

/// 插入或更新图片，返回图片 ID
///
/// 已存在的图片保持原有 ID，新的评分为空时保留原有评分。
pub async fn upsert_image<'c, E>(executor: E, image: &NewImage) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO images (basedir_id, parent_path, sub_path, aesthetic, width, height, filesize)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (basedir_id, parent_path, sub_path) DO UPDATE SET
            aesthetic = COALESCE(excluded.aesthetic, images.aesthetic),
            width = excluded.width,
            height = excluded.height,
            filesize = excluded.filesize
        RETURNING id
        "#,
    )
    .bind(image.basedir_id)
    .bind(&image.parent_path)
    .bind(&image.sub_path)
    .bind(image.aesthetic)
    .bind(image.width)
    .bind(image.height)
    .bind(image.filesize)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

/// 插入或替换向量
pub async fn upsert_embedding<'c, E>(executor: E, id: i64, embedding: &[f32]) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO embeddings (id, embedding) VALUES (?, ?)
        ON CONFLICT (id) DO UPDATE SET embedding = excluded.embedding
        "#,
    )
    .bind(id)
    .bind(embedding_to_blob(embedding))
    .execute(executor)
    .await?;

    Ok(())
}

/// 更新美学评分，返回图片是否存在
pub async fn update_aesthetic<'c, E>(executor: E, id: i64, aesthetic: f64) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE images SET aesthetic = ? WHERE id = ?")
        .bind(aesthetic)
        .bind(id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn read_embedding<'c, E>(executor: E, id: i64) -> Result<Option<Vec<f32>>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT embedding FROM embeddings WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(|(blob,)| blob_to_embedding(&blob)))
}

pub async fn count_images(executor: &SqlitePool, basedir_id: i64) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM images WHERE basedir_id = ?")
        .bind(basedir_id)
        .fetch_one(executor)
        .await?;
    Ok(count)
}

/// 统计集合中已有向量的图片数量
/// `ids` 中还没有评分结果的图片数量，已经被删除的图片不计入
pub async fn count_unscored<'c, E>(executor: E, ids: &[i64]) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let ids = serde_json::to_string(ids).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM images
        WHERE id IN (SELECT value FROM json_each(?)) AND aesthetic IS NULL
        "#,
    )
    .bind(ids)
    .fetch_one(executor)
    .await?;
    Ok(count)
}

pub async fn count_embeddings(executor: &SqlitePool, basedir_id: i64) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM embeddings
        WHERE id IN (SELECT id FROM images WHERE basedir_id = ?)
        "#,
    )
    .bind(basedir_id)
    .fetch_one(executor)
    .await?;
    Ok(count)
}

/// 按过滤条件分页列出图片
pub async fn read_images(
    executor: &SqlitePool,
    compiler: &FilterCompiler<ImageFilter>,
    filter: &ImageFilter,
    order: SortOrder,
    limit: i64,
    offset: i64,
) -> std::result::Result<Vec<ImageRecord>, QueryError> {
    if limit <= 0 {
        return Err(QueryError::InvalidLimit(limit));
    }
    let predicate = compile_filter(compiler, filter)?;

    let sql = format!(
        "SELECT * FROM images {} {} LIMIT ? OFFSET ?",
        predicate.where_clause(),
        order.as_sql()
    );
    let query = bind_args(sqlx::query_as::<_, ImageRecord>(&sql), &predicate.args);
    let records = query.bind(limit).bind(offset.max(0)).fetch_all(executor).await?;

    Ok(records)
}
