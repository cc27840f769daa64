use log::debug;
use sqlx::SqlitePool;

use super::crud::{bind_args, blob_to_embedding, compile_filter};
use super::{ImageFilter, ImageRecord, QueryError, SimilarImage};
use crate::filter::FilterCompiler;

/// 平方欧氏距离
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// 返回距离 `target` 最近的 k 个候选，按距离升序，距离相同时保持输入顺序
pub fn top_k<I, T>(target: &[f32], candidates: I, k: usize) -> Vec<(T, f32)>
where
    I: IntoIterator<Item = (T, Vec<f32>)>,
{
    // 维护一个长度不超过 k 的升序数组
    let mut best: Vec<(T, f32)> = Vec::with_capacity(k + 1);
    if k == 0 {
        return best;
    }
    for (item, vector) in candidates {
        if vector.len() != target.len() {
            continue;
        }
        let d = squared_l2(target, &vector);
        if best.len() == k && d >= best[k - 1].1 {
            continue;
        }
        let pos = best.partition_point(|(_, x)| *x <= d);
        best.insert(pos, (item, d));
        best.truncate(k);
    }
    best
}

#[derive(sqlx::FromRow)]
struct CandidateRow {
    #[sqlx(flatten)]
    record: ImageRecord,
    embedding: Vec<u8>,
}

/// 在通过过滤条件的图片中查找与 `target` 最相似的 `limit` 张
pub async fn match_embeddings(
    executor: &SqlitePool,
    compiler: &FilterCompiler<ImageFilter>,
    filter: &ImageFilter,
    target: &[f32],
    limit: i64,
) -> Result<Vec<SimilarImage>, QueryError> {
    if limit <= 0 {
        return Err(QueryError::InvalidLimit(limit));
    }
    let predicate = compile_filter(compiler, filter)?;

    let sql = format!(
        r#"
        SELECT images.*, embeddings.embedding FROM images
        JOIN embeddings ON embeddings.id = images.id
        {}
        "#,
        predicate.where_clause()
    );
    let rows = bind_args(sqlx::query_as::<_, CandidateRow>(&sql), &predicate.args)
        .fetch_all(executor)
        .await?;
    debug!("候选图片数量: {}", rows.len());

    let candidates = rows.into_iter().map(|row| (row.record, blob_to_embedding(&row.embedding)));
    let result = top_k(target, candidates, limit as usize)
        .into_iter()
        .map(|(record, distance)| SimilarImage { record, distance })
        .collect();

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squared_l2() {
        assert_eq!(squared_l2(&[0., 0.], &[3., 4.]), 25.);
        assert_eq!(squared_l2(&[1., 2., 3.], &[1., 2., 3.]), 0.);
    }

    #[test]
    fn test_top_k() {
        let candidates = vec![
            (1, vec![5., 0.]),
            (2, vec![1., 0.]),
            (3, vec![3., 0.]),
            (4, vec![0., 0.]),
            (5, vec![2., 0.]),
        ];
        let result = top_k(&[0., 0.], candidates, 3);
        assert_eq!(result, vec![(4, 0.), (2, 1.), (5, 4.)]);
    }

    #[test]
    fn test_top_k_fewer_than_k() {
        let result = top_k(&[0.], vec![(1, vec![2.]), (2, vec![1.])], 10);
        assert_eq!(result, vec![(2, 1.), (1, 4.)]);
    }

    #[test]
    fn test_top_k_ties_and_dimension_mismatch() {
        let candidates = vec![(1, vec![1., 0.]), (2, vec![1.]), (3, vec![0., 1.])];
        let result = top_k(&[0., 0.], candidates, 2);
        assert_eq!(result, vec![(1, 1.), (3, 1.)]);
        assert!(top_k(&[0.], vec![(1, vec![0.])], 0).is_empty());
    }
}
