use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::db::{Database, crud};
use crate::metrics;
use crate::scoring::{ScoreResult, ScoringService};

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// 结果 ID 无法解析为图片 ID，该结果会被跳过
    #[error("无法解析结果 ID: {0:?}")]
    MalformedId(String),
    #[error("图片 {0} 不存在")]
    MissingImage(i64),
    #[error("保存结果 {id} 失败: {source}")]
    Storage {
        id: i64,
        #[source]
        source: sqlx::Error,
    },
    #[error("获取评分结果失败: {0:#}")]
    Fetch(anyhow::Error),
    #[error("查询未同步的结果失败: {0}")]
    Pending(#[source] sqlx::Error),
}

/// 定期从评分服务拉取已完成的结果并写入数据库
pub struct ResultReconciler<S> {
    db: Database,
    scoring: Arc<S>,
    cooldown: Duration,
    errors: Option<Sender<ReconcileError>>,
}

impl<S> Clone for ResultReconciler<S> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            scoring: self.scoring.clone(),
            cooldown: self.cooldown,
            errors: self.errors.clone(),
        }
    }
}

impl<S: ScoringService> ResultReconciler<S> {
    pub fn new(db: Database, scoring: Arc<S>, cooldown: Duration) -> Self {
        Self { db, scoring, cooldown, errors: None }
    }

    /// 设置错误接收端，不设置时错误只会输出到日志
    pub fn error_sink(mut self, sink: Sender<ReconcileError>) -> Self {
        self.errors = Some(sink);
        self
    }

    /// 拉取一轮结果，返回成功写入的数量
    ///
    /// 单个结果写入失败只会被报告，不会影响其他结果。
    pub async fn reconcile_once(&self) -> Result<usize, ReconcileError> {
        let results = self.scoring.results().await.map_err(ReconcileError::Fetch)?;
        if results.is_empty() {
            return Ok(0);
        }
        debug!("获取到 {} 个评分结果", results.len());

        let mut saved = 0;
        for (id, result) in results {
            match self.save(&id, &result).await {
                Ok(()) => saved += 1,
                Err(e) => self.report(e),
            }
        }
        metrics::inc_reconciled_count(saved);

        Ok(saved)
    }

    async fn save(&self, id: &str, result: &ScoreResult) -> Result<(), ReconcileError> {
        let id = id.parse::<i64>().map_err(|_| ReconcileError::MalformedId(id.to_owned()))?;
        let storage = |source| ReconcileError::Storage { id, source };

        let mut tx = self.db.begin().await.map_err(storage)?;
        if !crud::update_aesthetic(&mut *tx, id, result.aesthetic as f64).await.map_err(storage)? {
            return Err(ReconcileError::MissingImage(id));
        }
        crud::upsert_embedding(&mut *tx, id, &result.embedding).await.map_err(storage)?;
        tx.commit().await.map_err(storage)?;

        Ok(())
    }

    /// 反复同步结果，直到 `ids` 全部有了评分、超时或被取消，返回仍未评分的数量
    ///
    /// 远程队列为空时，最后一批任务可能仍在推理中，结果要稍后才能取到。
    /// 取消后仍会同步一轮已经完成的结果。
    pub async fn drain(
        &self,
        ids: &[i64],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<i64, ReconcileError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Err(e) = self.reconcile_once().await {
                self.report(e);
            }
            let pending =
                crud::count_unscored(&self.db, ids).await.map_err(ReconcileError::Pending)?;
            if pending == 0 || cancel.is_cancelled() || Instant::now() >= deadline {
                return Ok(pending);
            }
            debug!("还有 {} 个结果未同步", pending);
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(self.cooldown) => {}
            }
        }
    }

    /// 持续运行直到被取消
    pub async fn run(self, cancel: CancellationToken) {
        info!("结果同步已启动，间隔 {:?}", self.cooldown);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.cooldown) => {}
            }
            if let Err(e) = self.reconcile_once().await {
                self.report(e);
            }
        }
        info!("结果同步已停止");
    }

    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(cancel))
    }

    fn report(&self, err: ReconcileError) {
        warn!("{}", err);
        if let Some(tx) = &self.errors {
            let _ = tx.send(err);
        }
    }
}
