//! 索引流水线
//!
//! [`ImageProcessor`] 作为遍历器的处理函数运行在工作线程上：按路径去重、解码缩放、
//! 提交评分。评分服务异步返回的结果由 [`ResultReconciler`] 写回数据库。

mod reconciler;
pub mod transform;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{debug, warn};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

pub use reconciler::{ReconcileError, ResultReconciler};

use crate::config::IndexOptions;
use crate::db::{self, Collection, Database, NewImage, crud};
use crate::metrics;
use crate::scoring::{ScoringService, ScoringTask};
use crate::sync::{CoalescingProbe, ResourceAffinityPool};
use crate::walk::{FileHandler, VirtualFile};

/// 流水线参数
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// 图片最大边长，超过时等比缩小
    pub max_size: u32,
    /// 远程队列长度上限，超过时暂停提交
    pub max_queue: usize,
    /// 队列长度探测的冷却时间，同时也是暂停提交时的等待时间
    pub cooldown: Duration,
    /// 使用同步接口评分，不经过远程队列
    pub sync_scoring: bool,
    /// 遍历结束后等待剩余评分结果的最长时间
    pub drain_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_size: 336,
            max_queue: 96,
            cooldown: Duration::from_millis(250),
            sync_scoring: false,
            drain_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&IndexOptions> for PipelineOptions {
    fn from(opts: &IndexOptions) -> Self {
        Self {
            max_size: opts.max_size,
            max_queue: opts.max_queue,
            cooldown: Duration::from_millis(opts.cooldown_ms),
            sync_scoring: opts.sync_scoring,
            drain_timeout: Duration::from_secs(opts.drain_timeout_secs),
        }
    }
}

/// 单个条目的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Indexed,
    Skipped,
    Unsupported,
    Cancelled,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Indexed => "indexed",
            Self::Skipped => "skipped",
            Self::Unsupported => "unsupported",
            Self::Cancelled => "cancelled",
        }
    }
}

pub struct ImageProcessor<S> {
    collection: Collection,
    root: PathBuf,
    storage: ResourceAffinityPool<Database>,
    scoring: Arc<S>,
    queue: CoalescingProbe<usize>,
    handle: Handle,
    options: PipelineOptions,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
    submitted: Mutex<Vec<i64>>,
}

impl<S: ScoringService> ImageProcessor<S> {
    /// 创建处理函数，必须在 tokio 运行时中调用
    ///
    /// 每个工作线程会从 `database` 打开一个独占的连接，数据库必须已经完成迁移。
    pub fn new(
        collection: Collection,
        database: impl Into<PathBuf>,
        scoring: Arc<S>,
        options: PipelineOptions,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let handle = Handle::try_current().context("需要在 tokio 运行时中创建")?;
        let database = database.into();

        let storage = {
            let handle = handle.clone();
            ResourceAffinityPool::new(move || {
                let _guard = handle.enter();
                db::connect_single(&database)
            })
        };

        let queue = {
            let handle = handle.clone();
            let scoring = scoring.clone();
            CoalescingProbe::new(
                move || match handle.block_on(scoring.queue_size()) {
                    Ok(size) => size,
                    Err(e) => {
                        warn!("获取远程队列长度失败: {e:#}");
                        0
                    }
                },
                options.cooldown,
            )
        };

        Ok(Self {
            root: PathBuf::from(&collection.directory),
            collection,
            storage,
            scoring,
            queue,
            handle,
            options,
            cancel,
            progress: None,
            submitted: Mutex::new(vec![]),
        })
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    /// 本次提交到远程队列、结果尚需同步的图片 ID
    pub fn submitted(&self) -> Vec<i64> {
        self.submitted.lock().map(|ids| ids.clone()).unwrap_or_default()
    }

    fn process(&self, file: &mut VirtualFile<'_>) -> Result<Outcome> {
        if !transform::is_supported(file.extension().as_deref()) {
            return Ok(Outcome::Unsupported);
        }

        let (parent_path, sub_path) =
            transform::split_path(&self.root, file.real_path, file.virtual_path);
        let db = self.storage.get_resource(file.worker);

        let existing = self.handle.block_on(crud::find_image(
            &*db,
            self.collection.id,
            &parent_path,
            &sub_path,
        ))?;
        if existing.is_some_and(|record| record.aesthetic.is_some()) {
            debug!("跳过已评分图片: {}/{}", parent_path, sub_path);
            return Ok(Outcome::Skipped);
        }

        if let Some(pb) = &self.progress {
            pb.set_message(format!("{}/{}", parent_path, sub_path));
        }

        let data = file.read_all().context("读取文件失败")?;
        let image = transform::prepare(&data, self.options.max_size).context("解码图片失败")?;

        let mut record = NewImage {
            basedir_id: self.collection.id,
            parent_path,
            sub_path,
            width: image.width as i64,
            height: image.height as i64,
            filesize: file.meta.size as i64,
            aesthetic: None,
        };

        if self.options.sync_scoring {
            let score = self.handle.block_on(self.scoring.predict(&ScoringTask::image(0, &image.png)))?;
            record.aesthetic = Some(score.aesthetic as f64);
            self.handle.block_on(async {
                let mut tx = db.begin().await?;
                let id = crud::upsert_image(&mut *tx, &record).await?;
                crud::upsert_embedding(&mut *tx, id, &score.embedding).await?;
                tx.commit().await
            })?;
        } else {
            if !self.wait_queue() {
                return Ok(Outcome::Cancelled);
            }
            let id = self.handle.block_on(crud::upsert_image(&*db, &record))?;
            self.handle.block_on(self.scoring.process(&[ScoringTask::image(id, &image.png)]))?;
            if let Ok(mut submitted) = self.submitted.lock() {
                submitted.push(id);
            }
        }

        Ok(Outcome::Indexed)
    }

    /// 远程队列过长时等待，返回 false 表示等待期间被取消
    fn wait_queue(&self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let size = self.queue.call();
            if size <= self.options.max_queue {
                return true;
            }
            debug!("远程队列长度 {} 超过上限 {}，等待中", size, self.options.max_queue);
            metrics::inc_backpressure_wait();
            thread::sleep(self.queue.cooldown());
        }
    }
}

impl<S: ScoringService> FileHandler for ImageProcessor<S> {
    fn handle(&self, mut file: VirtualFile<'_>) -> Result<()> {
        let result = self.process(&mut file);

        match &result {
            Ok(outcome) => metrics::inc_entry_count(outcome.as_str()),
            Err(_) => metrics::inc_entry_count("failed"),
        }
        if let Some(pb) = &self.progress {
            pb.inc(1);
        }

        result.map(|_| ())
    }
}
