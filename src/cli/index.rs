use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use indicatif::ProgressBar;
use log::{debug, info, warn};
use tokio::task::block_in_place;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::ImageDB;
use crate::cli::{SubCommandExtend, pb_style};
use crate::config::{IndexOptions, Opts, ScoringOptions};
use crate::metrics;
use crate::pipeline::{ImageProcessor, PipelineOptions, ResultReconciler};
use crate::scoring::{ScoringClient, ScoringService};
use crate::walk::ArchiveWalker;

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    #[command(flatten)]
    pub index: IndexOptions,
    #[command(flatten)]
    pub scoring: ScoringOptions,
    /// 集合 ID
    pub collection: i64,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
}

impl SubCommandExtend for IndexCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = ImageDB::open(opts.conf_dir.clone()).await?;
        let collection = db.collection(self.collection).await?;
        let scoring = Arc::new(ScoringClient::new(&self.scoring.api_server));
        let options = PipelineOptions::from(&self.index);

        if let Some(url) = self.prometheus_push.clone() {
            let instance =
                self.prometheus_instance.clone().unwrap_or_else(|| format!("collection-{}", collection.id));
            tokio::spawn(metrics::push_loop(url, instance));
        }

        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("收到中断信号，正在停止");
                    cancel.cancel();
                }
            }
        });

        // 结果同步独立于遍历停止
        let reconcile_cancel = CancellationToken::new();
        let reconciler = (!options.sync_scoring).then(|| {
            ResultReconciler::new(db.database().clone(), scoring.clone(), options.cooldown)
        });
        let reconcile_task = reconciler.as_ref().map(|r| r.spawn(reconcile_cancel.clone()));

        let pb = ProgressBar::no_length().with_style(pb_style());
        let processor = ImageProcessor::new(
            collection.clone(),
            db.database_path(),
            scoring.clone(),
            options.clone(),
            cancel.clone(),
        )?
        .progress(pb.clone());

        let (err_tx, err_rx) = crossbeam_channel::unbounded();
        let walker = ArchiveWalker::new(self.index.workers)
            .archives(self.index.archives.iter().copied())
            .error_sink(err_tx);
        let root = PathBuf::from(&collection.directory);

        info!("开始索引集合 {}: {}，工作线程 {}", collection.id, root.display(), walker.workers());
        let errors = block_in_place(|| {
            thread::scope(|s| {
                let printer = s.spawn(|| {
                    let mut count = 0;
                    for err in err_rx.iter() {
                        pb.println(format!("{err}"));
                        count += 1;
                    }
                    count
                });
                walker.walk(&root, &cancel, &processor);
                // 关闭错误通道，让输出线程退出
                drop(walker);
                printer.join().unwrap_or(0)
            })
        });

        if let Some(reconciler) = &reconciler {
            if !cancel.is_cancelled() {
                pb.set_message("等待评分服务处理剩余任务");
                wait_drain(&*scoring, options.cooldown, &cancel).await;
            }
            reconcile_cancel.cancel();
            if let Some(task) = reconcile_task {
                task.await?;
            }
            // 队列为空时最后一批任务可能还在推理，继续同步直到本次提交的结果全部写入
            let submitted = processor.submitted();
            let pending = reconciler.drain(&submitted, options.drain_timeout, &cancel).await?;
            if pending > 0 {
                warn!("{} 张图片的评分结果未能同步，下次索引时会重新提交", pending);
            } else {
                debug!("本次提交的 {} 个结果已全部同步", submitted.len());
            }
        }

        pb.finish_with_message(format!("索引完成，错误 {} 个", errors));

        Ok(())
    }
}

/// 等待远程队列清空，取消或探测失败时提前返回
async fn wait_drain<S: ScoringService>(scoring: &S, cooldown: Duration, cancel: &CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match scoring.queue_size().await {
            Ok(0) => return,
            Ok(size) => debug!("远程队列剩余 {} 个任务", size),
            Err(e) => {
                warn!("获取远程队列长度失败: {e:#}");
                return;
            }
        }
        sleep(cooldown).await;
    }
}
