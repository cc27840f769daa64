use std::sync::LazyLock;
use std::time::Duration;

use log::error;
use prometheus::*;
use tokio::task::spawn_blocking;
use tokio::time::sleep;

static METRIC_ENTRY_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "imagedb_entry_count",
        "count of the handled entries by outcome",
        &["outcome"]
    )
    .unwrap()
});

static METRIC_BACKPRESSURE_WAIT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "imagedb_backpressure_wait",
        "count of the sleeps caused by a full scoring queue"
    )
    .unwrap()
});

static METRIC_RECONCILED_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("imagedb_reconciled_count", "count of the persisted scoring results")
        .unwrap()
});

/// 按处理结果计数，`outcome` 为 indexed / skipped / unsupported / cancelled / failed
pub fn inc_entry_count(outcome: &str) {
    METRIC_ENTRY_COUNT.with_label_values(&[outcome]).inc();
}

pub fn inc_backpressure_wait() {
    METRIC_BACKPRESSURE_WAIT.inc();
}

pub fn inc_reconciled_count(n: usize) {
    METRIC_RECONCILED_COUNT.inc_by(n as u64);
}

/// 每隔 30 秒把所有指标推送到 pushgateway
pub async fn push_loop(url: String, instance: String) {
    loop {
        let metric_families = prometheus::gather();
        let url = url.clone();
        let instance = instance.clone();
        let r = spawn_blocking(move || {
            prometheus::push_metrics(
                "imagedb",
                labels! {
                    "instance".to_string() => instance,
                },
                &url,
                metric_families,
                None,
            )
        })
        .await;
        match r {
            Ok(Err(e)) => error!("推送指标失败: {e}"),
            Err(e) => error!("推送指标失败: {e}"),
            Ok(Ok(())) => {}
        }
        sleep(Duration::from_secs(30)).await;
    }
}
