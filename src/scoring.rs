//! 评分服务客户端
//!
//! 评分服务负责计算图片或文本的向量以及图片的美学评分。
//! 图片通过 `/process` 异步提交，结果从 `/results` 中拉取；`/predict` 为同步接口。

use std::collections::HashMap;
use std::future::Future;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_SERVER: &str = "http://localhost:5000";

/// 提交给评分服务的任务，`image` 与 `text` 二选一
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ScoringTask {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ScoringTask {
    /// 使用图片 ID 作为任务 ID，图片数据以 base64 编码
    pub fn image(id: i64, data: &[u8]) -> Self {
        Self { id: id.to_string(), image: Some(STANDARD.encode(data)), text: None }
    }

    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), image: None, text: Some(text.into()) }
    }
}

/// 评分结果
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ScoreResult {
    pub embedding: Vec<f32>,
    pub aesthetic: f32,
}

#[derive(Deserialize, Debug)]
struct ProcessResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default = "default_accepted")]
    accepted_all: bool,
}

fn default_accepted() -> bool {
    true
}

#[derive(Deserialize, Debug)]
struct QueueResponse {
    q: usize,
}

/// 评分服务接口
pub trait ScoringService: Send + Sync + 'static {
    /// 提交任务到远程队列
    fn process(&self, tasks: &[ScoringTask]) -> impl Future<Output = Result<()>> + Send;
    /// 取出已完成的结果，键为任务 ID
    fn results(&self) -> impl Future<Output = Result<HashMap<String, ScoreResult>>> + Send;
    /// 远程队列中尚未完成的任务数量
    fn queue_size(&self) -> impl Future<Output = Result<usize>> + Send;
    /// 同步计算单个任务
    fn predict(&self, task: &ScoringTask) -> impl Future<Output = Result<ScoreResult>> + Send;
}

#[derive(Debug, Clone)]
pub struct ScoringClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for ScoringClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_SERVER)
    }
}

impl ScoringClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client: reqwest::Client::new(), base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

impl ScoringService for ScoringClient {
    async fn process(&self, tasks: &[ScoringTask]) -> Result<()> {
        let resp = self
            .client
            .post(self.url("process"))
            .json(tasks)
            .send()
            .await
            .context("提交任务失败")?
            .error_for_status()?
            .json::<ProcessResponse>()
            .await?;

        debug!("提交 {} 个任务: {}", resp.ids.len(), resp.message);
        if !resp.accepted_all {
            warn!("部分任务未被接受: {}", resp.message);
        }
        Ok(())
    }

    async fn results(&self) -> Result<HashMap<String, ScoreResult>> {
        let resp = self
            .client
            .get(self.url("results"))
            .send()
            .await
            .context("获取结果失败")?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp)
    }

    async fn queue_size(&self) -> Result<usize> {
        let resp = self
            .client
            .get(self.url("q"))
            .send()
            .await
            .context("获取队列长度失败")?
            .error_for_status()?
            .json::<QueueResponse>()
            .await?;
        Ok(resp.q)
    }

    async fn predict(&self, task: &ScoringTask) -> Result<ScoreResult> {
        let resp = self
            .client
            .post(self.url("predict"))
            .json(task)
            .send()
            .await
            .context("同步评分失败")?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp)
    }
}
