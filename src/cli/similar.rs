use anyhow::anyhow;
use clap::Parser;

use super::search::print_result;
use crate::ImageDB;
use crate::cli::SubCommandExtend;
use crate::config::{Opts, QueryOptions, ScoringOptions};
use crate::scoring::{ScoringClient, ScoringService, ScoringTask};

#[derive(Parser, Debug, Clone)]
pub struct SimilarCommand {
    #[command(flatten)]
    pub query: QueryOptions,
    #[command(flatten)]
    pub scoring: ScoringOptions,
    /// 使用已索引图片的向量作为查询目标
    #[arg(long, value_name = "IMAGE_ID", conflicts_with = "text", required_unless_present = "text")]
    pub id: Option<i64>,
    /// 使用文本的向量作为查询目标，需要评分服务
    #[arg(long)]
    pub text: Option<String>,
}

impl SubCommandExtend for SimilarCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = ImageDB::open(opts.conf_dir.clone()).await?;

        let target = match (&self.id, &self.text) {
            (Some(id), _) => {
                db.embedding(*id).await?.ok_or_else(|| anyhow!("图片 {} 还没有向量", id))?
            }
            (None, Some(text)) => {
                let client = ScoringClient::new(&self.scoring.api_server);
                client.predict(&ScoringTask::text("query", text.as_str())).await?.embedding
            }
            (None, None) => return Err(anyhow!("需要指定 --id 或 --text")),
        };

        let result = db.similar(&self.query.filter(), &target, self.query.limit).await?;
        let roots = db.roots().await?;

        let rows = result.iter().map(|r| (Some(r.distance), &r.record)).collect::<Vec<_>>();
        print_result(&rows, &roots, self.query.output_format)
    }
}
