use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use crate::ImageDB;
use crate::cli::SubCommandExtend;
use crate::config::{Opts, OutputFormat, QueryOptions};
use crate::db::ImageRecord;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub query: QueryOptions,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = ImageDB::open(opts.conf_dir.clone()).await?;
        let records = db
            .search(&self.query.filter(), self.query.order, self.query.limit, self.query.offset)
            .await?;
        let roots = db.roots().await?;

        let rows = records.iter().map(|record| (None, record)).collect::<Vec<_>>();
        print_result(&rows, &roots, self.query.output_format)
    }
}

#[derive(Serialize)]
struct ResultRow<'a> {
    #[serde(flatten)]
    record: &'a ImageRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance: Option<f32>,
    path: PathBuf,
}

/// 输出查询结果，路径会拼接上集合根目录
pub(super) fn print_result(
    result: &[(Option<f32>, &ImageRecord)],
    roots: &HashMap<i64, String>,
    format: OutputFormat,
) -> Result<()> {
    let rows = result
        .iter()
        .map(|&(distance, record)| {
            let root = roots.get(&record.basedir_id).map(String::as_str).unwrap_or_default();
            ResultRow { record, distance, path: record.display_path(root) }
        })
        .collect::<Vec<_>>();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows)?)
        }
        OutputFormat::Table => {
            for row in rows {
                let aesthetic =
                    row.record.aesthetic.map(|a| format!("{a:.2}")).unwrap_or_else(|| "-".into());
                match row.distance {
                    Some(d) => println!("{:.4}\t{}\t{}", d, aesthetic, row.path.display()),
                    None => println!("{}\t{}\t{}", row.record.id, aesthetic, row.path.display()),
                }
            }
        }
    }
    Ok(())
}
