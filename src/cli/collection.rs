use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::ImageDB;
use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct CollectionCommand {
    #[command(subcommand)]
    pub action: CollectionAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CollectionAction {
    /// 添加一个目录作为集合
    Add {
        /// 集合根目录
        path: PathBuf,
    },
    /// 列出所有集合
    List,
    /// 删除集合以及其下所有图片记录
    Delete {
        /// 集合 ID
        id: i64,
    },
}

impl SubCommandExtend for CollectionCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = ImageDB::open(opts.conf_dir.clone()).await?;

        match &self.action {
            CollectionAction::Add { path } => {
                let collection = db.add_collection(path).await?;
                println!("{}\t{}", collection.id, collection.directory);
            }
            CollectionAction::List => {
                for collection in db.collections().await? {
                    println!("{}\t{}", collection.id, collection.directory);
                }
            }
            CollectionAction::Delete { id } => {
                db.collection(*id).await?;
                db.delete_collection(*id).await?;
                println!("已删除集合 {}", id);
            }
        }

        Ok(())
    }
}
