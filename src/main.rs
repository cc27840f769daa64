use clap::Parser;

use imagedb::cli::SubCommandExtend;
use imagedb::config::{Opts, SubCommand};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Collection(config) => config.run(&opts).await,
        SubCommand::Index(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Similar(config) => config.run(&opts).await,
    }
}
