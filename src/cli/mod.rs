mod collection;
mod index;
mod search;
mod similar;

pub use collection::*;
pub use index::*;
pub use search::*;
pub use similar::*;

use indicatif::ProgressStyle;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {spinner} {pos} {per_sec} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
