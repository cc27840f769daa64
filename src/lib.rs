pub mod cli;
pub mod config;
pub mod db;
pub mod filter;
pub mod imagedb;
mod metrics;
pub mod pipeline;
pub mod scoring;
pub mod sync;
pub mod walk;

pub use config::Opts;
pub use imagedb::ImageDB;
