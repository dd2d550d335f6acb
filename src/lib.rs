//! Library exports for the PHOENIX metadata tracker pipeline.
/// Application directory helpers.
pub mod app_dirs;
/// File catalog: metadata extraction, crawling, summaries, delta reports.
pub mod catalog;
/// Configuration file loading.
pub mod config;
/// Logging setup.
pub mod logging;
/// Outbound notification sinks.
pub mod notify;
/// Daily pipeline orchestration.
pub mod pipeline;

pub(crate) mod http_client;
