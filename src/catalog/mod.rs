//! File catalog for the PHOENIX tree.
//!
//! The daily pipeline runs through this module in order: `crawler` syncs
//! file metadata into the store, `summarizer` freezes a dated snapshot of
//! per-group totals, and `reporter` diffs two snapshots into a message for
//! the notification sink. `extractor` is the pure path-to-metadata step
//! shared by the crawler; `db` owns all persistence.

pub mod crawler;
pub mod db;
pub mod extractor;
pub mod reporter;
pub mod summarizer;

pub use crawler::{CrawlError, CrawlStats, crawl, normalize_path};
pub use db::{
    CatalogDb, CatalogError, CatalogWriteBatch, FileRecord, GroupKind, SnapshotRow, format_date,
    parse_snapshot_date,
};
pub use extractor::{ConventionError, ConventionScheme, PathFields, UNKNOWN, file_type_of};
pub use reporter::{ReportError, ReportOutcome, report};
pub use summarizer::{SummarizeError, SummarizeOutcome, summarize};
