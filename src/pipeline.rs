//! Daily pipeline orchestration: crawl, then summarize, then report.
//!
//! The external scheduler triggers one run per day. A failing step is
//! logged and does not block the steps after it; the summarizer can still
//! aggregate yesterday's rows when today's crawl partially failed, and the
//! reporter works off whatever snapshots exist.

use std::path::PathBuf;

use time::Date;
use tracing::{error, info};

use crate::catalog::{
    CatalogDb, ConventionScheme, CrawlStats, ReportOutcome, SummarizeOutcome, crawl, format_date,
    report, summarize,
};
use crate::config::TrackerConfig;
use crate::notify::Notify;

/// What each step of a daily run produced, for logging and tests.
#[derive(Debug, Default)]
pub struct DailyRunOutcome {
    /// Stats per successfully crawled root.
    pub crawled: Vec<(PathBuf, CrawlStats)>,
    /// Roots whose crawl failed outright.
    pub crawl_failures: usize,
    /// Summarize result, if the step completed.
    pub summarize: Option<SummarizeOutcome>,
    /// Report result, if the step completed.
    pub report: Option<ReportOutcome>,
}

/// Execute one scheduled run against an already-open catalog.
pub fn run_daily(
    db: &CatalogDb,
    config: &TrackerConfig,
    scheme: &ConventionScheme,
    date: Date,
    notifier: &dyn Notify,
) -> DailyRunOutcome {
    let mut outcome = DailyRunOutcome::default();

    for root in &config.data_roots {
        match crawl(db, root, scheme) {
            Ok(stats) => {
                info!(
                    root = %root.display(),
                    added = stats.added,
                    updated = stats.updated,
                    unchanged = stats.unchanged,
                    skipped = stats.skipped,
                    "Crawl finished"
                );
                outcome.crawled.push((root.clone(), stats));
            }
            Err(err) => {
                error!(root = %root.display(), error = %err, "Crawl failed");
                outcome.crawl_failures += 1;
            }
        }
    }

    match summarize(db, date) {
        Ok(result) => outcome.summarize = Some(result),
        Err(err) => {
            error!(date = %format_date(date), error = %err, "Summarize failed");
        }
    }

    let prior = match db.latest_snapshot_date_before(date) {
        Ok(prior) => prior,
        Err(err) => {
            error!(error = %err, "Could not determine prior snapshot date");
            None
        }
    };
    match report(db, date, prior, notifier) {
        Ok(result) => outcome.report = Some(result),
        Err(err) => {
            error!(date = %format_date(date), error = %err, "Report failed");
        }
    }

    outcome
}
