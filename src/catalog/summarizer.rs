use thiserror::Error;
use time::Date;
use tracing::info;

use super::db::{CatalogDb, CatalogError, GroupKind, SnapshotRow, format_date};

/// Result of a summarize run for one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummarizeOutcome {
    /// Snapshot rows were written for the date.
    Written(Vec<SnapshotRow>),
    /// A snapshot for the date already existed; nothing was written.
    AlreadySummarized,
}

/// Errors that abort a summarize run.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("Database error: {0}")]
    Db(#[from] CatalogError),
}

/// Aggregate the current catalog into one dated snapshot.
///
/// Groups by modality and by cohort (network/study/subject) and writes one
/// row per group. Re-running for an already-summarized date is a no-op.
pub fn summarize(db: &CatalogDb, date: Date) -> Result<SummarizeOutcome, SummarizeError> {
    if db.has_snapshot(date)? {
        info!(date = %format_date(date), "Snapshot already exists; skipping summarize");
        return Ok(SummarizeOutcome::AlreadySummarized);
    }

    let mut rows = db.aggregate(date, GroupKind::Modality)?;
    rows.extend(db.aggregate(date, GroupKind::Cohort)?);

    match db.write_snapshot(date, &rows) {
        Ok(()) => {
            info!(
                date = %format_date(date),
                groups = rows.len(),
                "Wrote summary snapshot"
            );
            Ok(SummarizeOutcome::Written(rows))
        }
        // Lost a race with another writer; same end state, same answer.
        Err(CatalogError::DuplicateSnapshot(_)) => Ok(SummarizeOutcome::AlreadySummarized),
        Err(err) => Err(err.into()),
    }
}
