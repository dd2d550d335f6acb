use std::collections::BTreeMap;
use std::fmt::Write as _;

use thiserror::Error;
use time::Date;
use tracing::{info, warn};

use super::db::{CatalogDb, CatalogError, GroupKind, SnapshotRow, format_date};
use crate::notify::Notify;

/// Rendered delta report and the outcome of its delivery.
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    /// The message that was (or would have been) sent.
    pub message: String,
    /// Whether the notification sink accepted the message.
    pub delivered: bool,
    /// True when no prior snapshot existed and totals were reported instead.
    pub baseline: bool,
}

/// Errors that abort a report run before anything is rendered.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Database error: {0}")]
    Db(#[from] CatalogError),
    #[error("No snapshot exists for {0}")]
    MissingSnapshot(Date),
}

/// How a group appears across the two snapshots being compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Both,
    NewToday,
    Vanished,
}

#[derive(Debug, Clone)]
struct GroupDelta {
    key: String,
    file_delta: i64,
    byte_delta: i64,
    presence: Presence,
}

/// Compare today's snapshot to a prior one and send the rendered delta.
///
/// With no prior date the report is a baseline of today's totals. Delivery
/// is best-effort: a sink failure is logged and reflected in the outcome,
/// never an error, and never affects stored snapshots.
pub fn report(
    db: &CatalogDb,
    today: Date,
    prior: Option<Date>,
    notifier: &dyn Notify,
) -> Result<ReportOutcome, ReportError> {
    let today_rows = db.read_snapshot(today)?;
    if today_rows.is_empty() {
        return Err(ReportError::MissingSnapshot(today));
    }

    let (message, baseline) = match prior {
        Some(prior_date) => {
            let prior_rows = db.read_snapshot(prior_date)?;
            if prior_rows.is_empty() {
                (render_baseline(today, &today_rows), true)
            } else {
                (
                    render_delta(today, prior_date, &today_rows, &prior_rows),
                    false,
                )
            }
        }
        None => (render_baseline(today, &today_rows), true),
    };

    let delivered = match notifier.send(&message) {
        Ok(()) => {
            info!(date = %format_date(today), "Delta report delivered");
            true
        }
        Err(err) => {
            warn!(
                date = %format_date(today),
                error = %err,
                "Failed to deliver delta report; snapshot data is unaffected"
            );
            false
        }
    };

    Ok(ReportOutcome {
        message,
        delivered,
        baseline,
    })
}

fn render_baseline(today: Date, rows: &[SnapshotRow]) -> String {
    let mut message = format!(
        "PHOENIX volume report for {} (baseline)\n\
         No prior snapshot exists; reporting today's totals.\n",
        format_date(today)
    );
    for kind in [GroupKind::Modality, GroupKind::Cohort] {
        let _ = write!(message, "\n{}:\n", section_title(kind));
        let mut any = false;
        for row in rows.iter().filter(|row| row.kind == kind) {
            let _ = writeln!(
                message,
                "- {}: {} files, {}",
                row.group_key,
                row.file_count,
                format_bytes(row.total_bytes)
            );
            any = true;
        }
        if !any {
            message.push_str("- (none)\n");
        }
    }
    message
}

fn render_delta(
    today: Date,
    prior: Date,
    today_rows: &[SnapshotRow],
    prior_rows: &[SnapshotRow],
) -> String {
    let mut message = format!(
        "PHOENIX volume report: {} vs {}\n",
        format_date(today),
        format_date(prior)
    );

    let mut stalled_modalities = 0usize;
    for kind in [GroupKind::Modality, GroupKind::Cohort] {
        let deltas = build_deltas(kind, today_rows, prior_rows);
        if kind == GroupKind::Modality {
            stalled_modalities = deltas
                .iter()
                .filter(|delta| delta.file_delta == 0 || delta.byte_delta == 0)
                .count();
        }

        let _ = write!(message, "\n{}:\n", section_title(kind));
        let mut any = false;
        for delta in &deltas {
            // Zero-delta groups are noise; keep the message scannable.
            if delta.file_delta == 0 && delta.byte_delta == 0 {
                continue;
            }
            let line = match delta.presence {
                Presence::Both => format!(
                    "- {}: {} files, {}",
                    delta.key,
                    format_signed(delta.file_delta),
                    format_bytes_delta(delta.byte_delta)
                ),
                Presence::NewToday => format!(
                    "- {}: new ({} files, {})",
                    delta.key,
                    format_signed(delta.file_delta),
                    format_bytes_delta(delta.byte_delta)
                ),
                Presence::Vanished => format!(
                    "- {}: vanished ({} files, {})",
                    delta.key,
                    format_signed(delta.file_delta),
                    format_bytes_delta(delta.byte_delta)
                ),
            };
            message.push_str(&line);
            message.push('\n');
            any = true;
        }
        if !any {
            message.push_str("- no changes\n");
        }
    }

    if stalled_modalities > 0 {
        let _ = write!(
            message,
            "\nPotential data-flow issue: {stalled_modalities} modality group(s) unchanged since {}.\n",
            format_date(prior)
        );
    }
    message
}

/// Union the group keys of both snapshots for one kind; a side where the
/// group is absent counts as zero.
fn build_deltas(
    kind: GroupKind,
    today_rows: &[SnapshotRow],
    prior_rows: &[SnapshotRow],
) -> Vec<GroupDelta> {
    let mut merged: BTreeMap<&str, (Option<&SnapshotRow>, Option<&SnapshotRow>)> = BTreeMap::new();
    for row in today_rows.iter().filter(|row| row.kind == kind) {
        merged.entry(row.group_key.as_str()).or_default().0 = Some(row);
    }
    for row in prior_rows.iter().filter(|row| row.kind == kind) {
        merged.entry(row.group_key.as_str()).or_default().1 = Some(row);
    }

    merged
        .into_iter()
        .map(|(key, (today, prior))| {
            let presence = match (today, prior) {
                (Some(_), Some(_)) => Presence::Both,
                (Some(_), None) => Presence::NewToday,
                _ => Presence::Vanished,
            };
            let (today_files, today_bytes) = today
                .map(|row| (row.file_count as i64, row.total_bytes as i64))
                .unwrap_or((0, 0));
            let (prior_files, prior_bytes) = prior
                .map(|row| (row.file_count as i64, row.total_bytes as i64))
                .unwrap_or((0, 0));
            GroupDelta {
                key: key.to_string(),
                file_delta: today_files - prior_files,
                byte_delta: today_bytes - prior_bytes,
                presence,
            }
        })
        .collect()
}

fn section_title(kind: GroupKind) -> &'static str {
    match kind {
        GroupKind::Modality => "Modalities",
        GroupKind::Cohort => "Cohorts",
    }
}

fn format_signed(value: i64) -> String {
    if value >= 0 {
        format!("+{value}")
    } else {
        value.to_string()
    }
}

/// Humanize a byte count with binary units.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn format_bytes_delta(bytes: i64) -> String {
    let magnitude = format_bytes(bytes.unsigned_abs());
    if bytes >= 0 {
        format!("+{magnitude}")
    } else {
        format!("-{magnitude}")
    }
}
