use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use tracing::warn;

use super::db::{CatalogDb, CatalogError, CatalogWriteBatch, FileRecord};
use super::extractor::{ConventionScheme, file_type_of};

/// Summary of one crawl over a data root.
#[derive(Debug, Default, Clone)]
pub struct CrawlStats {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub total_files: usize,
}

/// Errors that abort a crawl of a data root.
///
/// Per-file problems never appear here; they are logged and skipped.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Data root is not a directory: {0}")]
    InvalidRoot(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Database error: {0}")]
    Db(#[from] CatalogError),
}

/// Walk a data root and sync file metadata into the catalog.
///
/// Unchanged files (same size and mtime) produce no writes, so a repeat
/// crawl over an unchanged tree is a no-op. Files that disappeared from
/// disk are left in the catalog untouched.
pub fn crawl(
    db: &CatalogDb,
    root: &Path,
    scheme: &ConventionScheme,
) -> Result<CrawlStats, CrawlError> {
    if !root.is_dir() {
        return Err(CrawlError::InvalidRoot(root.to_path_buf()));
    }
    let existing = db.file_index()?;
    let mut stats = CrawlStats::default();
    let mut batch = db.write_batch()?;
    let now_ns = to_nanos(SystemTime::now());
    visit_dir(root, &mut |path| {
        sync_file(
            &mut batch,
            root,
            path,
            scheme,
            &existing,
            now_ns,
            &mut stats,
        )
    })?;
    batch.commit()?;
    Ok(stats)
}

fn visit_dir(
    root: &Path,
    visitor: &mut impl FnMut(&Path) -> Result<(), CrawlError>,
) -> Result<(), CrawlError> {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(source) if dir != root => {
                warn!(
                    dir = %dir.display(),
                    error = %source,
                    "Failed to read directory during crawl"
                );
                continue;
            }
            Err(source) => {
                return Err(CrawlError::Io {
                    path: dir.clone(),
                    source,
                });
            }
        };
        for entry_result in entries {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(
                        dir = %dir.display(),
                        error = %err,
                        "Failed to read directory entry during crawl"
                    );
                    continue;
                }
            };

            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "Failed to read file type during crawl"
                    );
                    continue;
                }
            };
            // Symlinks are never followed; PHOENIX trees contain cycles.
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            if file_type.is_file() {
                visitor(&path)?;
            }
        }
    }
    Ok(())
}

fn sync_file(
    batch: &mut CatalogWriteBatch<'_>,
    root: &Path,
    path: &Path,
    scheme: &ConventionScheme,
    existing: &HashMap<String, (u64, i64)>,
    now_ns: i64,
    stats: &mut CrawlStats,
) -> Result<(), CrawlError> {
    stats.total_files += 1;

    let meta = match path.metadata() {
        Ok(meta) => meta,
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "Skipping unreadable file during crawl"
            );
            stats.skipped += 1;
            return Ok(());
        }
    };
    let modified_ns = meta
        .modified()
        .map(to_nanos)
        .unwrap_or(0);
    let size = meta.len();

    let key = normalize_path(path);
    match existing.get(&key) {
        Some((known_size, known_modified))
            if *known_size == size && *known_modified == modified_ns =>
        {
            stats.unchanged += 1;
            return Ok(());
        }
        known => {
            let relative = path.strip_prefix(root).unwrap_or(path);
            let fields = scheme.extract(relative);
            batch.upsert_file(&FileRecord {
                path: key,
                size_bytes: size,
                modified_ns,
                modality: fields.modality,
                subject_id: fields.subject_id,
                study: fields.study,
                network: fields.network,
                file_type: file_type_of(path).to_string(),
                first_seen_ns: now_ns,
                last_seen_ns: now_ns,
            })?;
            if known.is_some() {
                stats.updated += 1;
            } else {
                stats.added += 1;
            }
        }
    }
    Ok(())
}

/// Catalog key for a file: its full path with forward slashes.
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn to_nanos(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}
