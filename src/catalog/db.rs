use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, Transaction, params};
use thiserror::Error;
use time::{Date, format_description::FormatItem, macros::format_description};

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Grouping axis for summary snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// Grouped by data modality (e.g. MRI, EEG).
    Modality,
    /// Grouped by network/study/subject ownership.
    Cohort,
}

impl GroupKind {
    /// Convert the kind to its stored column value.
    pub fn as_str(self) -> &'static str {
        match self {
            GroupKind::Modality => "modality",
            GroupKind::Cohort => "cohort",
        }
    }

    /// Parse a stored column value back into a kind.
    pub fn from_label(value: &str) -> Self {
        match value {
            "cohort" => GroupKind::Cohort,
            _ => GroupKind::Modality,
        }
    }
}

/// One cataloged file with its descriptive metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub size_bytes: u64,
    pub modified_ns: i64,
    pub modality: String,
    pub subject_id: String,
    pub study: String,
    pub network: String,
    pub file_type: String,
    pub first_seen_ns: i64,
    pub last_seen_ns: i64,
}

/// One per-date aggregate row, immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub date: Date,
    pub kind: GroupKind,
    pub group_key: String,
    pub file_count: u64,
    pub total_bytes: u64,
}

/// Errors returned when accessing the catalog database.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database query failed: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("Could not create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("A summary snapshot already exists for {0}")]
    DuplicateSnapshot(Date),
    #[error("Stored snapshot date is not valid: {0}")]
    BadStoredDate(String),
    #[error("Database is busy, please retry")]
    Busy,
    #[error("SQLite returned an unexpected result")]
    Unexpected,
}

/// SQLite wrapper that owns the `files` and `snapshots` tables.
pub struct CatalogDb {
    connection: Connection,
}

impl CatalogDb {
    /// Open (or create) the catalog database at the given path.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let db_path = db_path.as_ref();
        create_parent_if_needed(db_path)?;
        let connection = Connection::open(db_path)?;
        let db = Self { connection };
        db.apply_pragmas()?;
        db.apply_schema()?;
        Ok(db)
    }

    /// Insert or update a single file row keyed by path.
    pub fn upsert_file(&self, record: &FileRecord) -> Result<(), CatalogError> {
        let mut batch = self.write_batch()?;
        batch.upsert_file(record)?;
        batch.commit()
    }

    /// Fetch every cataloged file, ordered by path.
    pub fn list_files(&self) -> Result<Vec<FileRecord>, CatalogError> {
        let mut stmt = self
            .connection
            .prepare(
                "SELECT path, size_bytes, modified_ns, modality, subject_id, study,
                        network, file_type, first_seen_ns, last_seen_ns
                 FROM files ORDER BY path ASC",
            )
            .map_err(map_sql_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FileRecord {
                    path: row.get(0)?,
                    size_bytes: row.get::<_, i64>(1)? as u64,
                    modified_ns: row.get(2)?,
                    modality: row.get(3)?,
                    subject_id: row.get(4)?,
                    study: row.get(5)?,
                    network: row.get(6)?,
                    file_type: row.get(7)?,
                    first_seen_ns: row.get(8)?,
                    last_seen_ns: row.get(9)?,
                })
            })
            .map_err(map_sql_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_error)?;
        Ok(rows)
    }

    /// Fetch the files belonging to one snapshot group.
    pub fn query_by_group(
        &self,
        kind: GroupKind,
        group_key: &str,
    ) -> Result<Vec<FileRecord>, CatalogError> {
        let sql = match kind {
            GroupKind::Modality => {
                "SELECT path, size_bytes, modified_ns, modality, subject_id, study,
                        network, file_type, first_seen_ns, last_seen_ns
                 FROM files WHERE modality = ?1 ORDER BY path ASC"
            }
            GroupKind::Cohort => {
                "SELECT path, size_bytes, modified_ns, modality, subject_id, study,
                        network, file_type, first_seen_ns, last_seen_ns
                 FROM files WHERE network || '/' || study || '/' || subject_id = ?1
                 ORDER BY path ASC"
            }
        };
        let mut stmt = self.connection.prepare(sql).map_err(map_sql_error)?;
        let rows = stmt
            .query_map(params![group_key], |row| {
                Ok(FileRecord {
                    path: row.get(0)?,
                    size_bytes: row.get::<_, i64>(1)? as u64,
                    modified_ns: row.get(2)?,
                    modality: row.get(3)?,
                    subject_id: row.get(4)?,
                    study: row.get(5)?,
                    network: row.get(6)?,
                    file_type: row.get(7)?,
                    first_seen_ns: row.get(8)?,
                    last_seen_ns: row.get(9)?,
                })
            })
            .map_err(map_sql_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_error)?;
        Ok(rows)
    }

    /// Build a path -> (size, mtime) index of known rows for change detection.
    pub fn file_index(&self) -> Result<HashMap<String, (u64, i64)>, CatalogError> {
        let mut stmt = self
            .connection
            .prepare("SELECT path, size_bytes, modified_ns FROM files")
            .map_err(map_sql_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)? as u64,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(map_sql_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_error)?;
        Ok(rows
            .into_iter()
            .map(|(path, size, modified)| (path, (size, modified)))
            .collect())
    }

    /// Aggregate the current catalog along one grouping axis.
    pub fn aggregate(&self, date: Date, kind: GroupKind) -> Result<Vec<SnapshotRow>, CatalogError> {
        let sql = match kind {
            GroupKind::Modality => {
                "SELECT modality, COUNT(*), SUM(size_bytes)
                 FROM files GROUP BY modality ORDER BY modality ASC"
            }
            GroupKind::Cohort => {
                "SELECT network || '/' || study || '/' || subject_id, COUNT(*), SUM(size_bytes)
                 FROM files GROUP BY network, study, subject_id
                 ORDER BY network, study, subject_id"
            }
        };
        let mut stmt = self.connection.prepare(sql).map_err(map_sql_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SnapshotRow {
                    date,
                    kind,
                    group_key: row.get(0)?,
                    file_count: row.get::<_, i64>(1)? as u64,
                    total_bytes: row.get::<_, i64>(2)? as u64,
                })
            })
            .map_err(map_sql_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_error)?;
        Ok(rows)
    }

    /// Write a full snapshot row set for one date in a single transaction.
    ///
    /// Rows are plain inserts; hitting the (date, kind, key) primary key
    /// means the date was already summarized and maps to `DuplicateSnapshot`.
    pub fn write_snapshot(&self, date: Date, rows: &[SnapshotRow]) -> Result<(), CatalogError> {
        let tx = self
            .connection
            .unchecked_transaction()
            .map_err(map_sql_error)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO snapshots
                         (snapshot_date, group_kind, group_key, file_count, total_bytes)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(map_sql_error)?;
            for row in rows {
                stmt.execute(params![
                    format_date(date),
                    row.kind.as_str(),
                    row.group_key,
                    row.file_count as i64,
                    row.total_bytes as i64,
                ])
                .map_err(|err| map_snapshot_error(err, date))?;
            }
        }
        tx.commit().map_err(map_sql_error)?;
        Ok(())
    }

    /// Whether any snapshot rows exist for the given date.
    pub fn has_snapshot(&self, date: Date) -> Result<bool, CatalogError> {
        let exists: i64 = self
            .connection
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM snapshots WHERE snapshot_date = ?1)",
                params![format_date(date)],
                |row| row.get(0),
            )
            .map_err(map_sql_error)?;
        Ok(exists != 0)
    }

    /// Read the full snapshot row set for one date, ordered by kind and key.
    pub fn read_snapshot(&self, date: Date) -> Result<Vec<SnapshotRow>, CatalogError> {
        let mut stmt = self
            .connection
            .prepare(
                "SELECT group_kind, group_key, file_count, total_bytes
                 FROM snapshots WHERE snapshot_date = ?1
                 ORDER BY group_kind ASC, group_key ASC",
            )
            .map_err(map_sql_error)?;
        let rows = stmt
            .query_map(params![format_date(date)], |row| {
                let kind: String = row.get(0)?;
                Ok(SnapshotRow {
                    date,
                    kind: GroupKind::from_label(&kind),
                    group_key: row.get(1)?,
                    file_count: row.get::<_, i64>(2)? as u64,
                    total_bytes: row.get::<_, i64>(3)? as u64,
                })
            })
            .map_err(map_sql_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_error)?;
        Ok(rows)
    }

    /// Most recent snapshot date strictly before the given date, if any.
    pub fn latest_snapshot_date_before(&self, date: Date) -> Result<Option<Date>, CatalogError> {
        let mut stmt = self
            .connection
            .prepare(
                "SELECT DISTINCT snapshot_date FROM snapshots
                 WHERE snapshot_date < ?1
                 ORDER BY snapshot_date DESC LIMIT 1",
            )
            .map_err(map_sql_error)?;
        let mut rows = stmt
            .query_map(params![format_date(date)], |row| row.get::<_, String>(0))
            .map_err(map_sql_error)?;
        match rows.next() {
            Some(stored) => {
                let stored = stored.map_err(map_sql_error)?;
                Ok(Some(parse_snapshot_date(&stored)?))
            }
            None => Ok(None),
        }
    }

    /// Start a write batch that wraps related upserts in a single transaction.
    pub fn write_batch(&self) -> Result<CatalogWriteBatch<'_>, CatalogError> {
        let tx = self
            .connection
            .unchecked_transaction()
            .map_err(map_sql_error)?;
        Ok(CatalogWriteBatch { tx })
    }

    fn apply_pragmas(&self) -> Result<(), CatalogError> {
        self.connection
            .execute_batch(
                "PRAGMA journal_mode=WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;
             PRAGMA temp_store=MEMORY;",
            )
            .map_err(map_sql_error)?;
        Ok(())
    }

    fn apply_schema(&self) -> Result<(), CatalogError> {
        self.connection
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                size_bytes INTEGER NOT NULL,
                modified_ns INTEGER NOT NULL,
                modality TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                study TEXT NOT NULL,
                network TEXT NOT NULL,
                file_type TEXT NOT NULL,
                first_seen_ns INTEGER NOT NULL,
                last_seen_ns INTEGER NOT NULL
            );
             CREATE TABLE IF NOT EXISTS snapshots (
                snapshot_date TEXT NOT NULL,
                group_kind TEXT NOT NULL,
                group_key TEXT NOT NULL,
                file_count INTEGER NOT NULL,
                total_bytes INTEGER NOT NULL,
                PRIMARY KEY (snapshot_date, group_kind, group_key)
            );
             CREATE INDEX IF NOT EXISTS idx_files_modality ON files(modality);
             CREATE INDEX IF NOT EXISTS idx_files_cohort ON files(network, study, subject_id);",
            )
            .map_err(map_sql_error)?;
        Ok(())
    }
}

/// Groups multiple file upserts into one transaction using cached statements.
pub struct CatalogWriteBatch<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> CatalogWriteBatch<'conn> {
    /// Insert or update a file row; `first_seen_ns` is preserved on update.
    pub fn upsert_file(&mut self, record: &FileRecord) -> Result<(), CatalogError> {
        self.tx
            .prepare_cached(
                "INSERT INTO files (path, size_bytes, modified_ns, modality, subject_id,
                                    study, network, file_type, first_seen_ns, last_seen_ns)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(path) DO UPDATE SET
                     size_bytes = excluded.size_bytes,
                     modified_ns = excluded.modified_ns,
                     modality = excluded.modality,
                     subject_id = excluded.subject_id,
                     study = excluded.study,
                     network = excluded.network,
                     file_type = excluded.file_type,
                     last_seen_ns = excluded.last_seen_ns",
            )
            .map_err(map_sql_error)?
            .execute(params![
                record.path,
                record.size_bytes as i64,
                record.modified_ns,
                record.modality,
                record.subject_id,
                record.study,
                record.network,
                record.file_type,
                record.first_seen_ns,
                record.last_seen_ns,
            ])
            .map_err(map_sql_error)?;
        Ok(())
    }

    /// Commit all batched upserts atomically.
    pub fn commit(self) -> Result<(), CatalogError> {
        self.tx.commit().map_err(map_sql_error)?;
        Ok(())
    }
}

/// Render a snapshot date the way it is stored (`YYYY-MM-DD`).
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Parse a stored `YYYY-MM-DD` snapshot date.
pub fn parse_snapshot_date(value: &str) -> Result<Date, CatalogError> {
    Date::parse(value, DATE_FORMAT).map_err(|_| CatalogError::BadStoredDate(value.to_string()))
}

/// Translate rusqlite errors into friendlier CatalogError variants.
fn map_sql_error(err: rusqlite::Error) -> CatalogError {
    match err {
        rusqlite::Error::SqliteFailure(sql_err, _)
            if sql_err.extended_code == rusqlite::ffi::SQLITE_BUSY =>
        {
            CatalogError::Busy
        }
        rusqlite::Error::InvalidQuery
        | rusqlite::Error::InvalidParameterName(_)
        | rusqlite::Error::MultipleStatement => CatalogError::Unexpected,
        other => CatalogError::Sql(other),
    }
}

fn map_snapshot_error(err: rusqlite::Error, date: Date) -> CatalogError {
    match &err {
        rusqlite::Error::SqliteFailure(sql_err, _)
            if sql_err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            CatalogError::DuplicateSnapshot(date)
        }
        _ => map_sql_error(err),
    }
}

fn create_parent_if_needed(path: &Path) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|source| CatalogError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use time::macros::date;

    fn record(path: &str, size: u64, modality: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            size_bytes: size,
            modified_ns: 5,
            modality: modality.to_string(),
            subject_id: "sub-01".to_string(),
            study: "StudyA".to_string(),
            network: "ProNET".to_string(),
            file_type: "csv".to_string(),
            first_seen_ns: 100,
            last_seen_ns: 100,
        }
    }

    fn open_db(dir: &tempfile::TempDir) -> CatalogDb {
        CatalogDb::open(dir.path().join("catalog.db")).unwrap()
    }

    #[test]
    fn upsert_preserves_first_seen_and_path_uniqueness() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        db.upsert_file(&record("/data/one.csv", 10, "mri")).unwrap();

        let mut updated = record("/data/one.csv", 20, "mri");
        updated.modified_ns = 9;
        updated.first_seen_ns = 999;
        updated.last_seen_ns = 999;
        db.upsert_file(&updated).unwrap();

        let rows = db.list_files().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].size_bytes, 20);
        assert_eq!(rows[0].modified_ns, 9);
        assert_eq!(rows[0].first_seen_ns, 100, "first_seen must survive updates");
        assert_eq!(rows[0].last_seen_ns, 999);
    }

    #[test]
    fn aggregate_by_modality_sums_counts_and_bytes() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        db.upsert_file(&record("/d/a.csv", 10, "mri")).unwrap();
        db.upsert_file(&record("/d/b.csv", 30, "mri")).unwrap();
        db.upsert_file(&record("/d/c.csv", 5, "eeg")).unwrap();

        let day = date!(2025 - 04 - 21);
        let rows = db.aggregate(day, GroupKind::Modality).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].group_key, "eeg");
        assert_eq!(rows[0].file_count, 1);
        assert_eq!(rows[0].total_bytes, 5);
        assert_eq!(rows[1].group_key, "mri");
        assert_eq!(rows[1].file_count, 2);
        assert_eq!(rows[1].total_bytes, 40);
    }

    #[test]
    fn aggregate_by_cohort_uses_composite_key() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        db.upsert_file(&record("/d/a.csv", 10, "mri")).unwrap();

        let day = date!(2025 - 04 - 21);
        let rows = db.aggregate(day, GroupKind::Cohort).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].group_key, "ProNET/StudyA/sub-01");
    }

    #[test]
    fn snapshot_rewrite_for_same_date_is_a_duplicate() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        db.upsert_file(&record("/d/a.csv", 10, "mri")).unwrap();

        let day = date!(2025 - 04 - 21);
        let rows = db.aggregate(day, GroupKind::Modality).unwrap();
        db.write_snapshot(day, &rows).unwrap();
        assert!(db.has_snapshot(day).unwrap());

        let err = db.write_snapshot(day, &rows).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateSnapshot(d) if d == day));

        // The failed rewrite must not leave partial rows behind.
        assert_eq!(db.read_snapshot(day).unwrap(), rows);
    }

    #[test]
    fn latest_snapshot_date_before_skips_today_and_later() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        db.upsert_file(&record("/d/a.csv", 10, "mri")).unwrap();

        for day in [
            date!(2025 - 04 - 19),
            date!(2025 - 04 - 21),
            date!(2025 - 04 - 22),
        ] {
            let rows = db.aggregate(day, GroupKind::Modality).unwrap();
            db.write_snapshot(day, &rows).unwrap();
        }

        let prior = db
            .latest_snapshot_date_before(date!(2025 - 04 - 22))
            .unwrap();
        assert_eq!(prior, Some(date!(2025 - 04 - 21)));
        assert_eq!(
            db.latest_snapshot_date_before(date!(2025 - 04 - 19)).unwrap(),
            None
        );
    }

    #[test]
    fn query_by_group_filters_rows() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        db.upsert_file(&record("/d/a.csv", 10, "mri")).unwrap();
        db.upsert_file(&record("/d/b.csv", 10, "eeg")).unwrap();

        let mri = db.query_by_group(GroupKind::Modality, "mri").unwrap();
        assert_eq!(mri.len(), 1);
        assert_eq!(mri[0].path, "/d/a.csv");

        let cohort = db
            .query_by_group(GroupKind::Cohort, "ProNET/StudyA/sub-01")
            .unwrap();
        assert_eq!(cohort.len(), 2);
    }

    #[test]
    fn date_round_trips_through_storage_format() {
        let day = date!(2025 - 04 - 21);
        assert_eq!(format_date(day), "2025-04-21");
        assert_eq!(parse_snapshot_date("2025-04-21").unwrap(), day);
        assert!(matches!(
            parse_snapshot_date("not-a-date"),
            Err(CatalogError::BadStoredDate(_))
        ));
    }
}
