//! Local directory storage: one JSON document per flush

use super::{PersistedRecord, StorageBackend};
use crate::config::{LocalConfig, StorageFormat};
use crate::error::Result;
use crate::session::leading_chars;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// File name prefix shared by every record this backend writes
pub const FILE_PREFIX: &str = "cronista_";

/// Session-id characters used in file names
const SESSION_PREFIX_LEN: usize = 8;

/// Writes records into a directory and prunes old ones
#[derive(Debug, Clone)]
pub struct LocalBackend {
    dir: PathBuf,
    format: StorageFormat,
    max_records: usize,
}

impl LocalBackend {
    pub fn new(dir: impl Into<PathBuf>, format: StorageFormat, max_records: usize) -> Self {
        Self {
            dir: dir.into(),
            format,
            max_records: max_records.max(1),
        }
    }

    /// Build from config, logging when the requested format is replaced
    pub fn from_config(config: &LocalConfig) -> Self {
        let resolution = StorageFormat::resolve(&config.format);
        if let Some(requested) = &resolution.substituted_from {
            tracing::warn!(
                "local format '{}' is not supported, writing {} instead",
                requested,
                resolution.format.extension()
            );
        }
        Self::new(&config.data_dir, resolution.format, config.max_records)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// `cronista_<record id>_<session prefix>.json`
    pub fn file_name(&self, record: &PersistedRecord) -> String {
        let session = leading_chars(&record.session_id, SESSION_PREFIX_LEN);
        format!(
            "{FILE_PREFIX}{}_{}.{}",
            record.id,
            session,
            self.format.extension()
        )
    }

    /// Write `record` and return the path written
    pub fn write(&self, record: &PersistedRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(self.file_name(record));
        let json = match self.format {
            StorageFormat::Json => serde_json::to_string_pretty(record)?,
        };
        fs::write(&path, json)?;
        tracing::debug!("wrote {}", path.display());
        Ok(path)
    }

    /// Delete the oldest record files beyond `max_records`
    ///
    /// Returns how many files were removed.
    pub fn enforce_retention(&self) -> Result<usize> {
        let files = list_records(&self.dir)?;
        let mut removed = 0;
        // list_records is newest first
        for stale in files.iter().skip(self.max_records) {
            match fs::remove_file(&stale.path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("could not remove {}: {}", stale.path.display(), e),
            }
        }
        if removed > 0 {
            tracing::debug!("retention removed {} record(s)", removed);
        }
        Ok(removed)
    }
}

impl StorageBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn persist(&self, record: &PersistedRecord) -> Result<()> {
        self.write(record)?;
        self.enforce_retention()?;
        Ok(())
    }
}

/// A record file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFile {
    pub path: PathBuf,
    pub modified: SystemTime,
}

fn is_record_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with(FILE_PREFIX)
        && path.extension().and_then(|e| e.to_str()) == Some(StorageFormat::Json.extension())
}

/// Record files in `dir`, newest first
///
/// A missing directory yields an empty list.
pub fn list_records(dir: &Path) -> Result<Vec<RecordFile>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || !is_record_file(&path) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        files.push(RecordFile { path, modified });
    }
    // Name order breaks ties; names start with a time-derived id
    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));
    Ok(files)
}

/// Read one persisted record
pub fn load_record(path: &Path) -> Result<PersistedRecord> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::session::{RecordIds, SessionId};
    use crate::timing::{CapturedArgs, TimingResult};
    use std::sync::LazyLock;
    use tempfile::TempDir;

    static IDS: LazyLock<RecordIds> = LazyLock::new(RecordIds::new);

    fn record() -> PersistedRecord {
        let args = CapturedArgs {
            args: vec!["10".to_string()],
            ..Default::default()
        };
        let results = vec![
            TimingResult::with_timestamp("app::calc", 0.25, 0.125, Some(args), 100.0),
            TimingResult::with_timestamp("app::io", 1.5, 0.0, None, 101.0),
        ];
        PersistedRecord::new(
            IDS.next(),
            &SessionId::from("0123456789abcdef"),
            aggregate(&results),
        )
    }

    #[test]
    fn test_file_name_uses_id_and_session_prefix() {
        let backend = LocalBackend::new("/tmp", StorageFormat::Json, 10);
        let record = record();
        let name = backend.file_name(&record);
        assert_eq!(name, format!("cronista_{}_01234567.json", record.id));
    }

    #[test]
    fn test_persist_creates_directory_and_round_trips() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join("perf");
        let backend = LocalBackend::new(&dir, StorageFormat::Json, 10);

        let record = record();
        backend.persist(&record).unwrap();

        let files = list_records(&dir).unwrap();
        assert_eq!(files.len(), 1);
        let loaded = load_record(&files[0].path).unwrap();
        assert_eq!(loaded.data, record.data);
        assert_eq!(loaded.session_id, record.session_id);
        assert_eq!(loaded.id, record.id);
    }

    #[test]
    fn test_retention_keeps_newest() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path(), StorageFormat::Json, 2);

        let mut written = Vec::new();
        for _ in 0..4 {
            let path = backend.write(&record()).unwrap();
            written.push(path);
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(backend.enforce_retention().unwrap(), 2);

        let remaining: Vec<_> = list_records(tmp.path())
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&written[3]));
        assert!(remaining.contains(&written[2]));
    }

    #[test]
    fn test_unrelated_files_are_ignored() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("notes.txt"), "keep me").unwrap();
        fs::write(tmp.path().join("other.json"), "{}").unwrap();

        let backend = LocalBackend::new(tmp.path(), StorageFormat::Json, 1);
        backend.persist(&record()).unwrap();
        backend.persist(&record()).unwrap();

        assert!(tmp.path().join("notes.txt").exists());
        assert!(tmp.path().join("other.json").exists());
        assert_eq!(list_records(tmp.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        assert!(list_records(&tmp.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_format_falls_back_to_json() {
        let config = LocalConfig {
            format: "csv".to_string(),
            ..Default::default()
        };
        let backend = LocalBackend::from_config(&config);
        assert!(backend.file_name(&record()).ends_with(".json"));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cronista_1_x.json");
        fs::write(&path, "not json").unwrap();
        assert!(load_record(&path).is_err());
    }
}
