//! Persistence of aggregate documents
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Exit flush / manual flush                                     │
//! │   aggregate(results) → PersistedRecord                        │
//! └──────────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ StorageBackend::persist                                       │
//! │   LocalBackend  → one JSON file per flush + retention         │
//! │   RemoteBackend → one table row, bounded by upload.timeout    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Backend choice happens once at engine start ([`select_backend`]). A
//! failing persist is reported to the caller as `Err` and logged; it never
//! affects timing or diagnostics.

pub mod local;
pub mod remote;

use crate::aggregate::AggregateDocument;
use crate::config::Config;
use crate::error::Result;
use crate::session::{hostname, unix_timestamp, SessionId};
use serde::{Deserialize, Serialize};

pub use local::{list_records, load_record, LocalBackend, RecordFile};
pub use remote::{RemoteBackend, RemoteItem, TableClient, TableSchema, TableStatus};

/// One persisted flush
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub id: u64,
    pub session_id: String,
    pub timestamp: f64,
    pub hostname: String,
    pub data: AggregateDocument,
}

impl PersistedRecord {
    /// Wrap `data` with `id`, the current time and this host's name
    pub fn new(id: u64, session: &SessionId, data: AggregateDocument) -> Self {
        Self {
            id,
            session_id: session.to_string(),
            timestamp: unix_timestamp(),
            hostname: hostname(),
            data,
        }
    }
}

/// A persistence strategy
pub trait StorageBackend: Send + Sync {
    /// Short name used in logs ("local", "remote")
    fn name(&self) -> &'static str;

    /// Store one record; errors are reported, never panicked
    fn persist(&self, record: &PersistedRecord) -> Result<()>;
}

/// Which backend was chosen and why
pub struct Selection {
    pub backend: Box<dyn StorageBackend>,
    /// True when remote was wanted but could not be initialised
    pub fell_back: bool,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("backend", &self.backend.name())
            .field("fell_back", &self.fell_back)
            .finish()
    }
}

/// Choose the backend for an engine
///
/// Local-only configs always get the local variant. Otherwise the remote
/// variant is tried with `client`; any initialisation failure (including no
/// client at all) falls back to local storage with a warning.
pub fn select_backend(config: &Config, client: Option<Box<dyn TableClient>>) -> Selection {
    let local = || Box::new(LocalBackend::from_config(&config.local)) as Box<dyn StorageBackend>;

    if config.is_local_only() {
        tracing::debug!("local-only storage selected");
        return Selection {
            backend: local(),
            fell_back: false,
        };
    }

    let Some(client) = client else {
        tracing::warn!("no remote table client configured, falling back to local storage");
        return Selection {
            backend: local(),
            fell_back: true,
        };
    };

    match RemoteBackend::connect(client, &config.aws, config.upload_timeout()) {
        Ok(remote) => {
            tracing::info!("remote storage ready (table {})", config.aws.table_name);
            Selection {
                backend: Box::new(remote),
                fell_back: false,
            }
        }
        Err(e) => {
            tracing::warn!("remote storage unavailable, falling back to local: {}", e);
            Selection {
                backend: local(),
                fell_back: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::timing::TimingResult;
    use remote::tests::FakeTable;

    #[test]
    fn test_record_wraps_document() {
        let doc = aggregate(&[TimingResult::with_timestamp("f", 0.1, 0.1, None, 1.0)]);
        let session = SessionId::from("abcdef0123456789");
        let record = PersistedRecord::new(1, &session, doc.clone());
        assert_eq!(record.session_id, "abcdef0123456789");
        assert_eq!(record.data, doc);
        assert!(record.timestamp > 0.0);
        assert!(!record.hostname.is_empty());
    }

    #[test]
    fn test_local_only_selects_local() {
        let mut config = Config::default();
        config.local.enabled = true;
        let selection = select_backend(&config, Some(Box::new(FakeTable::default())));
        assert_eq!(selection.backend.name(), "local");
        assert!(!selection.fell_back);
    }

    #[test]
    fn test_missing_client_falls_back() {
        let selection = select_backend(&Config::default(), None);
        assert_eq!(selection.backend.name(), "local");
        assert!(selection.fell_back);
    }

    #[test]
    fn test_unreachable_remote_falls_back() {
        let table = FakeTable::unreachable();
        let selection = select_backend(&Config::default(), Some(Box::new(table)));
        assert_eq!(selection.backend.name(), "local");
        assert!(selection.fell_back);
    }

    #[test]
    fn test_reachable_remote_selected() {
        let mut config = Config::default();
        config.upload.timeout = 2.0;
        let selection = select_backend(&config, Some(Box::new(FakeTable::default())));
        assert_eq!(selection.backend.name(), "remote");
        assert!(!selection.fell_back);
    }
}
