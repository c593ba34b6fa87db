//! Remote table storage
//!
//! The backend talks to the table through [`TableClient`], so any key/value
//! table service (or a test double) can sit behind it. Each persist writes one
//! row keyed by a fresh numeric id. The call runs on a worker thread and is
//! abandoned after `upload.timeout`.
//!
//! Once credentials or connectivity fail the backend disables itself and every
//! later persist fails immediately.

use super::{PersistedRecord, StorageBackend};
use crate::config::AwsConfig;
use crate::error::{CronistaError, Result};
use crossbeam::channel;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Name of the partition key attribute
pub const PARTITION_KEY: &str = "id";

/// Lifecycle of the remote table as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Missing,
    Creating,
    Active,
}

/// Fixed table layout used when the table has to be created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    /// Numeric partition key
    pub partition_key: String,
    pub read_capacity: u32,
    pub write_capacity: u32,
}

impl TableSchema {
    pub fn from_config(config: &AwsConfig) -> Self {
        Self {
            table_name: config.table_name.clone(),
            partition_key: PARTITION_KEY.to_string(),
            read_capacity: config.read_capacity,
            write_capacity: config.write_capacity,
        }
    }
}

/// The row written for one flush
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: u64,
    pub session_id: String,
    pub timestamp: f64,
    pub hostname: String,
    /// The aggregate document, JSON encoded
    pub data: String,
    pub total_calls: u64,
    pub total_wall_time: f64,
    pub total_cpu_time: f64,
}

impl RemoteItem {
    pub fn from_record(record: &PersistedRecord) -> Result<Self> {
        Ok(Self {
            id: record.id,
            session_id: record.session_id.clone(),
            timestamp: record.timestamp,
            hostname: record.hostname.clone(),
            data: serde_json::to_string(&record.data)?,
            total_calls: record.data.total_calls(),
            total_wall_time: record.data.total_wall_time(),
            total_cpu_time: record.data.total_cpu_time(),
        })
    }
}

/// Operations the remote backend needs from a table service
///
/// Implementations report missing credentials or connectivity as
/// [`CronistaError::StorageUnavailable`].
pub trait TableClient: Send + Sync {
    fn describe_table(&self, table: &str) -> Result<TableStatus>;
    fn create_table(&self, schema: &TableSchema) -> Result<()>;
    /// Block until the table is usable or `timeout` passes
    fn wait_until_active(&self, table: &str, timeout: Duration) -> Result<()>;
    fn put_item(&self, table: &str, item: &RemoteItem) -> Result<()>;
}

/// Storage backend writing one row per flush
pub struct RemoteBackend {
    client: Arc<dyn TableClient>,
    schema: TableSchema,
    auto_create: bool,
    timeout: Duration,
    ready: AtomicBool,
    disabled: AtomicBool,
}

impl RemoteBackend {
    /// Check the table (creating it if allowed) and return a ready backend
    pub fn connect(
        client: Box<dyn TableClient>,
        config: &AwsConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let backend = Self {
            client: Arc::from(client),
            schema: TableSchema::from_config(config),
            auto_create: config.auto_create_table,
            timeout,
            ready: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
        };
        backend.ensure_table()?;
        Ok(backend)
    }

    pub fn table_name(&self) -> &str {
        &self.schema.table_name
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Stop all further writes
    pub fn disable(&self, reason: &str) {
        if !self.disabled.swap(true, Ordering::AcqRel) {
            tracing::warn!("remote storage disabled: {}", reason);
        }
    }

    fn ensure_table(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let table = &self.schema.table_name;
        match self.client.describe_table(table)? {
            TableStatus::Active => {}
            TableStatus::Creating => {
                self.client.wait_until_active(table, self.timeout)?;
            }
            TableStatus::Missing if self.auto_create => {
                tracing::info!(
                    "creating table {} (read {}, write {})",
                    table,
                    self.schema.read_capacity,
                    self.schema.write_capacity
                );
                self.client.create_table(&self.schema)?;
                self.client.wait_until_active(table, self.timeout)?;
            }
            TableStatus::Missing => {
                return Err(CronistaError::StorageUnavailable(format!(
                    "table {table} does not exist and auto-create is off"
                )));
            }
        }
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn put_with_timeout(&self, item: RemoteItem) -> Result<()> {
        let (tx, rx) = channel::bounded(1);
        let client = Arc::clone(&self.client);
        let table = self.schema.table_name.clone();
        thread::Builder::new()
            .name("cronista-upload".to_string())
            .spawn(move || {
                let _ = tx.send(client.put_item(&table, &item));
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(channel::RecvTimeoutError::Timeout) => Err(CronistaError::StorageUnavailable(
                format!("upload timed out after {:.1}s", self.timeout.as_secs_f64()),
            )),
            Err(channel::RecvTimeoutError::Disconnected) => Err(
                CronistaError::StorageUnavailable("upload worker exited without a result".into()),
            ),
        }
    }
}

impl StorageBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn persist(&self, record: &PersistedRecord) -> Result<()> {
        if self.is_disabled() {
            return Err(CronistaError::StorageUnavailable(
                "remote storage is disabled".into(),
            ));
        }

        let outcome = self
            .ensure_table()
            .and_then(|()| RemoteItem::from_record(record))
            .and_then(|item| self.put_with_timeout(item));

        if let Err(CronistaError::StorageUnavailable(reason)) = &outcome {
            self.disable(reason);
        }
        outcome
    }
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("schema", &self.schema)
            .field("timeout", &self.timeout)
            .field("disabled", &self.is_disabled())
            .finish_non_exhaustive()
    }
}
