// Integration test utilities
//
// Config helpers and an in-memory table service for the remote backend.
#![allow(dead_code)]

use cronista::error::{CronistaError, Result};
use cronista::storage::{RemoteItem, TableClient, TableSchema, TableStatus};
use cronista::{Config, Engine};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Local-only config writing into `dir`, recording every call
pub fn local_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.local.enabled = true;
    config.local.data_dir = dir.to_path_buf();
    config.tracking.min_execution_time = 0.0;
    config
}

/// Engine without report output or panic hook
pub fn quiet_engine(config: Config) -> Engine {
    Engine::builder(config)
        .report_sink(None)
        .without_panic_hook()
        .build()
}

#[derive(Debug, Default)]
pub struct TableState {
    pub reachable: bool,
    pub exists: bool,
    pub created: Vec<TableSchema>,
    pub items: Vec<RemoteItem>,
    pub put_attempts: usize,
}

/// Remote table double shared between the test and the engine
#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub state: Arc<Mutex<TableState>>,
}

impl MemoryTable {
    pub fn reachable() -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState {
                reachable: true,
                ..Default::default()
            })),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState::default())),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    pub fn items(&self) -> Vec<RemoteItem> {
        self.state.lock().unwrap().items.clone()
    }

    fn check(&self) -> Result<()> {
        if self.state.lock().unwrap().reachable {
            Ok(())
        } else {
            Err(CronistaError::StorageUnavailable(
                "unable to locate credentials".into(),
            ))
        }
    }
}

impl TableClient for MemoryTable {
    fn describe_table(&self, _table: &str) -> Result<TableStatus> {
        self.check()?;
        Ok(if self.state.lock().unwrap().exists {
            TableStatus::Active
        } else {
            TableStatus::Missing
        })
    }

    fn create_table(&self, schema: &TableSchema) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state.created.push(schema.clone());
        state.exists = true;
        Ok(())
    }

    fn wait_until_active(&self, _table: &str, _timeout: Duration) -> Result<()> {
        self.check()
    }

    fn put_item(&self, _table: &str, item: &RemoteItem) -> Result<()> {
        self.state.lock().unwrap().put_attempts += 1;
        self.check()?;
        self.state.lock().unwrap().items.push(item.clone());
        Ok(())
    }
}
