// src/storage/json_store.rs
use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::identity::{ProductKey, StoredProduct};
use crate::machine::ExtractionSession;
use crate::selectors::{NewSelector, SelectorCandidate, SelectorId};
use crate::storage::{Persistence, RowChange, Write};
use crate::utils::error::StorageError;

const SELECTORS_FILE: &str = "selectors.json";
const PRODUCTS_FILE: &str = "products.json";
const SESSIONS_FILE: &str = "sessions.jsonl";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SelectorTable {
    next_id: u64,
    rows: BTreeMap<u64, SelectorCandidate>,
}

#[derive(Debug, Default)]
struct Tables {
    selectors: SelectorTable,
    products: BTreeMap<String, StoredProduct>,
    sessions: Vec<ExtractionSession>,
}

/// Table store backed by memory, optionally mirrored to JSON files.
///
/// Every mutation happens under one lock and is written through to disk
/// before the lock is released. A failed write is rolled back, so memory
/// never holds a change the caller was told failed.
pub struct JsonStore {
    base_dir: Option<PathBuf>,
    tables: Mutex<Tables>,
}

impl JsonStore {
    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            base_dir: None,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Opens (or creates) a store in `base_dir`, loading existing tables.
    pub fn open<P: AsRef<Path>>(base_dir: P) -> Result<Self, StorageError> {
        let base_path = base_dir.as_ref().to_path_buf();

        // Create the base directory if it doesn't exist
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(StorageError::IoError)?;
        }

        let selectors: SelectorTable = read_json(&base_path.join(SELECTORS_FILE))?.unwrap_or_default();
        let products: BTreeMap<String, StoredProduct> =
            read_json(&base_path.join(PRODUCTS_FILE))?.unwrap_or_default();
        let sessions = read_sessions(&base_path.join(SESSIONS_FILE))?;

        tracing::info!(
            "Opened store at {} ({} selectors, {} products, {} sessions)",
            base_path.display(),
            selectors.rows.len(),
            products.len(),
            sessions.len()
        );

        Ok(Self {
            base_dir: Some(base_path),
            tables: Mutex::new(Tables {
                selectors,
                products,
                sessions,
            }),
        })
    }

    fn save_selectors(&self, table: &SelectorTable) -> Result<(), StorageError> {
        match &self.base_dir {
            Some(dir) => write_json(&dir.join(SELECTORS_FILE), table),
            None => Ok(()),
        }
    }

    fn save_products(&self, products: &BTreeMap<String, StoredProduct>) -> Result<(), StorageError> {
        match &self.base_dir {
            Some(dir) => write_json(&dir.join(PRODUCTS_FILE), products),
            None => Ok(()),
        }
    }

    fn append_session(&self, session: &ExtractionSession) -> Result<(), StorageError> {
        let Some(dir) = &self.base_dir else {
            return Ok(());
        };

        let line = serde_json::to_string(session)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(SESSIONS_FILE))
            .map_err(StorageError::IoError)?;
        writeln!(file, "{}", line).map_err(StorageError::IoError)?;
        Ok(())
    }
}

#[async_trait]
impl Persistence for JsonStore {
    async fn list_selectors(&self, domain: &str) -> Result<Vec<SelectorCandidate>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .selectors
            .rows
            .values()
            .filter(|row| row.domain == domain)
            .cloned()
            .collect())
    }

    async fn all_selectors(&self) -> Result<Vec<SelectorCandidate>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables.selectors.rows.values().cloned().collect())
    }

    async fn get_selector(&self, id: SelectorId) -> Result<Option<SelectorCandidate>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables.selectors.rows.get(&id.0).cloned())
    }

    async fn insert_selector(
        &self,
        selector: NewSelector,
    ) -> Result<(SelectorCandidate, bool), StorageError> {
        let mut tables = self.tables.lock().await;

        if let Some(existing) = tables
            .selectors
            .rows
            .values()
            .find(|row| row.domain == selector.domain && row.expression == selector.expression)
        {
            return Ok((existing.clone(), false));
        }

        tables.selectors.next_id += 1;
        let now = Utc::now();
        let row = SelectorCandidate {
            id: SelectorId(tables.selectors.next_id),
            domain: selector.domain,
            expression: selector.expression,
            quality_score: selector.quality_score,
            success_rate: selector.success_rate,
            usage_count: 0,
            last_used: now,
            created_at: now,
        };
        tables.selectors.rows.insert(row.id.0, row.clone());
        if let Err(e) = self.save_selectors(&tables.selectors) {
            tables.selectors.rows.remove(&row.id.0);
            tables.selectors.next_id -= 1;
            return Err(e);
        }

        tracing::debug!("Inserted selector {} for {}: {}", row.id, row.domain, row.expression);
        Ok((row, true))
    }

    async fn modify_selector(
        &self,
        id: SelectorId,
        apply: &(dyn for<'r> Fn(&'r SelectorCandidate) -> Write<SelectorCandidate> + Send + Sync),
    ) -> Result<RowChange<SelectorCandidate>, StorageError> {
        let mut tables = self.tables.lock().await;

        let Some(before) = tables.selectors.rows.get(&id.0).cloned() else {
            return Ok(RowChange::unchanged(None));
        };

        let after = match apply(&before) {
            Write::Put(mut row) => {
                row.id = id;
                tables.selectors.rows.insert(id.0, row.clone());
                Some(row)
            }
            Write::Delete => {
                tables.selectors.rows.remove(&id.0);
                None
            }
            Write::Keep => return Ok(RowChange::unchanged(Some(before))),
        };
        if let Err(e) = self.save_selectors(&tables.selectors) {
            tables.selectors.rows.insert(id.0, before);
            return Err(e);
        }

        Ok(RowChange {
            before: Some(before),
            after,
        })
    }

    async fn get_product(&self, key: &ProductKey) -> Result<Option<StoredProduct>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables.products.get(&key.to_string()).cloned())
    }

    async fn modify_product(
        &self,
        key: &ProductKey,
        apply: &(dyn for<'r> Fn(Option<&'r StoredProduct>) -> Write<StoredProduct> + Send + Sync),
    ) -> Result<RowChange<StoredProduct>, StorageError> {
        let mut tables = self.tables.lock().await;
        let row_key = key.to_string();
        let before = tables.products.get(&row_key).cloned();

        let after = match apply(before.as_ref()) {
            Write::Put(row) => {
                tables.products.insert(row_key.clone(), row.clone());
                Some(row)
            }
            Write::Delete => {
                tables.products.remove(&row_key);
                None
            }
            Write::Keep => return Ok(RowChange::unchanged(before)),
        };
        if let Err(e) = self.save_products(&tables.products) {
            match &before {
                Some(row) => tables.products.insert(row_key, row.clone()),
                None => tables.products.remove(&row_key),
            };
            return Err(e);
        }

        Ok(RowChange { before, after })
    }

    async fn list_products(&self, domain: &str) -> Result<Vec<StoredProduct>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .products
            .values()
            .filter(|p| p.key.domain == domain)
            .cloned()
            .collect())
    }

    async fn record_session(&self, session: &ExtractionSession) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().await;
        self.append_session(session)?;
        tables.sessions.push(session.clone());
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<ExtractionSession>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables.sessions.clone())
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(StorageError::IoError)?;
    let value = serde_json::from_str(&raw)
        .map_err(|e| StorageError::SerializationError(format!("{}: {}", path.display(), e)))?;
    Ok(Some(value))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;
    fs::write(path, body).map_err(StorageError::IoError)
}

fn read_sessions(path: &Path) -> Result<Vec<ExtractionSession>, StorageError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path).map_err(StorageError::IoError)?;
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| StorageError::SerializationError(e.to_string()))
        })
        .collect()
}
