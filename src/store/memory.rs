use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{sort_for_delivery, DeadLetter, DurableStore, MessageRowStore, RowQuery, StoreError};
use crate::models::Message;

// ============================================================================
// In-Memory Store
// ============================================================================
//
// Implements both storage contracts in process. Clones share the same data,
// so two "processes" built from clones of one store see each other's writes,
// which is how restarts are simulated in tests.
//
// Reads and writes can be made to fail independently.
//
// ============================================================================

#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<MemoryData>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

#[derive(Default)]
struct MemoryData {
    kv: HashMap<String, KvEntry>,
    rows: Vec<Message>,
    dead_letters: Vec<DeadLetter>,
}

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of live key/value entries.
    pub async fn kv_len(&self) -> usize {
        let now = Instant::now();
        let data = self.data.lock().await;
        data.kv.values().filter(|entry| entry.is_live(now)).count()
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_read()?;
        let now = Instant::now();
        let mut data = self.data.lock().await;

        match data.kv.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                data.kv.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.check_write()?;
        let entry = KvEntry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.data.lock().await.kv.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_write()?;
        self.data.lock().await.kv.remove(key);
        Ok(())
    }
}

#[async_trait]
impl MessageRowStore for MemoryStore {
    async fn insert_row(&self, message: &Message) -> Result<(), StoreError> {
        self.check_write()?;
        let mut data = self.data.lock().await;
        if data.rows.iter().any(|row| row.id == message.id) {
            return Ok(());
        }
        data.rows.push(message.clone());
        Ok(())
    }

    async fn select_rows(&self, query: &RowQuery) -> Result<Vec<Message>, StoreError> {
        self.check_read()?;
        let data = self.data.lock().await;

        let mut rows: Vec<Message> = data
            .rows
            .iter()
            .filter(|row| row.to == query.recipient && row.processed == query.processed)
            .cloned()
            .collect();

        sort_for_delivery(&mut rows);
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn update_processed(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_write()?;
        let mut data = self.data.lock().await;

        let row = data
            .rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if !row.processed {
            row.processed = true;
            row.processed_at = Some(at);
        }
        Ok(())
    }

    async fn get_row(&self, id: &str) -> Result<Option<Message>, StoreError> {
        self.check_read()?;
        let data = self.data.lock().await;
        Ok(data.rows.iter().find(|row| row.id == id).cloned())
    }

    async fn insert_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        self.check_write()?;
        let mut data = self.data.lock().await;
        data.dead_letters.retain(|parked| parked.message.id != letter.message.id);
        data.dead_letters.push(letter.clone());
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        self.check_read()?;
        let data = self.data.lock().await;
        let mut letters = data.dead_letters.clone();
        letters.sort_by_key(|letter| letter.failed_at);
        letters.truncate(limit);
        Ok(letters)
    }
}
