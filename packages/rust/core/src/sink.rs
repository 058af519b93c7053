//! In-process [`Sink`] used when no database is configured.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use curator_shared::{Record, Result, Sink};

#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<HashMap<String, Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Record> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Record>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn put(&self, key: &str, record: &Record) -> Result<()> {
        self.lock().insert(key.to_string(), record.clone());
        Ok(())
    }
}
