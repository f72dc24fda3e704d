use crate::error::{BridgeError, Result};
use crate::models::UploadedFile;
use crate::services::records::{Persistable, Record, RecordResolver, still_attached};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Process-local record store for one record type.
#[derive(Debug)]
pub struct MemoryStore {
    record_type: String,
    records: DashMap<String, BTreeMap<String, Option<String>>>,
    saves: Mutex<Vec<(String, bool)>>,
}

impl MemoryStore {
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            records: DashMap::new(),
            saves: Mutex::new(Vec::new()),
        }
    }

    /// Set one attribute, creating the record if needed. Not counted as a save.
    pub fn insert(&self, id: &str, attribute: &str, value: Option<String>) {
        self.records
            .entry(id.to_string())
            .or_default()
            .insert(attribute.to_string(), value);
    }

    fn record_saved(&self, id: &str, validate: bool) {
        if let Ok(mut saves) = self.saves.lock() {
            saves.push((id.to_string(), validate));
        }
    }

    pub fn attribute(&self, id: &str, attribute: &str) -> Option<String> {
        self.records.get(id)?.get(attribute)?.clone()
    }

    /// Every save so far as `(id, validate)`.
    pub fn saves(&self) -> Vec<(String, bool)> {
        self.saves.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RecordResolver for MemoryStore {
    async fn resolve(&self, id: &str) -> Result<Option<Record>> {
        Ok(self.records.get(id).map(|attributes| Record {
            record_type: self.record_type.clone(),
            id: id.to_string(),
            attributes: attributes.clone(),
        }))
    }
}

#[async_trait]
impl Persistable for MemoryStore {
    async fn save(&self, record: &Record, validate: bool) -> Result<()> {
        self.records
            .insert(record.id.clone(), record.attributes.clone());
        self.record_saved(&record.id, validate);
        tracing::debug!("💾 Saved {} {} in memory", self.record_type, record.id);
        Ok(())
    }

    async fn swap_attachment(
        &self,
        id: &str,
        attribute: &str,
        expected: &UploadedFile,
        data: &str,
    ) -> Result<Record> {
        // The entry guard locks the record until the write is done.
        let mut attributes = self
            .records
            .get_mut(id)
            .ok_or_else(|| BridgeError::RecordNotFound {
                record_type: self.record_type.clone(),
                id: id.to_string(),
            })?;

        let stored = attributes.get(attribute).and_then(|v| v.as_deref());
        if !still_attached(stored, expected)? {
            return Err(BridgeError::AttachmentChanged);
        }
        attributes.insert(attribute.to_string(), Some(data.to_string()));

        let record = Record {
            record_type: self.record_type.clone(),
            id: id.to_string(),
            attributes: attributes.clone(),
        };
        drop(attributes);

        self.record_saved(id, false);
        tracing::debug!("💾 Swapped {} on {} {} in memory", attribute, self.record_type, id);
        Ok(record)
    }
}
