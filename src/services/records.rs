use crate::error::{BridgeError, Result};
use crate::models::{DispatchContext, UploadedFile};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A loaded record: its type tag, id, and the string attributes the bridge
/// reads and writes (attachment attributes are named `<name>_data`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub record_type: String,
    pub id: String,
    pub attributes: BTreeMap<String, Option<String>>,
}

impl Record {
    pub fn new(record_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_deref())
    }

    pub fn set_attribute(&mut self, name: &str, value: Option<String>) {
        self.attributes.insert(name.to_string(), value);
    }
}

/// Looks records of one type up by id.
#[async_trait]
pub trait RecordResolver: Send + Sync {
    async fn resolve(&self, id: &str) -> Result<Option<Record>>;
}

/// Writes a record back to wherever it lives. `validate = false` skips the
/// store's own checks, which is how processed results are written.
#[async_trait]
pub trait Persistable: Send + Sync {
    async fn save(&self, record: &Record, validate: bool) -> Result<()>;

    /// Replace `attribute` with `data` only while it still holds `expected`,
    /// checking and writing as one operation. Fails with `AttachmentChanged`
    /// otherwise. Returns the record as stored afterwards.
    async fn swap_attachment(
        &self,
        id: &str,
        attribute: &str,
        expected: &UploadedFile,
        data: &str,
    ) -> Result<Record>;
}

/// Whether the serialized attachment `stored` still refers to `expected`.
pub fn still_attached(stored: Option<&str>, expected: &UploadedFile) -> Result<bool> {
    match stored {
        Some(data) => Ok(UploadedFile::from_json(data)?.same_file(expected)),
        None => Ok(false),
    }
}

/// A store that can both find and save records of a type.
pub trait RecordAdapter: RecordResolver + Persistable {}

impl<T: RecordResolver + Persistable> RecordAdapter for T {}

/// Record types known to the bridge, each bound to its adapter at setup.
#[derive(Clone, Default)]
pub struct RecordRegistry {
    adapters: HashMap<String, Arc<dyn RecordAdapter>>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, record_type: impl Into<String>, adapter: Arc<dyn RecordAdapter>) -> Self {
        self.adapters.insert(record_type.into(), adapter);
        self
    }

    pub async fn find(&self, record_type: &str, id: &str) -> Result<RecordHandle> {
        let adapter = self
            .adapters
            .get(record_type)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownRecordType(record_type.to_string()))?;

        let record = adapter
            .resolve(id)
            .await?
            .ok_or_else(|| BridgeError::RecordNotFound {
                record_type: record_type.to_string(),
                id: id.to_string(),
            })?;

        Ok(RecordHandle { record, adapter })
    }
}

/// A record together with the adapter that loaded it.
#[derive(Clone)]
pub struct RecordHandle {
    pub record: Record,
    adapter: Arc<dyn RecordAdapter>,
}

impl RecordHandle {
    pub async fn save(&self, validate: bool) -> Result<()> {
        self.adapter.save(&self.record, validate).await
    }
}

/// One named attachment of a record.
#[derive(Clone)]
pub struct Attacher {
    handle: RecordHandle,
    name: String,
}

impl Attacher {
    pub fn new(handle: RecordHandle, name: impl Into<String>) -> Self {
        Self {
            handle,
            name: name.into(),
        }
    }

    /// Load the record and bind the attachment, making sure it still holds
    /// `file_data`.
    pub async fn retrieve(
        records: &RecordRegistry,
        record_type: &str,
        record_id: &str,
        name: &str,
        file_data: &UploadedFile,
    ) -> Result<Self> {
        let attacher = Self::new(records.find(record_type, record_id).await?, name);
        match attacher.file()? {
            Some(current) if current.same_file(file_data) => Ok(attacher),
            _ => Err(BridgeError::AttachmentChanged),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self) -> &Record {
        &self.handle.record
    }

    pub fn attribute(&self) -> String {
        format!("{}_data", self.name)
    }

    /// Raw serialized attachment.
    pub fn data(&self) -> Option<&str> {
        self.handle.record.attribute(&self.attribute())
    }

    pub fn file(&self) -> Result<Option<UploadedFile>> {
        self.data()
            .map(UploadedFile::from_json)
            .transpose()
            .map_err(BridgeError::from)
    }

    pub fn set(&mut self, file: &UploadedFile) -> Result<()> {
        let data = file.to_json()?;
        self.write(data);
        Ok(())
    }

    /// Replace the serialized attachment.
    pub fn write(&mut self, data: String) {
        let attribute = self.attribute();
        self.handle.record.set_attribute(&attribute, Some(data));
    }

    pub async fn save(&self, validate: bool) -> Result<()> {
        self.handle.save(validate).await
    }

    /// Save the current attachment only if the stored record still refers to
    /// `original`. Only the attachment attribute is written, so other
    /// attributes changed in the meantime are kept; the attacher then holds
    /// the stored record.
    pub async fn atomic_persist(&mut self, original: &UploadedFile) -> Result<()> {
        let data = self.data().unwrap_or_default().to_string();
        let record = self
            .handle
            .adapter
            .swap_attachment(&self.handle.record.id, &self.attribute(), original, &data)
            .await?;
        self.handle.record = record;
        Ok(())
    }

    pub fn context(&self, uploader: impl Into<String>) -> DispatchContext {
        DispatchContext {
            record_type: self.handle.record.record_type.clone(),
            record_id: self.handle.record.id.clone(),
            name: self.name.clone(),
            uploader: uploader.into(),
        }
    }
}
