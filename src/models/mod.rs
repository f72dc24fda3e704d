use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use utoipa::ToSchema;

/// Role of a storage: `cache` holds pending uploads, `store` is the
/// destination the Lambda function writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StorageKey {
    Cache,
    Store,
}

impl StorageKey {
    pub const ALL: [StorageKey; 2] = [StorageKey::Cache, StorageKey::Store];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file sitting in one of the storages, as it is serialized into a
/// record's attachment attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    pub storage: StorageKey,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl UploadedFile {
    pub fn new(id: impl Into<String>, storage: StorageKey) -> Self {
        Self {
            id: id.into(),
            storage,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.metadata.get("mime_type").and_then(Value::as_str)
    }

    pub fn filename(&self) -> Option<&str> {
        self.metadata.get("filename").and_then(Value::as_str)
    }

    /// Lowercased extension (with the leading dot) taken from the id, or
    /// from the original filename when the id has none.
    pub fn extension(&self) -> Option<String> {
        let from = |name: &str| {
            Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .filter(|e| !e.is_empty())
                .map(|e| format!(".{}", e.to_lowercase()))
        };
        from(&self.id).or_else(|| self.filename().and_then(from))
    }

    /// Two references point at the same stored object when id and storage
    /// agree; metadata may differ.
    pub fn same_file(&self, other: &UploadedFile) -> bool {
        self.id == other.id && self.storage == other.storage
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

/// Who is being processed: the record, its attachment and the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    pub record_type: String,
    pub record_id: String,
    pub name: String,
    pub uploader: String,
}

/// The context block carried in the dispatch payload and echoed back by the
/// Lambda function in its callback. `record` is `[record_type, record_id]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub record: (String, Value),
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
}

impl ContextBlock {
    pub fn record_type(&self) -> &str {
        &self.record.0
    }

    /// Record ids may come back as JSON strings or numbers.
    pub fn record_id(&self) -> Option<String> {
        match &self.record.1 {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl From<&DispatchContext> for ContextBlock {
    fn from(context: &DispatchContext) -> Self {
        Self {
            record: (
                context.record_type.clone(),
                Value::String(context.record_id.clone()),
            ),
            name: context.name.clone(),
            uploader: Some(context.uploader.clone()),
        }
    }
}

/// A processed version the Lambda function should produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VersionRequest {
    pub name: String,
    pub storage: StorageKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl VersionRequest {
    pub fn new(name: impl Into<String>, storage: StorageKey) -> Self {
        Self {
            name: name.into(),
            storage,
            width: None,
            height: None,
            format: None,
        }
    }

    pub fn resize(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// Bucket routing for one storage role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRoute {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_options: Option<Map<String, Value>>,
}

/// The document sent as the asynchronous invocation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPayload {
    #[serde(rename = "callbackURL")]
    pub callback_url: String,
    pub copy_original: bool,
    pub storages: BTreeMap<StorageKey, StorageRoute>,
    pub target_storage: StorageKey,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<VersionRequest>,
    pub path: String,
    pub attachment: UploadedFile,
    pub context: ContextBlock,
    /// Function-specific fields supplied by the dispatch hook
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl FunctionDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            function_name: name.into(),
            function_arn: None,
            runtime: None,
            version: None,
        }
    }
}

/// A promotion handed to the background worker: process the file currently
/// attached as `name` on the given record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoteJob {
    pub record_type: String,
    pub record_id: String,
    pub name: String,
    pub file_data: UploadedFile,
}
