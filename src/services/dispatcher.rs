use crate::config::LambdaConfig;
use crate::error::{BridgeError, Result};
use crate::models::{
    ContextBlock, DispatchContext, DispatchPayload, StorageKey, UploadedFile, VersionRequest,
};
use crate::services::key_store::EphemeralKeys;
use crate::services::lambda::LambdaClient;
use crate::services::records::Attacher;
use crate::services::registry::FunctionRegistry;
use crate::services::storage::Storages;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Payload keys owned by the dispatcher; extra fields may not replace them.
const RESERVED_FIELDS: [&str; 8] = [
    "attachment",
    "callbackURL",
    "context",
    "copy_original",
    "path",
    "storages",
    "target_storage",
    "versions",
];

/// What to run for one upload, as decided by the application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchPlan {
    pub function: Option<String>,
    pub versions: Vec<VersionRequest>,
    /// Overrides the default of copying the original to the store
    pub copy_original: Option<bool>,
    /// Function-specific fields merged into the payload
    pub extra: Map<String, Value>,
}

impl DispatchPlan {
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            function: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_versions(mut self, versions: Vec<VersionRequest>) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_copy_original(mut self, copy_original: bool) -> Self {
        self.copy_original = Some(copy_original);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Decides which function processes a file and which versions it produces.
pub trait DispatchResolver: Send + Sync {
    fn resolve_dispatch(&self, file: &UploadedFile, context: &DispatchContext) -> DispatchPlan;
}

/// Sends every file to one function. Image versions are requested only for
/// files whose mime type is `image/*`.
#[derive(Debug, Clone, Default)]
pub struct StaticDispatchResolver {
    function: Option<String>,
    image_versions: Vec<VersionRequest>,
}

impl StaticDispatchResolver {
    pub fn new(function: Option<String>) -> Self {
        Self {
            function: function.filter(|f| !f.is_empty()),
            image_versions: Vec::new(),
        }
    }

    pub fn with_image_versions(mut self, versions: Vec<VersionRequest>) -> Self {
        self.image_versions = versions;
        self
    }
}

impl DispatchResolver for StaticDispatchResolver {
    fn resolve_dispatch(&self, file: &UploadedFile, _context: &DispatchContext) -> DispatchPlan {
        let is_image = file.mime_type().is_some_and(|m| m.starts_with("image/"));
        DispatchPlan {
            function: self.function.clone(),
            versions: if is_image {
                self.image_versions.clone()
            } else {
                Vec::new()
            },
            ..DispatchPlan::default()
        }
    }
}

/// Builds the invocation payload for an attachment, fires the function
/// asynchronously and persists the signed attachment.
pub struct LambdaDispatcher {
    config: Arc<LambdaConfig>,
    storages: Storages,
    registry: Arc<FunctionRegistry>,
    client: Arc<dyn LambdaClient>,
    resolver: Arc<dyn DispatchResolver>,
    uploader: String,
}

impl LambdaDispatcher {
    pub fn new(
        config: Arc<LambdaConfig>,
        storages: Storages,
        registry: Arc<FunctionRegistry>,
        client: Arc<dyn LambdaClient>,
        resolver: Arc<dyn DispatchResolver>,
    ) -> Self {
        Self {
            config,
            storages,
            registry,
            client,
            resolver,
            uploader: "Uploader".to_string(),
        }
    }

    /// Name reported as `context.uploader`.
    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = uploader.into();
        self
    }

    pub fn uploader(&self) -> &str {
        &self.uploader
    }

    pub async fn dispatch(
        &self,
        attacher: &mut Attacher,
        context: &DispatchContext,
    ) -> Result<DispatchPayload> {
        let original = attacher
            .file()?
            .ok_or_else(|| BridgeError::MissingAttachment(attacher.name().to_string()))?;

        let plan = self.resolver.resolve_dispatch(&original, context);
        let function = plan
            .function
            .filter(|f| !f.is_empty())
            .ok_or(BridgeError::NoFunctionSpecified)?;

        if !self.registry.is_available(&function).await? {
            return Err(BridgeError::FunctionUnavailable(function));
        }

        let storages = self.storages.routes(&original, context);

        let mut file = original.clone();
        EphemeralKeys::insert(&mut file);
        let path = self.storages.store.generate_location(&file, context);

        let mut extra = plan.extra;
        for field in RESERVED_FIELDS {
            if extra.remove(field).is_some() {
                tracing::warn!("⚠️ Ignoring reserved payload field '{}' from dispatch plan", field);
            }
        }

        let payload = DispatchPayload {
            callback_url: self.config.callback_url.clone(),
            copy_original: plan.copy_original.unwrap_or(true),
            storages,
            target_storage: StorageKey::Store,
            versions: plan.versions,
            path,
            attachment: file.clone(),
            context: ContextBlock::from(context),
            extra,
        };

        let body = serde_json::to_vec(&payload)?;
        if self.config.validate_params && body.len() > self.config.max_payload_bytes {
            return Err(BridgeError::InvalidParams(format!(
                "payload is {} bytes, the configured limit is {} bytes",
                body.len(),
                self.config.max_payload_bytes
            )));
        }

        tracing::info!(
            "🚀 Invoking {} for {} {} ({})",
            function,
            context.record_type,
            context.record_id,
            context.name
        );
        let outcome = self.client.invoke_event(&function, body).await?;
        if let Some(code) = outcome.function_error {
            tracing::error!("❌ {} rejected the invocation: {}", function, code);
            return Err(BridgeError::RemoteInvocation {
                code,
                body: outcome.payload.unwrap_or_default(),
            });
        }

        attacher.set(&file)?;
        attacher.atomic_persist(&original).await?;

        tracing::info!("✅ {} accepted {}", function, payload.path);
        Ok(payload)
    }
}
