use async_trait::async_trait;
use file_lambda_bridge::config::LambdaConfig;
use file_lambda_bridge::error::BridgeError;
use file_lambda_bridge::models::{
    DispatchContext, FunctionDescriptor, PromoteJob, StorageKey, UploadedFile, VersionRequest,
};
use file_lambda_bridge::services::dispatcher::{
    DispatchPlan, DispatchResolver, LambdaDispatcher, StaticDispatchResolver,
};
use file_lambda_bridge::services::lambda::{FunctionPage, InvokeOutcome, LambdaClient, StubLambdaClient};
use file_lambda_bridge::services::memory_store::MemoryStore;
use file_lambda_bridge::services::records::{Attacher, RecordRegistry};
use file_lambda_bridge::services::registry::FunctionRegistry;
use file_lambda_bridge::services::storage::{StorageDescriptor, Storages};
use file_lambda_bridge::services::worker::{JobOutcome, PromoteWorker};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const CALLBACK_URL: &str = "https://app.example.com/lambda/callback";

fn config(validate_params: bool) -> Arc<LambdaConfig> {
    let mut settings = HashMap::new();
    settings.insert("callback_url".to_string(), CALLBACK_URL.to_string());
    settings.insert("validate_params".to_string(), validate_params.to_string());
    Arc::new(LambdaConfig::from_settings(settings).unwrap())
}

fn storages() -> Storages {
    Storages::new(
        StorageDescriptor::new("cache-bucket").with_prefix("cache"),
        StorageDescriptor::new("store-bucket").with_prefix("store"),
    )
}

fn cached_file() -> UploadedFile {
    UploadedFile::new("abc.png", StorageKey::Cache)
        .with_metadata("filename", "avatar.png")
        .with_metadata("mime_type", "image/png")
}

struct Harness {
    store: Arc<MemoryStore>,
    records: RecordRegistry,
    dispatcher: Arc<LambdaDispatcher>,
}

fn harness(
    client: Arc<dyn LambdaClient>,
    resolver: Arc<dyn DispatchResolver>,
    config: Arc<LambdaConfig>,
) -> Harness {
    let store = Arc::new(MemoryStore::new("User"));
    store.insert("1", "avatar_data", Some(cached_file().to_json().unwrap()));
    store.insert("1", "name", Some("Ada".to_string()));
    let records = RecordRegistry::new().register("User", store.clone());

    let registry = Arc::new(FunctionRegistry::new(client.clone()));
    let dispatcher = LambdaDispatcher::new(config, storages(), registry, client, resolver)
        .with_uploader("AvatarUploader");

    Harness {
        store,
        records,
        dispatcher: Arc::new(dispatcher),
    }
}

fn resize_resolver() -> Arc<dyn DispatchResolver> {
    Arc::new(
        StaticDispatchResolver::new(Some("Resize".to_string())).with_image_versions(vec![
            VersionRequest::new("original", StorageKey::Store),
            VersionRequest::new("thumb", StorageKey::Store).resize(300, 300),
        ]),
    )
}

async fn attacher(h: &Harness) -> (Attacher, DispatchContext) {
    let attacher = Attacher::new(h.records.find("User", "1").await.unwrap(), "avatar");
    let context = attacher.context(h.dispatcher.uploader());
    (attacher, context)
}

fn stored_file(h: &Harness) -> UploadedFile {
    UploadedFile::from_json(&h.store.attribute("1", "avatar_data").unwrap()).unwrap()
}

#[tokio::test]
async fn test_dispatch_builds_payload_and_persists_secret() {
    let stub = Arc::new(StubLambdaClient::with_functions(["Resize", "Transcode"]));
    let h = harness(stub.clone(), resize_resolver(), config(true));
    let (mut attacher, context) = attacher(&h).await;

    let payload = h.dispatcher.dispatch(&mut attacher, &context).await.unwrap();

    let invocations = stub.invocations().await;
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].function_name, "Resize");

    let sent = &invocations[0].payload;
    assert_eq!(sent["callbackURL"], CALLBACK_URL);
    assert_eq!(sent["copy_original"], true);
    assert_eq!(sent["target_storage"], "store");
    assert_eq!(
        sent["storages"],
        json!({
            "cache": {"name": "cache-bucket", "prefix": "cache"},
            "store": {"name": "store-bucket", "prefix": "store"}
        })
    );
    assert_eq!(
        sent["context"],
        json!({"record": ["User", "1"], "name": "avatar", "uploader": "AvatarUploader"})
    );
    assert_eq!(sent["versions"][1], json!({"name": "thumb", "storage": "store", "width": 300, "height": 300}));
    assert_eq!(sent["attachment"]["id"], "abc.png");
    assert_eq!(sent["path"], Value::String(payload.path.clone()));
    assert!(payload.path.ends_with(".png"));

    let key = sent["attachment"]["metadata"]["key"].as_str().unwrap();
    assert_eq!(key.len(), 16);

    // The stored attachment carries the same secret, saved without validation.
    let stored = stored_file(&h);
    assert_eq!(stored.metadata["key"], key);
    assert_eq!(stored.metadata["filename"], "avatar.png");
    assert_eq!(h.store.saves(), vec![("1".to_string(), false)]);
    assert_eq!(h.store.attribute("1", "name").as_deref(), Some("Ada"));
}

#[tokio::test]
async fn test_each_dispatch_issues_a_fresh_secret() {
    let stub = Arc::new(StubLambdaClient::with_functions(["Resize"]));
    let h = harness(stub.clone(), resize_resolver(), config(true));

    let (mut first, context) = attacher(&h).await;
    h.dispatcher.dispatch(&mut first, &context).await.unwrap();
    let (mut second, context) = attacher(&h).await;
    h.dispatcher.dispatch(&mut second, &context).await.unwrap();

    let invocations = stub.invocations().await;
    assert_ne!(
        invocations[0].payload["attachment"]["metadata"]["key"],
        invocations[1].payload["attachment"]["metadata"]["key"]
    );
    assert_eq!(stub.list_calls(), 1);
}

#[tokio::test]
async fn test_no_function_fails_before_any_network_call() {
    let stub = Arc::new(StubLambdaClient::with_functions(["Resize"]));
    let h = harness(stub.clone(), Arc::new(StaticDispatchResolver::new(None)), config(true));
    let (mut attacher, context) = attacher(&h).await;

    let err = h.dispatcher.dispatch(&mut attacher, &context).await.unwrap_err();
    assert!(matches!(err, BridgeError::NoFunctionSpecified));
    assert_eq!(stub.list_calls(), 0);
    assert!(stub.invocations().await.is_empty());
    assert!(h.store.saves().is_empty());
}

#[tokio::test]
async fn test_unavailable_function_is_rejected() {
    let stub = Arc::new(StubLambdaClient::with_functions(["Transcode"]));
    let h = harness(stub.clone(), resize_resolver(), config(true));
    let (mut attacher, context) = attacher(&h).await;

    let err = h.dispatcher.dispatch(&mut attacher, &context).await.unwrap_err();
    assert!(matches!(err, BridgeError::FunctionUnavailable(name) if name == "Resize"));
    assert!(stub.invocations().await.is_empty());
    assert_eq!(stored_file(&h).metadata.get("key"), None);
}

#[tokio::test]
async fn test_remote_error_is_surfaced_and_nothing_persisted() {
    let stub = Arc::new(StubLambdaClient::with_functions(["Resize"]));
    stub.fail_next_invocation("Unhandled", r#"{"errorMessage":"boom"}"#).await;
    let h = harness(stub.clone(), resize_resolver(), config(true));
    let (mut attacher, context) = attacher(&h).await;

    let err = h.dispatcher.dispatch(&mut attacher, &context).await.unwrap_err();
    match err {
        BridgeError::RemoteInvocation { code, body } => {
            assert_eq!(code, "Unhandled");
            assert!(body.contains("boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.store.saves().is_empty());
    assert_eq!(stored_file(&h).metadata.get("key"), None);
}

struct PlanResolver(DispatchPlan);

impl DispatchResolver for PlanResolver {
    fn resolve_dispatch(&self, _file: &UploadedFile, _context: &DispatchContext) -> DispatchPlan {
        self.0.clone()
    }
}

#[tokio::test]
async fn test_plan_fields_are_merged_into_payload() {
    let stub = Arc::new(StubLambdaClient::with_functions(["Transcode"]));
    let plan = DispatchPlan::function("Transcode")
        .with_copy_original(false)
        .with_field("bitrate", 128)
        .with_field("callbackURL", "https://evil.example.com");
    let h = harness(stub.clone(), Arc::new(PlanResolver(plan)), config(true));
    let (mut attacher, context) = attacher(&h).await;

    h.dispatcher.dispatch(&mut attacher, &context).await.unwrap();

    let sent = &stub.invocations().await[0].payload;
    assert_eq!(sent["bitrate"], 128);
    assert_eq!(sent["copy_original"], false);
    assert_eq!(sent["callbackURL"], CALLBACK_URL);
    assert!(sent.get("versions").is_none());
}

#[tokio::test]
async fn test_oversized_payload_is_rejected_when_validating() {
    let plan = DispatchPlan::function("Resize").with_field("blob", "x".repeat(300 * 1024));

    let stub = Arc::new(StubLambdaClient::with_functions(["Resize"]));
    let h = harness(stub.clone(), Arc::new(PlanResolver(plan.clone())), config(true));
    let (mut attacher, context) = attacher(&h).await;
    let err = h.dispatcher.dispatch(&mut attacher, &context).await.unwrap_err();
    assert!(matches!(err, BridgeError::InvalidParams(_)));
    assert!(stub.invocations().await.is_empty());

    let stub = Arc::new(StubLambdaClient::with_functions(["Resize"]));
    let h = harness(stub.clone(), Arc::new(PlanResolver(plan)), config(false));
    let (mut attacher, context) = self::attacher(&h).await;
    h.dispatcher.dispatch(&mut attacher, &context).await.unwrap();
    assert_eq!(stub.invocations().await.len(), 1);
}

#[tokio::test]
async fn test_payload_limit_is_configurable() {
    let plan = DispatchPlan::function("Resize").with_field("blob", "x".repeat(300 * 1024));
    let mut settings = HashMap::new();
    settings.insert("callback_url".to_string(), CALLBACK_URL.to_string());
    settings.insert("max_payload_bytes".to_string(), (1024 * 1024).to_string());
    let config = Arc::new(LambdaConfig::from_settings(settings).unwrap());
    assert!(config.validate_params);

    let stub = Arc::new(StubLambdaClient::with_functions(["Resize"]));
    let h = harness(stub.clone(), Arc::new(PlanResolver(plan)), config);
    let (mut attacher, context) = attacher(&h).await;
    h.dispatcher.dispatch(&mut attacher, &context).await.unwrap();
    assert_eq!(stub.invocations().await.len(), 1);
}

/// Replaces the attachment while the invocation is in flight.
struct RacingClient {
    inner: StubLambdaClient,
    store: Arc<MemoryStore>,
}

#[async_trait]
impl LambdaClient for RacingClient {
    async fn list_functions(
        &self,
        marker: Option<String>,
        max_items: i32,
    ) -> file_lambda_bridge::error::Result<FunctionPage> {
        self.inner.list_functions(marker, max_items).await
    }

    async fn invoke_event(
        &self,
        function_name: &str,
        payload: Vec<u8>,
    ) -> file_lambda_bridge::error::Result<InvokeOutcome> {
        let replacement = UploadedFile::new("other.png", StorageKey::Cache);
        self.store
            .insert("1", "avatar_data", Some(replacement.to_json().unwrap()));
        self.inner.invoke_event(function_name, payload).await
    }
}

#[tokio::test]
async fn test_attachment_changed_during_dispatch() {
    let store = Arc::new(MemoryStore::new("User"));
    store.insert("1", "avatar_data", Some(cached_file().to_json().unwrap()));
    let records = RecordRegistry::new().register("User", store.clone());

    let client = Arc::new(RacingClient {
        inner: StubLambdaClient::with_functions(["Resize"]),
        store: store.clone(),
    });
    let registry = Arc::new(FunctionRegistry::new(client.clone()));
    let dispatcher = LambdaDispatcher::new(config(true), storages(), registry, client, resize_resolver());

    let mut attacher = Attacher::new(records.find("User", "1").await.unwrap(), "avatar");
    let context = attacher.context("AvatarUploader");
    let err = dispatcher.dispatch(&mut attacher, &context).await.unwrap_err();

    assert!(matches!(err, BridgeError::AttachmentChanged));
    let stored = UploadedFile::from_json(&store.attribute("1", "avatar_data").unwrap()).unwrap();
    assert_eq!(stored.id, "other.png");
    assert!(store.saves().is_empty());
}

#[tokio::test]
async fn test_missing_attachment() {
    let stub = Arc::new(StubLambdaClient::with_functions(["Resize"]));
    let h = harness(stub.clone(), resize_resolver(), config(true));
    let mut attacher = Attacher::new(h.records.find("User", "1").await.unwrap(), "cover");
    let context = attacher.context("CoverUploader");

    let err = h.dispatcher.dispatch(&mut attacher, &context).await.unwrap_err();
    assert!(matches!(err, BridgeError::MissingAttachment(name) if name == "cover"));
}

#[tokio::test]
async fn test_worker_processes_jobs() {
    let stub = Arc::new(StubLambdaClient::new());
    let h = harness(stub.clone(), resize_resolver(), config(true));
    stub.add_function("Resize").await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (_jobs_tx, jobs_rx) = mpsc::channel(1);
    let worker = PromoteWorker::new(h.dispatcher.clone(), h.records.clone(), jobs_rx, shutdown_rx);

    let job = PromoteJob {
        record_type: "User".to_string(),
        record_id: "1".to_string(),
        name: "avatar".to_string(),
        file_data: cached_file(),
    };
    let stale = PromoteJob {
        file_data: UploadedFile::new("old.png", StorageKey::Cache),
        ..job.clone()
    };
    let unknown = PromoteJob {
        record_type: "Post".to_string(),
        ..job.clone()
    };

    assert_eq!(worker.process(&stale).await, JobOutcome::Stale);
    assert_eq!(worker.process(&unknown).await, JobOutcome::Failed);
    assert!(stub.invocations().await.is_empty());

    assert_eq!(worker.process(&job).await, JobOutcome::Dispatched);
    assert_eq!(stub.invocations().await.len(), 1);
}

#[tokio::test]
async fn test_worker_runs_until_queue_closes() {
    let stub = Arc::new(StubLambdaClient::with_functions(["Resize"]));
    let h = harness(stub.clone(), resize_resolver(), config(true));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (jobs_tx, jobs_rx) = mpsc::channel(4);
    let worker = PromoteWorker::new(h.dispatcher.clone(), h.records.clone(), jobs_rx, shutdown_rx);
    let handle = tokio::spawn(worker.run());

    jobs_tx
        .send(PromoteJob {
            record_type: "User".to_string(),
            record_id: "1".to_string(),
            name: "avatar".to_string(),
            file_data: cached_file(),
        })
        .await
        .unwrap();
    drop(jobs_tx);
    handle.await.unwrap();

    assert_eq!(stub.invocations().await.len(), 1);
}

#[tokio::test]
async fn test_worker_stops_on_shutdown() {
    let stub = Arc::new(StubLambdaClient::with_functions(["Resize"]));
    let h = harness(stub.clone(), resize_resolver(), config(true));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (_jobs_tx, jobs_rx) = mpsc::channel(4);
    let worker = PromoteWorker::new(h.dispatcher.clone(), h.records.clone(), jobs_rx, shutdown_rx);
    let handle = tokio::spawn(worker.run());

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    assert!(stub.invocations().await.is_empty());
}

#[tokio::test]
async fn test_registry_seeded_list_is_used() {
    let stub = Arc::new(StubLambdaClient::new());
    let registry = FunctionRegistry::new(stub.clone());
    registry
        .seed(vec![FunctionDescriptor::named("Resize")])
        .await;
    assert!(registry.is_available("Resize").await.unwrap());
    assert_eq!(stub.list_calls(), 0);
}
