use crate::config::LambdaConfig;
use crate::error::{BridgeError, Result};
use crate::models::FunctionDescriptor;
use crate::services::lambda::{FunctionPage, InvokeOutcome, LambdaClient, StubLambdaClient};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::retry::RetryConfig;
use aws_sdk_lambda::config::{Credentials, Region};
use aws_sdk_lambda::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{FunctionVersion, InvocationType};
use std::sync::Arc;
use tracing::info;

/// [`LambdaClient`] backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct AwsLambdaClient {
    client: aws_sdk_lambda::Client,
}

impl AwsLambdaClient {
    pub fn new(client: aws_sdk_lambda::Client) -> Self {
        Self { client }
    }
}

/// Service errors keep their code; transport errors become `Remote`.
fn remote_error<E, R>(e: SdkError<E, R>) -> BridgeError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match e.code() {
        Some(code) => BridgeError::RemoteInvocation {
            code: code.to_string(),
            body: e.message().unwrap_or_default().to_string(),
        },
        None => BridgeError::Remote(DisplayErrorContext(&e).to_string()),
    }
}

#[async_trait]
impl LambdaClient for AwsLambdaClient {
    async fn list_functions(&self, marker: Option<String>, max_items: i32) -> Result<FunctionPage> {
        let output = self
            .client
            .list_functions()
            .set_marker(marker)
            .max_items(max_items)
            .function_version(FunctionVersion::All)
            .send()
            .await
            .map_err(remote_error)?;

        let functions = output
            .functions()
            .iter()
            .filter_map(|f| {
                Some(FunctionDescriptor {
                    function_name: f.function_name()?.to_string(),
                    function_arn: f.function_arn().map(str::to_string),
                    runtime: f.runtime().map(|r| r.as_str().to_string()),
                    version: f.version().map(str::to_string),
                })
            })
            .collect();

        Ok(FunctionPage {
            functions,
            next_marker: output.next_marker().map(str::to_string),
        })
    }

    async fn invoke_event(&self, function_name: &str, payload: Vec<u8>) -> Result<InvokeOutcome> {
        let output = self
            .client
            .invoke()
            .function_name(function_name)
            .invocation_type(InvocationType::Event)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(remote_error)?;

        Ok(InvokeOutcome {
            status_code: output.status_code(),
            function_error: output.function_error().map(str::to_string),
            payload: output
                .payload()
                .map(|blob| String::from_utf8_lossy(blob.as_ref()).into_owned()),
        })
    }
}

/// Build the Lambda client described by `config`: the stub when
/// `stub_responses` is set, otherwise an SDK client with the configured
/// region, profile, endpoint, credentials and retry limit.
pub async fn setup_lambda_client(config: &LambdaConfig) -> Arc<dyn LambdaClient> {
    if config.stub_responses {
        info!("🧪 Lambda: stubbed responses, nothing leaves the process");
        return Arc::new(StubLambdaClient::new());
    }

    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &config.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(profile) = &config.profile {
        loader = loader.profile_name(profile);
    }
    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let (Some(access_key_id), Some(secret_access_key)) =
        (&config.access_key_id, &config.secret_access_key)
    {
        loader = loader.credentials_provider(Credentials::new(
            access_key_id,
            secret_access_key,
            config.session_token.clone(),
            None,
            "lambda-bridge",
        ));
    }
    if let Some(limit) = config.retry_limit {
        loader = loader.retry_config(RetryConfig::standard().with_max_attempts(limit + 1));
    }

    let sdk_config = loader.load().await;
    info!(
        "☁️  Lambda: region {}",
        sdk_config
            .region()
            .map(|r| r.as_ref().to_string())
            .unwrap_or_else(|| "<default>".to_string())
    );

    Arc::new(AwsLambdaClient::new(aws_sdk_lambda::Client::new(&sdk_config)))
}
