use crate::error::Result;
use crate::models::FunctionDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// What the Lambda API reported when it accepted (or refused) an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOutcome {
    pub status_code: i32,
    /// Set when the function itself reported an error
    pub function_error: Option<String>,
    pub payload: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FunctionPage {
    pub functions: Vec<FunctionDescriptor>,
    pub next_marker: Option<String>,
}

/// The two Lambda API calls the bridge needs.
#[async_trait]
pub trait LambdaClient: Send + Sync {
    /// One page of the account's functions (all versions).
    async fn list_functions(&self, marker: Option<String>, max_items: i32) -> Result<FunctionPage>;

    /// Invoke `function_name` asynchronously (`Event` invocation type). Only
    /// acceptance is awaited, never the function's result.
    async fn invoke_event(&self, function_name: &str, payload: Vec<u8>) -> Result<InvokeOutcome>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedInvocation {
    pub function_name: String,
    pub payload: Value,
}

/// In-memory client used when `stub_responses` is set: serves a fixed
/// function list and records every invocation instead of sending it.
#[derive(Debug, Default)]
pub struct StubLambdaClient {
    functions: Mutex<Vec<FunctionDescriptor>>,
    invocations: Mutex<Vec<RecordedInvocation>>,
    next_error: Mutex<Option<(String, String)>>,
    list_calls: AtomicUsize,
}

impl StubLambdaClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_functions<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            functions: Mutex::new(names.into_iter().map(FunctionDescriptor::named).collect()),
            ..Self::default()
        }
    }

    pub async fn add_function(&self, name: impl Into<String>) {
        self.functions.lock().await.push(FunctionDescriptor::named(name));
    }

    /// Make the next invocation come back with a function error.
    pub async fn fail_next_invocation(&self, code: impl Into<String>, body: impl Into<String>) {
        *self.next_error.lock().await = Some((code.into(), body.into()));
    }

    pub async fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.lock().await.clone()
    }

    /// Number of `list_functions` pages served.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LambdaClient for StubLambdaClient {
    async fn list_functions(&self, marker: Option<String>, max_items: i32) -> Result<FunctionPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let functions = self.functions.lock().await;

        let start = marker
            .and_then(|m| m.parse::<usize>().ok())
            .unwrap_or(0)
            .min(functions.len());
        let end = (start + max_items.max(1) as usize).min(functions.len());

        Ok(FunctionPage {
            functions: functions[start..end].to_vec(),
            next_marker: (end < functions.len()).then(|| end.to_string()),
        })
    }

    async fn invoke_event(&self, function_name: &str, payload: Vec<u8>) -> Result<InvokeOutcome> {
        let payload: Value = serde_json::from_slice(&payload)?;
        self.invocations.lock().await.push(RecordedInvocation {
            function_name: function_name.to_string(),
            payload,
        });

        Ok(match self.next_error.lock().await.take() {
            Some((code, body)) => InvokeOutcome {
                status_code: 200,
                function_error: Some(code),
                payload: Some(body),
            },
            None => InvokeOutcome {
                status_code: 202,
                function_error: None,
                payload: None,
            },
        })
    }
}
