use crate::config::LambdaConfig;
use crate::models::ContextBlock;
use crate::services::key_store::{EphemeralKeys, FALLBACK_SECRET};
use crate::services::records::{Attacher, RecordRegistry};
use crate::services::signer::{AuthorizationHeader, SignableRequest, Signer};
use crate::utils::hash::constant_time_eq;
use axum::http::HeaderMap;
use serde_json::Value;
use std::sync::Arc;

/// A callback whose signature checked out.
#[derive(Clone)]
pub struct Authorized {
    pub attacher: Attacher,
    /// The parsed callback body, unchanged
    pub result: Value,
}

/// Verifies that a callback was signed with the secret handed to the Lambda
/// function at dispatch time.
#[derive(Clone)]
pub struct CallbackAuthenticator {
    config: Arc<LambdaConfig>,
    records: RecordRegistry,
}

impl CallbackAuthenticator {
    pub fn new(config: Arc<LambdaConfig>, records: RecordRegistry) -> Self {
        Self { config, records }
    }

    pub fn records(&self) -> &RecordRegistry {
        &self.records
    }

    /// Returns the attacher and parsed result when the request is authentic.
    /// Every failure yields `None`; the reason is only logged.
    pub async fn authorize(&self, headers: &HeaderMap, body: &str) -> Option<Authorized> {
        let result: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("🔒 Rejected callback: body is not JSON ({})", e);
                return None;
            }
        };

        let context: ContextBlock = match result.get("context").cloned().map(serde_json::from_value) {
            Some(Ok(context)) => context,
            _ => {
                tracing::warn!("🔒 Rejected callback: missing or malformed context");
                return None;
            }
        };
        let record_type = context.record_type();
        let Some(record_id) = context.record_id() else {
            tracing::warn!("🔒 Rejected callback for {}: missing record id", record_type);
            return None;
        };

        let handle = match self.records.find(record_type, &record_id).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("🔒 Rejected callback for {} {}: {}", record_type, record_id, e);
                return None;
            }
        };
        let attacher = Attacher::new(handle, context.name.clone());

        let secret = match EphemeralKeys::read_from_attribute(attacher.data()) {
            Some(secret) => secret,
            None if self.config.allow_fallback_secret => {
                tracing::warn!(
                    "⚠️ No signing secret stored for {} {} ({}), using the fallback secret",
                    record_type,
                    record_id,
                    context.name
                );
                FALLBACK_SECRET.to_string()
            }
            None => {
                tracing::warn!(
                    "🔒 Rejected callback for {} {} ({}): no signing secret stored",
                    record_type,
                    record_id,
                    context.name
                );
                return None;
            }
        };

        let header = match header_str(headers, "authorization").map(AuthorizationHeader::parse) {
            Some(Ok(header)) => header,
            Some(Err(e)) => {
                tracing::warn!("🔒 Rejected callback for {} {}: {}", record_type, record_id, e);
                return None;
            }
            None => {
                tracing::warn!(
                    "🔒 Rejected callback for {} {}: missing Authorization header",
                    record_type,
                    record_id
                );
                return None;
            }
        };
        let Some(date) = header_str(headers, "x-amz-date") else {
            tracing::warn!("🔒 Rejected callback for {} {}: missing X-Amz-Date header", record_type, record_id);
            return None;
        };

        let signer = Signer::for_scope(&header.credential, secret)
            .with_session_token(header_str(headers, "x-amz-security-token").map(str::to_string));
        let request = SignableRequest::new("PUT", &self.config.callback_url, body.as_bytes())
            .header("X-Amz-Date", date);
        let expected = match signer.sign_request(&request) {
            Ok(signature) => signature,
            Err(e) => {
                tracing::warn!("🔒 Rejected callback for {} {}: {}", record_type, record_id, e);
                return None;
            }
        };

        if !constant_time_eq(&header.signature, expected.signature()) {
            tracing::warn!("🔒 Rejected callback for {} {}: signature mismatch", record_type, record_id);
            return None;
        }

        tracing::info!("🔓 Authorized callback for {} {} ({})", record_type, record_id, context.name);
        Some(Authorized { attacher, result })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StorageKey, UploadedFile};
    use crate::services::memory_store::MemoryStore;
    use axum::http::HeaderValue;
    use serde_json::json;

    const CALLBACK_URL: &str = "https://app.example.com/lambda/callback";
    const DATE: &str = "20200307T101010Z";

    fn setup(secret: Option<&str>, allow_fallback: bool) -> CallbackAuthenticator {
        let store = Arc::new(MemoryStore::new("User"));
        let mut file = UploadedFile::new("abc.png", StorageKey::Cache);
        if let Some(secret) = secret {
            file = file.with_metadata("key", secret);
        }
        store.insert("1", "avatar_data", Some(file.to_json().unwrap()));

        let config = LambdaConfig::new(CALLBACK_URL)
            .unwrap()
            .with_fallback_secret(allow_fallback);
        CallbackAuthenticator::new(Arc::new(config), RecordRegistry::new().register("User", store))
    }

    fn signed_headers(secret: &str, body: &str) -> HeaderMap {
        let request = SignableRequest::new("PUT", CALLBACK_URL, body.as_bytes()).header("X-Amz-Date", DATE);
        let signature = Signer::new("AKIAEXAMPLE", secret, "us-east-1", "lambda")
            .sign_request(&request)
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(&signature.authorization.to_string()).unwrap());
        headers.insert("x-amz-date", HeaderValue::from_static(DATE));
        headers.insert("user-agent", HeaderValue::from_static("aws-lambda"));
        headers
    }

    fn body() -> String {
        json!({
            "context": {"record": ["User", 1], "name": "avatar"},
            "id": "processed.png",
            "storage": "store",
            "metadata": {"key": "c2VjcmV0c2VjcmV0"}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_accepts_a_valid_signature() {
        let auth = setup(Some("c2VjcmV0c2VjcmV0"), false);
        let body = body();
        let authorized = auth
            .authorize(&signed_headers("c2VjcmV0c2VjcmV0", &body), &body)
            .await
            .unwrap();
        assert_eq!(authorized.attacher.name(), "avatar");
        assert_eq!(authorized.result["id"], "processed.png");
    }

    #[tokio::test]
    async fn test_rejects_wrong_secret() {
        let auth = setup(Some("c2VjcmV0c2VjcmV0"), false);
        let body = body();
        assert!(auth.authorize(&signed_headers("guessed", &body), &body).await.is_none());
    }

    #[tokio::test]
    async fn test_rejects_tampered_body() {
        let auth = setup(Some("c2VjcmV0c2VjcmV0"), false);
        let body = body();
        let headers = signed_headers("c2VjcmV0c2VjcmV0", &body);
        let tampered = body.replace("processed.png", "evil.png");
        assert!(auth.authorize(&headers, &tampered).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_secret_rejected_by_default() {
        let auth = setup(None, false);
        let body = body();
        assert!(auth.authorize(&signed_headers("key", &body), &body).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_secret_with_fallback_opt_in() {
        let auth = setup(None, true);
        let body = body();
        assert!(auth.authorize(&signed_headers("key", &body), &body).await.is_some());
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let auth = setup(Some("c2VjcmV0c2VjcmV0"), false);
        let body = body();
        let headers = signed_headers("c2VjcmV0c2VjcmV0", &body);

        assert!(auth.authorize(&headers, "not json").await.is_none());
        assert!(auth.authorize(&headers, r#"{"id":"x"}"#).await.is_none());

        let unknown = json!({"context": {"record": ["Post", 1], "name": "avatar"}}).to_string();
        assert!(auth.authorize(&signed_headers("c2VjcmV0c2VjcmV0", &unknown), &unknown).await.is_none());

        let missing = json!({"context": {"record": ["User", 99], "name": "avatar"}}).to_string();
        assert!(auth.authorize(&signed_headers("c2VjcmV0c2VjcmV0", &missing), &missing).await.is_none());

        let mut no_auth = headers.clone();
        no_auth.remove("authorization");
        assert!(auth.authorize(&no_auth, &body).await.is_none());

        let mut no_date = headers.clone();
        no_date.remove("x-amz-date");
        assert!(auth.authorize(&no_date, &body).await.is_none());

        let mut garbage = headers;
        garbage.insert("authorization", HeaderValue::from_static("Bearer abc"));
        assert!(auth.authorize(&garbage, &body).await.is_none());
    }

    fn replace_signature(headers: &HeaderMap, edit: impl Fn(&str) -> String) -> HeaderMap {
        let header = headers["authorization"].to_str().unwrap();
        let (prefix, signature) = header.split_once("Signature=").unwrap();
        let mut edited = headers.clone();
        edited.insert(
            "authorization",
            HeaderValue::from_str(&format!("{}Signature={}", prefix, edit(signature))).unwrap(),
        );
        edited
    }

    #[tokio::test]
    async fn test_rejects_any_single_altered_signature_character() {
        let auth = setup(Some("c2VjcmV0c2VjcmV0"), false);
        let body = body();
        let headers = signed_headers("c2VjcmV0c2VjcmV0", &body);
        assert!(auth.authorize(&headers, &body).await.is_some());

        let signature_len = headers["authorization"]
            .to_str()
            .unwrap()
            .split_once("Signature=")
            .unwrap()
            .1
            .len();
        assert_eq!(signature_len, 64);

        for position in 0..signature_len {
            let flipped = replace_signature(&headers, |s| {
                s.char_indices()
                    .map(|(i, c)| match (i == position, c) {
                        (false, c) => c,
                        (true, '0') => '1',
                        (true, _) => '0',
                    })
                    .collect()
            });
            assert!(
                auth.authorize(&flipped, &body).await.is_none(),
                "signature with character {} altered was accepted",
                position
            );
        }
    }

    #[tokio::test]
    async fn test_rejects_truncated_and_uppercase_signatures() {
        let auth = setup(Some("c2VjcmV0c2VjcmV0"), false);
        let body = body();
        let headers = signed_headers("c2VjcmV0c2VjcmV0", &body);

        let truncated = replace_signature(&headers, |s| s[..s.len() - 1].to_string());
        assert!(auth.authorize(&truncated, &body).await.is_none());

        let empty = replace_signature(&headers, |_| String::new());
        assert!(auth.authorize(&empty, &body).await.is_none());

        let extended = replace_signature(&headers, |s| format!("{}0", s));
        assert!(auth.authorize(&extended, &body).await.is_none());

        let uppercase = replace_signature(&headers, |s| s.to_ascii_uppercase());
        assert!(auth.authorize(&uppercase, &body).await.is_none());
    }

    #[tokio::test]
    async fn test_security_token_is_part_of_the_signature() {
        let auth = setup(Some("c2VjcmV0c2VjcmV0"), false);
        let body = body();
        let request = SignableRequest::new("PUT", CALLBACK_URL, body.as_bytes()).header("X-Amz-Date", DATE);
        let signature = Signer::new("AKIAEXAMPLE", "c2VjcmV0c2VjcmV0", "us-east-1", "lambda")
            .with_session_token(Some("session".to_string()))
            .sign_request(&request)
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(&signature.authorization.to_string()).unwrap());
        headers.insert("x-amz-date", HeaderValue::from_static(DATE));
        assert!(auth.authorize(&headers, &body).await.is_none());

        headers.insert("x-amz-security-token", HeaderValue::from_static("session"));
        assert!(auth.authorize(&headers, &body).await.is_some());
    }
}
