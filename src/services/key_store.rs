use crate::models::UploadedFile;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand::RngCore;
use serde_json::Value;

/// Metadata entry holding the per-upload signing secret.
pub const SECRET_METADATA_KEY: &str = "key";

/// Placeholder secret used only when `allow_fallback_secret` is enabled and
/// the attachment carries no secret.
pub const FALLBACK_SECRET: &str = "key";

/// Random bytes behind each secret (16 base64 characters).
const SECRET_BYTES: usize = 12;

/// Generates, embeds, reads and strips the ephemeral per-upload secret that
/// the Lambda function signs its callback with.
pub struct EphemeralKeys;

impl EphemeralKeys {
    pub fn generate() -> String {
        let mut bytes = [0u8; SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        STANDARD.encode(bytes)
    }

    /// Generate a fresh secret and store it in the file's metadata,
    /// replacing any previous one.
    pub fn insert(file: &mut UploadedFile) -> String {
        let secret = Self::generate();
        file.metadata
            .insert(SECRET_METADATA_KEY.to_string(), Value::String(secret.clone()));
        secret
    }

    pub fn read(file: &UploadedFile) -> Option<&str> {
        file.metadata
            .get(SECRET_METADATA_KEY)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Read the secret from a serialized attachment attribute.
    pub fn read_from_attribute(data: Option<&str>) -> Option<String> {
        let value: Value = serde_json::from_str(data?).ok()?;
        value
            .get("metadata")?
            .get(SECRET_METADATA_KEY)?
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Remove the secret from a serialized file object (`{"metadata": {"key": ..}}`).
    /// Returns whether anything was removed.
    pub fn strip(file: &mut Value) -> bool {
        file.get_mut("metadata")
            .and_then(Value::as_object_mut)
            .map(|metadata| metadata.remove(SECRET_METADATA_KEY).is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StorageKey;
    use base64::Engine as _;
    use serde_json::json;

    #[test]
    fn test_generate_decodes_to_twelve_bytes() {
        let secret = EphemeralKeys::generate();
        assert_eq!(secret.len(), 16);
        assert_eq!(STANDARD.decode(&secret).unwrap().len(), 12);
    }

    #[test]
    fn test_generate_is_fresh() {
        assert_ne!(EphemeralKeys::generate(), EphemeralKeys::generate());
    }

    #[test]
    fn test_insert_and_read() {
        let mut file = UploadedFile::new("abc", StorageKey::Cache);
        assert_eq!(EphemeralKeys::read(&file), None);

        let secret = EphemeralKeys::insert(&mut file);
        assert_eq!(EphemeralKeys::read(&file), Some(secret.as_str()));

        let replaced = EphemeralKeys::insert(&mut file);
        assert_ne!(secret, replaced);
        assert_eq!(EphemeralKeys::read(&file), Some(replaced.as_str()));
    }

    #[test]
    fn test_read_from_attribute() {
        let data = r#"{"id":"abc","storage":"cache","metadata":{"key":"c2VjcmV0"}}"#;
        assert_eq!(
            EphemeralKeys::read_from_attribute(Some(data)).as_deref(),
            Some("c2VjcmV0")
        );
        assert_eq!(EphemeralKeys::read_from_attribute(None), None);
        assert_eq!(EphemeralKeys::read_from_attribute(Some("not json")), None);
        assert_eq!(
            EphemeralKeys::read_from_attribute(Some(r#"{"metadata":{}}"#)),
            None
        );
        assert_eq!(
            EphemeralKeys::read_from_attribute(Some(r#"{"metadata":{"key":""}}"#)),
            None
        );
    }

    #[test]
    fn test_strip() {
        let mut value = json!({"id": "abc", "metadata": {"key": "secret", "size": 3}});
        assert!(EphemeralKeys::strip(&mut value));
        assert_eq!(value, json!({"id": "abc", "metadata": {"size": 3}}));
        assert!(!EphemeralKeys::strip(&mut value));

        let mut no_metadata = json!({"id": "abc"});
        assert!(!EphemeralKeys::strip(&mut no_metadata));
    }
}
