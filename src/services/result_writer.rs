use crate::error::{BridgeError, Result};
use crate::services::key_store::EphemeralKeys;
use crate::services::records::Attacher;
use serde_json::{Map, Value};

/// Turns an authorized Lambda result into the attachment's stored value.
pub struct ResultWriter;

impl ResultWriter {
    /// The value to store for `result`.
    ///
    /// With `versions` (an ordered list of maps, or one keyed map) the
    /// versions are merged into a single map, later keys winning. Without
    /// them the result is a single file stored as sent. The signing secret is
    /// removed either way.
    pub fn prepare(result: Value) -> Result<Value> {
        let Value::Object(mut result) = result else {
            return Err(BridgeError::InvalidResult("result is not a JSON object".into()));
        };

        match result.remove("versions") {
            Some(versions) => {
                let mut merged = match versions {
                    Value::Array(list) => {
                        let mut merged = Map::new();
                        for version in list {
                            let Value::Object(version) = version else {
                                return Err(BridgeError::InvalidResult(
                                    "versions must contain JSON objects".into(),
                                ));
                            };
                            merged.extend(version);
                        }
                        merged
                    }
                    Value::Object(map) => map,
                    _ => {
                        return Err(BridgeError::InvalidResult(
                            "versions must be a list or a map".into(),
                        ));
                    }
                };
                for version in merged.values_mut() {
                    EphemeralKeys::strip(version);
                }
                Ok(Value::Object(merged))
            }
            None => {
                let mut single = Value::Object(result);
                EphemeralKeys::strip(&mut single);
                Ok(single)
            }
        }
    }

    /// Write the prepared result into the attachment attribute and save the
    /// record without validation. Replays simply overwrite.
    pub async fn apply_result(attacher: &mut Attacher, result: Value) -> Result<Value> {
        let value = Self::prepare(result)?;
        attacher.write(serde_json::to_string(&value)?);
        attacher.save(false).await?;

        let record = attacher.record();
        tracing::info!(
            "📦 Stored Lambda result for {} {} ({})",
            record.record_type,
            record.id,
            attacher.name()
        );
        Ok(value)
    }
}
