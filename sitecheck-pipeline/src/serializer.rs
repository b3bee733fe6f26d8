//! Result serialization
//!
//! Converts a [`PipelineResult`] into transport-safe JSON for storage and API
//! responses. Binary payloads (export files, uploaded source bytes) become
//! base64 text through the `with` modules below.

use crate::models::PipelineResult;
use serde_json::Value;

/// serde `with` module: `Vec<u8>` as base64 text
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// serde `with` module: `Option<Vec<u8>>` as optional base64 text
pub mod base64_bytes_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        text.map(|t| STANDARD.decode(t.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serialize a result into its transport form
pub fn to_transport(result: &PipelineResult) -> sitecheck_common::Result<Value> {
    Ok(serde_json::to_value(result)?)
}

/// Rebuild a result from its transport form
pub fn from_transport(value: Value) -> sitecheck_common::Result<PipelineResult> {
    Ok(serde_json::from_value(value)?)
}

/// Drop raw uploaded bytes from a transport-form result
///
/// Returns the number of payloads removed.
pub fn strip_source_bytes(value: &mut Value) -> usize {
    let mut stripped = 0;
    if let Some(files) = value.get_mut("source_files").and_then(Value::as_array_mut) {
        for file in files {
            if let Some(data) = file.get_mut("data") {
                if !data.is_null() {
                    *data = Value::Null;
                    stripped += 1;
                }
            }
        }
    }
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ArtifactSet, DepthMode, PipelineResult, ProjectRecord, SourceFile, TokenUsage,
    };
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn sample_result() -> PipelineResult {
        PipelineResult {
            job_id: Uuid::new_v4(),
            project: ProjectRecord::new("Test"),
            artifacts: ArtifactSet::new(),
            warnings: vec![],
            stage_order: vec![],
            stages_completed: vec![],
            skipped_stages: vec![],
            depth: DepthMode::Standard,
            token_usage: TokenUsage::default(),
            stage_usage: BTreeMap::new(),
            source_files: vec![SourceFile {
                name: "a.ifc".to_string(),
                size: 3,
                data: Some(vec![0xff, 0x00, 0x10]),
            }],
            fingerprint: "abc".to_string(),
            from_cache: false,
            duration_ms: 12,
        }
    }

    #[test]
    fn test_source_bytes_become_text() {
        let value = to_transport(&sample_result()).unwrap();
        assert_eq!(value["source_files"][0]["data"], "/wAQ");

        let back = from_transport(value).unwrap();
        assert_eq!(back.source_files[0].data, Some(vec![0xff, 0x00, 0x10]));
    }

    #[test]
    fn test_strip_source_bytes() {
        let mut value = to_transport(&sample_result()).unwrap();
        assert_eq!(strip_source_bytes(&mut value), 1);
        assert!(value["source_files"][0]["data"].is_null());
        // Name and size survive
        assert_eq!(value["source_files"][0]["name"], "a.ifc");

        let back = from_transport(value).unwrap();
        assert!(back.source_files[0].data.is_none());
    }
}
