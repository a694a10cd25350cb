//! The annotation packet stored next to a wrapped layer key.
//!
//! The packet records which KMS key produced the ciphertext, so a later
//! unwrap can check it is about to use the same one.

use serde::{Deserialize, Serialize};

use crate::error::{KeyProviderError, Result};

/// Wrap type recorded for keys wrapped by the KMS's symmetric encrypt.
pub const WRAP_TYPE: &str = "AES";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationPacket {
    pub key_url: String,
    #[serde(with = "crate::protocol::b64::bytes")]
    pub wrapped_key: Vec<u8>,
    pub wrap_type: String,
}

impl AnnotationPacket {
    pub fn new(key_url: impl Into<String>, wrapped_key: Vec<u8>) -> Self {
        Self {
            key_url: key_url.into(),
            wrapped_key,
            wrap_type: WRAP_TYPE.to_owned(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let packet: Self = serde_json::from_slice(bytes)
            .map_err(|e| KeyProviderError::MalformedAnnotation(e.to_string()))?;
        if packet.wrap_type != WRAP_TYPE {
            return Err(KeyProviderError::MalformedAnnotation(format!(
                "unsupported wrap type `{}`",
                packet.wrap_type
            )));
        }
        Ok(packet)
    }
}
