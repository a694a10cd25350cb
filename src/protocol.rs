//! The key-provider protocol envelope exchanged with the image encryption
//! tool. Field names and base64 byte encoding follow `ocicrypt`.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    error::{KeyProviderError, Result},
    params::Parameters,
};

pub const OP_KEY_WRAP: &str = "keywrap";
pub const OP_KEY_UNWRAP: &str = "keyunwrap";

/// A layer content key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey {
    bytes: Vec<u8>,
}

impl ContentKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({} bytes, ***)", self.bytes.len())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeyWrapProtocolInput {
    #[serde(rename = "op", default)]
    pub operation: String,
    #[serde(rename = "keywrapparams", default, deserialize_with = "b64::or_default")]
    pub key_wrap_params: KeyWrapParams,
    #[serde(rename = "keyunwrapparams", default, deserialize_with = "b64::or_default")]
    pub key_unwrap_params: KeyUnwrapParams,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct KeyWrapParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec: Option<EncryptConfig>,
    #[serde(rename = "optsdata", default, with = "b64::bytes")]
    pub opts_data: Vec<u8>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeyUnwrapParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dc: Option<DecryptConfig>,
    #[serde(default, with = "b64::bytes")]
    pub annotation: Vec<u8>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EncryptConfig {
    #[serde(rename = "Parameters", alias = "parameters", default, with = "b64::parameters")]
    pub parameters: Parameters,
    #[serde(
        rename = "DecryptConfig",
        alias = "decryptConfig",
        default,
        deserialize_with = "b64::or_default"
    )]
    pub decrypt_config: DecryptConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DecryptConfig {
    #[serde(rename = "Parameters", alias = "parameters", default, with = "b64::parameters")]
    pub parameters: Parameters,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeyWrapProtocolOutput {
    #[serde(rename = "keywrapresults", default, deserialize_with = "b64::or_default")]
    pub key_wrap_results: KeyWrapResults,
    #[serde(rename = "keyunwrapresults", default, deserialize_with = "b64::or_default")]
    pub key_unwrap_results: KeyUnwrapResults,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeyWrapResults {
    #[serde(default, with = "b64::bytes")]
    pub annotation: Vec<u8>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct KeyUnwrapResults {
    #[serde(rename = "optsdata", default, with = "b64::bytes")]
    pub opts_data: Vec<u8>,
}

impl fmt::Debug for KeyWrapParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyWrapParams")
            .field("ec", &self.ec)
            .field("opts_data", &format_args!("{} bytes", self.opts_data.len()))
            .finish()
    }
}

impl fmt::Debug for KeyUnwrapResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyUnwrapResults")
            .field("opts_data", &format_args!("{} bytes", self.opts_data.len()))
            .finish()
    }
}

/// A wrap request: protect `content_key` under the key named in `parameters`.
#[derive(Debug)]
pub struct WrapRequest {
    pub content_key: ContentKey,
    pub parameters: Parameters,
}

/// An unwrap request: recover the content key from `annotation`.
#[derive(Debug)]
pub struct UnwrapRequest {
    pub annotation: Vec<u8>,
    pub parameters: Parameters,
}

#[derive(Debug)]
pub enum Request {
    Wrap(WrapRequest),
    Unwrap(UnwrapRequest),
}

impl KeyWrapProtocolInput {
    pub fn from_slice(input: &[u8]) -> Result<Self> {
        serde_json::from_slice(input).map_err(|e| KeyProviderError::MalformedRequest(e.to_string()))
    }

    /// Take the wrap parameter block, whatever `op` says.
    pub fn into_wrap_request(mut self) -> WrapRequest {
        let parameters = self
            .key_wrap_params
            .ec
            .take()
            .map(|ec| ec.parameters)
            .unwrap_or_default();
        WrapRequest {
            content_key: ContentKey::from_bytes(std::mem::take(&mut self.key_wrap_params.opts_data)),
            parameters,
        }
    }

    /// Take the unwrap parameter block, whatever `op` says.
    pub fn into_unwrap_request(self) -> UnwrapRequest {
        let params = self.key_unwrap_params;
        UnwrapRequest {
            annotation: params.annotation,
            parameters: params.dc.map(|dc| dc.parameters).unwrap_or_default(),
        }
    }

    /// Dispatch on `op`.
    pub fn into_request(mut self) -> Result<Request> {
        let operation = std::mem::take(&mut self.operation);
        match operation.as_str() {
            OP_KEY_WRAP => Ok(Request::Wrap(self.into_wrap_request())),
            OP_KEY_UNWRAP => Ok(Request::Unwrap(self.into_unwrap_request())),
            _ => Err(KeyProviderError::UnsupportedOperation(operation)),
        }
    }
}

impl Drop for KeyWrapParams {
    fn drop(&mut self) {
        self.opts_data.zeroize();
    }
}

impl Drop for KeyUnwrapResults {
    fn drop(&mut self) {
        self.opts_data.zeroize();
    }
}

/// Decode a protocol input and dispatch on its operation.
pub fn decode_request(input: &[u8]) -> Result<Request> {
    KeyWrapProtocolInput::from_slice(input)?.into_request()
}

pub fn encode_wrap_response(annotation: Vec<u8>) -> Result<Vec<u8>> {
    let output = KeyWrapProtocolOutput {
        key_wrap_results: KeyWrapResults { annotation },
        ..Default::default()
    };
    Ok(serde_json::to_vec(&output)?)
}

pub fn encode_unwrap_response(content_key: &ContentKey) -> Result<Vec<u8>> {
    let output = KeyWrapProtocolOutput {
        key_unwrap_results: KeyUnwrapResults {
            opts_data: content_key.as_bytes().to_vec(),
        },
        ..Default::default()
    };
    Ok(serde_json::to_vec(&output)?)
}

/// Serde adapters for base64 byte fields. Go encodes nil byte slices and
/// maps as `null`, so `null` decodes as empty everywhere.
pub(crate) mod b64 {
    use std::collections::HashMap;

    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _, ser::SerializeMap};

    use crate::params::Parameters;

    pub fn or_default<'de, D, T>(de: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
    }

    pub mod bytes {
        use super::*;

        pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
            if bytes.is_empty() {
                ser.serialize_none()
            } else {
                ser.serialize_str(&STANDARD.encode(bytes))
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
            match Option::<String>::deserialize(de)? {
                Some(s) => STANDARD.decode(s.as_bytes()).map_err(D::Error::custom),
                None => Ok(Vec::new()),
            }
        }
    }

    pub mod parameters {
        use super::*;

        pub fn serialize<S: Serializer>(params: &Parameters, ser: S) -> Result<S::Ok, S::Error> {
            let mut map = ser.serialize_map(Some(params.len()))?;
            for (name, values) in params {
                let encoded: Vec<String> = values.iter().map(|v| STANDARD.encode(v)).collect();
                map.serialize_entry(name, &encoded)?;
            }
            map.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Parameters, D::Error> {
            let raw = Option::<HashMap<String, Option<Vec<Option<String>>>>>::deserialize(de)?;
            let mut params = Parameters::new();
            for (name, values) in raw.unwrap_or_default() {
                let decoded = values
                    .unwrap_or_default()
                    .into_iter()
                    .map(|v| match v {
                        Some(s) => STANDARD.decode(s.as_bytes()),
                        None => Ok(Vec::new()),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(D::Error::custom)?;
                params.insert(name, decoded);
            }
            Ok(params)
        }
    }
}
