//! Resolution of the KMS key URI from a request's provider parameters.

use std::{collections::HashMap, fmt};

use crate::error::{KeyProviderError, Result};

/// Provider-keyed parameter lists, as carried by the encrypt/decrypt configs.
pub type Parameters = HashMap<String, Vec<Vec<u8>>>;

/// Parameter map key this adapter answers to unless configured otherwise.
pub const PROVIDER_NAME: &str = "kmscrypt";

/// The only key URI scheme with a backend behind it.
pub const KMS_URI_SCHEME: &str = "gcpkms://";

/// How a deployment-time key URI interacts with the one in the request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OverridePolicy {
    /// The configured URI replaces whatever the request carries.
    #[default]
    OverrideWins,
    /// The configured URI is used only when the request carries none.
    RequestWins,
}

/// A validated key URI and the backend-native key name inside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyUri {
    uri: String,
    name_offset: usize,
}

impl KeyUri {
    pub fn parse(uri: impl Into<String>) -> Result<Self> {
        let uri = uri.into();
        // The backend key name after the scheme must be non-empty.
        if uri.len() <= KMS_URI_SCHEME.len() || !uri.starts_with(KMS_URI_SCHEME) {
            return Err(KeyProviderError::UnsupportedKeySchema { uri });
        }
        Ok(Self {
            uri,
            name_offset: KMS_URI_SCHEME.len(),
        })
    }

    /// The full URI, as recorded in annotations.
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// The URI with the scheme stripped, as passed to the KMS.
    pub fn key_name(&self) -> &str {
        &self.uri[self.name_offset..]
    }
}

impl fmt::Display for KeyUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Picks the key URI for a request out of its parameters and the
/// deployment's optional override.
#[derive(Clone, Debug)]
pub struct ParameterResolver {
    provider_name: String,
    key_override: Option<String>,
    policy: OverridePolicy,
}

impl Default for ParameterResolver {
    fn default() -> Self {
        Self::new(PROVIDER_NAME)
    }
}

impl ParameterResolver {
    pub fn new(provider_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            key_override: None,
            policy: OverridePolicy::default(),
        }
    }

    /// Pin a key URI. An empty string leaves the resolver without an override.
    pub fn with_override(mut self, uri: impl Into<String>, policy: OverridePolicy) -> Self {
        let uri = uri.into();
        self.key_override = (!uri.is_empty()).then_some(uri);
        self.policy = policy;
        self
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn key_override(&self) -> Option<&str> {
        self.key_override.as_deref()
    }

    pub fn policy(&self) -> OverridePolicy {
        self.policy
    }

    /// Apply the override policy and return the raw URI string, without
    /// checking its scheme. Entries past the first are ignored.
    pub fn resolve_uri(&self, parameters: &Parameters) -> Result<String> {
        let requested = parameters
            .get(&self.provider_name)
            .and_then(|values| values.first());

        let chosen = match (&self.key_override, self.policy, requested) {
            (Some(uri), OverridePolicy::OverrideWins, _) => return Ok(uri.clone()),
            (Some(uri), OverridePolicy::RequestWins, None) => return Ok(uri.clone()),
            (_, _, Some(value)) => value,
            (None, _, None) => {
                return Err(KeyProviderError::MissingProviderParameter {
                    provider: self.provider_name.clone(),
                });
            }
        };

        String::from_utf8(chosen.clone()).map_err(|e| KeyProviderError::UnsupportedKeySchema {
            uri: String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }

    /// Resolve and validate the key URI for a request.
    pub fn resolve(&self, parameters: &Parameters) -> Result<KeyUri> {
        KeyUri::parse(self.resolve_uri(parameters)?)
    }
}
