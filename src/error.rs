use crate::params::KMS_URI_SCHEME;

/// Failures of a single wrap or unwrap request. All of them are terminal
/// for that request; none are retried.
#[derive(Debug, thiserror::Error)]
pub enum KeyProviderError {
    #[error(
        "missing key parameter for provider `{provider}`: provider must be formatted as \
         provider:{provider}:gcpkms://projects/$PROJECT_ID/locations/global/keyRings/[keyring]/cryptoKeys/[key]/cryptoKeyVersions/1"
    )]
    MissingProviderParameter { provider: String },

    #[error("unsupported kms key uri `{uri}`, expected {}<key name>", KMS_URI_SCHEME)]
    UnsupportedKeySchema { uri: String },

    #[error(
        "kms uri parameter and key url in the annotation are different: parameter [{requested}], key url [{recorded}]"
    )]
    KeyIdentifierMismatch { requested: String, recorded: String },

    #[error("malformed annotation packet: {0}")]
    MalformedAnnotation(String),

    #[error("malformed key provider request: {0}")]
    MalformedRequest(String),

    #[error("unsupported key provider operation `{0}`")]
    UnsupportedOperation(String),

    #[error("kms backend error: {0}")]
    Backend(String),

    #[error("failed to encode key provider message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl KeyProviderError {
    /// True when the caller sent something unusable, as opposed to the KMS
    /// or the encoder failing.
    pub fn is_request_error(&self) -> bool {
        !matches!(self, Self::Backend(_) | Self::Encode(_))
    }

    pub(crate) fn backend(err: anyhow::Error) -> Self {
        Self::Backend(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, KeyProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_names_both_identifiers() {
        let err = KeyProviderError::KeyIdentifierMismatch {
            requested: "gcpkms://a".into(),
            recorded: "gcpkms://b".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("gcpkms://a"));
        assert!(msg.contains("gcpkms://b"));
    }

    #[test]
    fn backend_errors_are_not_request_errors() {
        let err = KeyProviderError::backend(anyhow::anyhow!("permission denied"));
        assert!(!err.is_request_error());
        assert_eq!(err.to_string(), "kms backend error: permission denied");

        let err = KeyProviderError::MalformedAnnotation("eof".into());
        assert!(err.is_request_error());
    }
}
