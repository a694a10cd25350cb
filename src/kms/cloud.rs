use std::time::Duration;

use anyhow::Context;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use super::{
    KmsBackend,
    credentials::{Credentials, TokenSource},
};

pub const DEFAULT_ENDPOINT: &str = "https://cloudkms.googleapis.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Google Cloud KMS over its JSON REST API.
///
/// Each call is one blocking round trip with no retries; the agent's timeout
/// bounds it.
pub struct CloudKmsBackend {
    agent: ureq::Agent,
    endpoint: String,
    tokens: TokenSource,
}

#[derive(Serialize)]
struct EncryptRequest {
    plaintext: String,
}

#[derive(Deserialize)]
struct EncryptResponse {
    #[serde(default)]
    ciphertext: String,
}

#[derive(Serialize)]
struct DecryptRequest {
    ciphertext: String,
}

#[derive(Deserialize)]
struct DecryptResponse {
    // Empty plaintexts are omitted from the response.
    #[serde(default)]
    plaintext: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl CloudKmsBackend {
    pub fn new(credentials: Credentials, endpoint: Option<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let endpoint = endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/')
            .to_owned();
        Self {
            tokens: TokenSource::new(credentials, agent.clone()),
            agent,
            endpoint,
        }
    }

    fn call<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        resource: &str,
        method: &str,
        body: &Req,
    ) -> anyhow::Result<Resp> {
        let url = format!("{}/v1/{resource}:{method}", self.endpoint);
        let token = self.tokens.token()?;
        log::debug!("cloud kms {method} {resource}");

        let result = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Bearer {token}"))
            .send_json(serde_json::to_value(body)?);

        match result {
            Ok(resp) => resp
                .into_json()
                .with_context(|| format!("decoding cloud kms {method} response")),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(anyhow::anyhow!(
                    "cloud kms {method} on {resource} failed with HTTP {code}: {}",
                    describe_error(&body)
                ))
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("cloud kms {method} request"))),
        }
    }
}

impl KmsBackend for CloudKmsBackend {
    fn encrypt(&self, key_name: &str, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let body = EncryptRequest {
            plaintext: STANDARD.encode(plaintext),
        };
        let resp: EncryptResponse = self.call(key_name, "encrypt", &body)?;
        anyhow::ensure!(!resp.ciphertext.is_empty(), "cloud kms returned no ciphertext");
        STANDARD
            .decode(&resp.ciphertext)
            .context("cloud kms returned invalid base64 ciphertext")
    }

    fn decrypt(&self, key_name: &str, ciphertext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let body = DecryptRequest {
            ciphertext: STANDARD.encode(ciphertext),
        };
        let resp: DecryptResponse = self.call(crypto_key_name(key_name), "decrypt", &body)?;
        STANDARD
            .decode(&resp.plaintext)
            .context("cloud kms returned invalid base64 plaintext")
    }
}

/// Decrypt is addressed to the crypto key; the key version that encrypted
/// the data is recorded inside the ciphertext.
fn crypto_key_name(key_name: &str) -> &str {
    match key_name.rsplit_once("/cryptoKeyVersions/") {
        Some((key, version)) if !version.contains('/') => key,
        _ => key_name,
    }
}

fn describe_error(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse { error }) if !error.status.is_empty() => {
            format!("{} ({})", error.message, error.status)
        }
        Ok(ErrorResponse { error }) => error.message,
        Err(_) if body.is_empty() => "empty response".to_owned(),
        Err(_) => body.chars().take(512).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::test_server;

    const KEY_VERSION: &str =
        "projects/p/locations/global/keyRings/r/cryptoKeys/k/cryptoKeyVersions/1";

    fn backend(endpoint: String) -> CloudKmsBackend {
        CloudKmsBackend::new(
            Credentials::AccessToken("ya29.test".into()),
            Some(endpoint),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn encrypt_posts_plaintext_to_key_version() {
        let (endpoint, server) = test_server::serve(vec![(
            200,
            serde_json::json!({ "name": KEY_VERSION, "ciphertext": STANDARD.encode(b"wrapped") })
                .to_string(),
        )]);

        let ciphertext = backend(endpoint).encrypt(KEY_VERSION, b"layer-key").unwrap();
        assert_eq!(ciphertext, b"wrapped");

        let requests = server.join().unwrap();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].path, format!("/v1/{KEY_VERSION}:encrypt"));
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer ya29.test"));
        assert_eq!(requests[0].json()["plaintext"], STANDARD.encode(b"layer-key"));
    }

    #[test]
    fn decrypt_posts_ciphertext_to_crypto_key() {
        let (endpoint, server) = test_server::serve(vec![(
            200,
            serde_json::json!({ "plaintext": STANDARD.encode(b"layer-key") }).to_string(),
        )]);

        let plaintext = backend(endpoint).decrypt(KEY_VERSION, b"wrapped").unwrap();
        assert_eq!(plaintext, b"layer-key");

        let requests = server.join().unwrap();
        assert_eq!(
            requests[0].path,
            "/v1/projects/p/locations/global/keyRings/r/cryptoKeys/k:decrypt"
        );
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer ya29.test"));
        assert_eq!(requests[0].json()["ciphertext"], STANDARD.encode(b"wrapped"));
    }

    #[test]
    fn error_status_carries_google_message() {
        let (endpoint, server) = test_server::serve(vec![(
            403,
            r#"{"error":{"code":403,"message":"Permission denied on resource","status":"PERMISSION_DENIED"}}"#
                .to_owned(),
        )]);

        let err = backend(endpoint).encrypt(KEY_VERSION, b"k").unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("HTTP 403"), "{msg}");
        assert!(msg.contains("Permission denied on resource (PERMISSION_DENIED)"), "{msg}");
        server.join().unwrap();
    }

    #[test]
    fn empty_ciphertext_is_rejected() {
        let (endpoint, server) = test_server::serve(vec![(200, "{}".to_owned())]);
        let err = backend(endpoint).encrypt(KEY_VERSION, b"k").unwrap_err();
        assert!(err.to_string().contains("no ciphertext"));
        server.join().unwrap();
    }

    #[test]
    fn decrypt_targets_crypto_key() {
        assert_eq!(
            crypto_key_name(
                "projects/p/locations/global/keyRings/r/cryptoKeys/k/cryptoKeyVersions/1"
            ),
            "projects/p/locations/global/keyRings/r/cryptoKeys/k"
        );
        assert_eq!(
            crypto_key_name("projects/p/locations/global/keyRings/r/cryptoKeys/k"),
            "projects/p/locations/global/keyRings/r/cryptoKeys/k"
        );
    }

    #[test]
    fn describes_google_api_errors() {
        let body = r#"{"error":{"code":403,"message":"Permission 'cloudkms.cryptoKeyVersions.useToEncrypt' denied","status":"PERMISSION_DENIED"}}"#;
        assert_eq!(
            describe_error(body),
            "Permission 'cloudkms.cryptoKeyVersions.useToEncrypt' denied (PERMISSION_DENIED)"
        );
        assert_eq!(describe_error(""), "empty response");
        assert_eq!(describe_error("<html>bad gateway</html>"), "<html>bad gateway</html>");
    }

    #[test]
    fn endpoint_is_normalized() {
        let backend = CloudKmsBackend::new(
            Credentials::AccessToken("t".into()),
            Some("http://127.0.0.1:9/".into()),
            DEFAULT_TIMEOUT,
        );
        assert_eq!(backend.endpoint, "http://127.0.0.1:9");

        let backend =
            CloudKmsBackend::new(Credentials::AccessToken("t".into()), None, DEFAULT_TIMEOUT);
        assert_eq!(backend.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn unreachable_endpoint_is_an_error() {
        // Port 9 (discard) is closed on test hosts; the connect fails fast.
        let backend = CloudKmsBackend::new(
            Credentials::AccessToken("t".into()),
            Some("http://127.0.0.1:9".into()),
            Duration::from_secs(2),
        );
        let err = backend.encrypt("projects/p/cryptoKeys/k", b"key").unwrap_err();
        assert!(format!("{err:#}").contains("cloud kms encrypt request"));
    }
}
