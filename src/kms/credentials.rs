//! Google credential discovery and OAuth2 access tokens for Cloud KMS.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use parking_lot::Mutex;
use rsa::{
    RsaPrivateKey,
    pkcs1v15::SigningKey,
    pkcs8::DecodePrivateKey,
    signature::{SignatureEncoding, Signer},
};
use serde::Deserialize;
use sha2::Sha256;

pub const CLOUD_KMS_SCOPE: &str = "https://www.googleapis.com/auth/cloudkms";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
pub const CREDENTIALS_FILE_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Where access tokens come from.
pub enum Credentials {
    /// A pre-minted bearer token, used as is.
    AccessToken(String),
    ServiceAccount {
        client_email: String,
        private_key: String,
        token_uri: String,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    /// The GCE/GKE metadata server.
    MetadataServer,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default)]
        token_uri: Option<String>,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

impl Credentials {
    /// Parse a `service_account` or `authorized_user` credentials JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("reading credentials file {}", path.display()))?;
        Self::from_json(&data).with_context(|| format!("parsing credentials file {}", path.display()))
    }

    pub fn from_json(data: &[u8]) -> anyhow::Result<Self> {
        let file: CredentialsFile = serde_json::from_slice(data)?;
        Ok(match file {
            CredentialsFile::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            } => Self::ServiceAccount {
                client_email,
                private_key,
                token_uri: token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_owned()),
            },
            CredentialsFile::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            } => Self::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            },
        })
    }

    /// Application-default discovery: an explicit file, then the
    /// environment, then gcloud's well-known file, then the metadata server.
    pub fn discover(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            if !token.is_empty() {
                log::debug!("using access token from {ACCESS_TOKEN_ENV}");
                return Ok(Self::AccessToken(token));
            }
        }
        if let Some(path) = std::env::var_os(CREDENTIALS_FILE_ENV).filter(|p| !p.is_empty()) {
            return Self::from_file(Path::new(&path));
        }
        if let Some(path) = well_known_file().filter(|p| p.exists()) {
            log::debug!("using gcloud credentials from {}", path.display());
            return Self::from_file(&path);
        }
        log::debug!("no credentials file found, falling back to the metadata server");
        Ok(Self::MetadataServer)
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::AccessToken(_) => "access_token",
            Self::ServiceAccount { .. } => "service_account",
            Self::AuthorizedUser { .. } => "authorized_user",
            Self::MetadataServer => "metadata_server",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceAccount { client_email, .. } => f
                .debug_struct("ServiceAccount")
                .field("client_email", client_email)
                .finish_non_exhaustive(),
            other => write!(f, "Credentials({})", other.kind()),
        }
    }
}

fn well_known_file() -> Option<PathBuf> {
    let base = match std::env::var_os("CLOUDSDK_CONFIG") {
        Some(dir) => PathBuf::from(dir),
        None if cfg!(windows) => PathBuf::from(std::env::var_os("APPDATA")?).join("gcloud"),
        None => PathBuf::from(std::env::var_os("HOME")?).join(".config/gcloud"),
    };
    Some(base.join("application_default_credentials.json"))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + EXPIRY_MARGIN < self.expires_at
    }
}

/// Hands out bearer tokens for Cloud KMS calls, minting a new one when the
/// cached token is about to expire.
pub struct TokenSource {
    credentials: Credentials,
    agent: ureq::Agent,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(credentials: Credentials, agent: ureq::Agent) -> Self {
        Self {
            credentials,
            agent,
            cached: Mutex::new(None),
        }
    }

    pub fn token(&self) -> anyhow::Result<String> {
        if let Credentials::AccessToken(token) = &self.credentials {
            return Ok(token.clone());
        }

        let mut guard = self.cached.lock();
        if let Some(cached) = guard.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(cached.value.clone());
        }

        let response = self
            .fetch()
            .with_context(|| format!("fetching {} access token", self.credentials.kind()))?;
        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS));
        log::debug!("minted access token valid for {}s", lifetime.as_secs());
        *guard = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }

    fn fetch(&self) -> anyhow::Result<TokenResponse> {
        let response = match &self.credentials {
            Credentials::AccessToken(token) => {
                return Ok(TokenResponse {
                    access_token: token.clone(),
                    expires_in: None,
                });
            }
            Credentials::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            } => {
                let assertion = sign_assertion(client_email, private_key, token_uri, unix_now()?)?;
                self.agent.post(token_uri).send_form(&[
                    ("grant_type", JWT_GRANT_TYPE),
                    ("assertion", assertion.as_str()),
                ])?
            }
            Credentials::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            } => self.agent.post(DEFAULT_TOKEN_URI).send_form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ])?,
            Credentials::MetadataServer => self
                .agent
                .get(METADATA_TOKEN_URL)
                .set("Metadata-Flavor", "Google")
                .call()?,
        };
        Ok(response.into_json()?)
    }
}

fn unix_now() -> anyhow::Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the unix epoch")?
        .as_secs())
}

/// Build an RS256-signed JWT bearer assertion for the service account.
fn sign_assertion(
    client_email: &str,
    private_key_pem: &str,
    token_uri: &str,
    issued_at: u64,
) -> anyhow::Result<String> {
    let key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| anyhow::anyhow!("invalid service account private key: {e}"))?;
    let signing_input = assertion_signing_input(client_email, token_uri, issued_at)?;
    let signature = SigningKey::<Sha256>::new(key)
        .try_sign(signing_input.as_bytes())
        .map_err(|e| anyhow::anyhow!("signing assertion failed: {e}"))?;
    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature.to_vec())
    ))
}

fn assertion_signing_input(
    client_email: &str,
    token_uri: &str,
    issued_at: u64,
) -> anyhow::Result<String> {
    let header = serde_json::json!({ "alg": "RS256", "typ": "JWT" });
    let claims = serde_json::json!({
        "iss": client_email,
        "scope": CLOUD_KMS_SCOPE,
        "aud": token_uri,
        "iat": issued_at,
        "exp": issued_at + ASSERTION_LIFETIME_SECS,
    });
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
    ))
}
