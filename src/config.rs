//! Front-end configuration and construction of a [`KeyProvider`].

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Args, ValueEnum};

use crate::{
    keywrap::KeyProvider,
    kms::{
        KmsBackend,
        cloud::{CloudKmsBackend, DEFAULT_TIMEOUT},
        credentials::Credentials,
        local::LocalKmsBackend,
    },
    params::{OverridePolicy, PROVIDER_NAME, ParameterResolver},
};

/// Where wrapping keys live.
pub enum Backend {
    /// Google Cloud KMS.
    CloudKms {
        /// Credentials file; application-default discovery when unset.
        credentials_file: Option<PathBuf>,
        endpoint: Option<String>,
        timeout: Duration,
    },
    /// Local AES-256-GCM key, for development and tests.
    Local {
        keyfile: Option<PathBuf>,
        passphrase: Option<String>,
    },
    /// A caller-supplied backend.
    Custom(Arc<dyn KmsBackend>),
}

pub struct KeyProviderBuilder {
    backend: Backend,
    provider_name: String,
    key_override: Option<String>,
    policy: OverridePolicy,
}

impl KeyProviderBuilder {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            provider_name: PROVIDER_NAME.into(),
            key_override: None,
            policy: OverridePolicy::default(),
        }
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = name.into();
        self
    }

    pub fn key_override(mut self, uri: Option<String>, policy: OverridePolicy) -> Self {
        self.key_override = uri;
        self.policy = policy;
        self
    }

    pub fn build(self) -> anyhow::Result<KeyProvider> {
        let backend: Arc<dyn KmsBackend> = match self.backend {
            Backend::CloudKms {
                credentials_file,
                endpoint,
                timeout,
            } => {
                let credentials = Credentials::discover(credentials_file.as_deref())?;
                log::info!("using cloud kms backend with {credentials:?}");
                Arc::new(CloudKmsBackend::new(credentials, endpoint, timeout))
            }
            Backend::Local {
                keyfile,
                passphrase,
            } => {
                log::info!("using local kms backend");
                match (keyfile, passphrase) {
                    (Some(path), _) => Arc::new(LocalKmsBackend::from_keyfile(&path)?),
                    (None, Some(pw)) => Arc::new(LocalKmsBackend::from_passphrase(&pw)?),
                    (None, None) => {
                        anyhow::bail!("local backend requires a keyfile or a passphrase")
                    }
                }
            }
            Backend::Custom(backend) => backend,
        };

        let mut resolver = ParameterResolver::new(self.provider_name);
        if let Some(uri) = self.key_override {
            resolver = resolver.with_override(uri, self.policy);
        }
        if let Some(uri) = resolver.key_override() {
            log::info!("kms key uri pinned to {uri} ({:?})", resolver.policy());
        }
        Ok(KeyProvider::new(resolver, backend))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    #[default]
    CloudKms,
    Local,
}

/// Flags shared by the one-shot and the server front-ends.
#[derive(Clone, Debug, Args)]
pub struct ProviderArgs {
    /// Path to a Google credentials JSON file (service account or authorized user).
    #[arg(long, env = "KMSCRYPT_ADC")]
    pub adc: Option<PathBuf>,

    /// KMS key URI pinned by this deployment, e.g.
    /// gcpkms://projects/P/locations/global/keyRings/R/cryptoKeys/K/cryptoKeyVersions/1
    #[arg(long = "kms-uri", alias = "kmsURI", env = "KMSCRYPT_KMS_URI")]
    pub kms_uri: Option<String>,

    /// Whether the pinned key URI replaces or only backs up the request's.
    #[arg(
        long,
        value_enum,
        env = "KMSCRYPT_OVERRIDE_POLICY",
        default_value_t = OverridePolicy::OverrideWins
    )]
    pub override_policy: OverridePolicy,

    /// Parameter map key holding the key URI.
    #[arg(long, env = "KMSCRYPT_PROVIDER_NAME", default_value = PROVIDER_NAME)]
    pub provider_name: String,

    #[arg(long, value_enum, env = "KMSCRYPT_BACKEND", default_value_t = BackendKind::CloudKms)]
    pub backend: BackendKind,

    /// Cloud KMS API endpoint.
    #[arg(long, env = "KMSCRYPT_KMS_ENDPOINT")]
    pub kms_endpoint: Option<String>,

    /// Timeout for each Cloud KMS HTTP call, in seconds.
    #[arg(long, env = "KMSCRYPT_KMS_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub kms_timeout_secs: u64,

    /// 32-byte key file for the local backend.
    #[arg(long, env = "KMSCRYPT_LOCAL_KEYFILE")]
    pub local_keyfile: Option<PathBuf>,

    /// Passphrase for the local backend.
    #[arg(long, env = "KMSCRYPT_LOCAL_PASSPHRASE", hide_env_values = true)]
    pub local_passphrase: Option<String>,
}

impl ProviderArgs {
    pub fn backend(&self) -> Backend {
        match self.backend {
            BackendKind::CloudKms => Backend::CloudKms {
                credentials_file: self.adc.clone(),
                endpoint: self.kms_endpoint.clone(),
                timeout: Duration::from_secs(self.kms_timeout_secs),
            },
            BackendKind::Local => Backend::Local {
                keyfile: self.local_keyfile.clone(),
                passphrase: self.local_passphrase.clone(),
            },
        }
    }

    pub fn builder(&self) -> KeyProviderBuilder {
        KeyProviderBuilder::new(self.backend())
            .provider_name(self.provider_name.clone())
            .key_override(self.kms_uri.clone(), self.override_policy)
    }

    pub fn build(&self) -> anyhow::Result<KeyProvider> {
        self.builder().build()
    }
}
