//! OCI image-layer key provider backed by a key management service.
//!
//! An image encryption tool hands each layer's content key to this provider
//! to be wrapped (encrypted) under a KMS key, and hands back the resulting
//! annotation to have it unwrapped. The provider never sees the layer data.
//!
//! ```text
//! request bytes -> protocol -> KeyProvider --resolve--> params
//!                                   |   \---encrypt/decrypt--> kms
//!                                   \--- annotation -> response bytes
//! ```

pub mod annotation;
pub mod config;
pub mod error;
pub mod keywrap;
pub mod kms;
pub mod params;
pub mod protocol;

pub use annotation::AnnotationPacket;
pub use config::{Backend, KeyProviderBuilder, ProviderArgs};
pub use error::{KeyProviderError, Result};
pub use keywrap::KeyProvider;
pub use kms::KmsBackend;
pub use params::{KeyUri, OverridePolicy, ParameterResolver, Parameters};
pub use protocol::{ContentKey, UnwrapRequest, WrapRequest};
