//! Wrap and unwrap of layer content keys through a KMS backend.

use std::sync::Arc;

use crate::{
    annotation::AnnotationPacket,
    error::{KeyProviderError, Result},
    kms::KmsBackend,
    params::{KeyUri, ParameterResolver},
    protocol::{self, ContentKey, KeyWrapProtocolInput, Request, UnwrapRequest, WrapRequest},
};

/// The key-provider core. Holds no per-request state, so one instance
/// serves any number of concurrent requests.
#[derive(Clone)]
pub struct KeyProvider {
    resolver: ParameterResolver,
    backend: Arc<dyn KmsBackend>,
}

impl KeyProvider {
    pub fn new(resolver: ParameterResolver, backend: Arc<dyn KmsBackend>) -> Self {
        Self { resolver, backend }
    }

    pub fn resolver(&self) -> &ParameterResolver {
        &self.resolver
    }

    /// Encrypt the content key under the resolved KMS key and return the
    /// encoded annotation packet.
    pub fn wrap_key(&self, request: &WrapRequest) -> Result<Vec<u8>> {
        let key = self.resolver.resolve(&request.parameters)?;
        let wrapped = self
            .backend
            .encrypt(key.key_name(), request.content_key.as_bytes())
            .map_err(KeyProviderError::backend)?;
        log::info!("wrapped layer key with {key}");
        AnnotationPacket::new(key.as_str(), wrapped).encode()
    }

    /// Recover the content key from an annotation packet. The key named by
    /// the request must be the one recorded in the packet.
    pub fn unwrap_key(&self, request: &UnwrapRequest) -> Result<ContentKey> {
        let packet = AnnotationPacket::decode(&request.annotation)?;
        let requested = self.resolver.resolve_uri(&request.parameters)?;
        if requested != packet.key_url {
            return Err(KeyProviderError::KeyIdentifierMismatch {
                requested,
                recorded: packet.key_url,
            });
        }

        let key = KeyUri::parse(requested)?;
        let plaintext = self
            .backend
            .decrypt(key.key_name(), &packet.wrapped_key)
            .map_err(KeyProviderError::backend)?;
        log::info!("unwrapped layer key with {key}");
        Ok(ContentKey::from_bytes(plaintext))
    }

    /// Serve one serialized protocol input, dispatching on its `op`.
    pub fn handle(&self, input: &[u8]) -> Result<Vec<u8>> {
        match protocol::decode_request(input)? {
            Request::Wrap(request) => self.handle_wrap_request(&request),
            Request::Unwrap(request) => self.handle_unwrap_request(&request),
        }
    }

    /// Serve a serialized input as a wrap, regardless of its `op`.
    pub fn handle_wrap(&self, input: &[u8]) -> Result<Vec<u8>> {
        let request = KeyWrapProtocolInput::from_slice(input)?.into_wrap_request();
        self.handle_wrap_request(&request)
    }

    /// Serve a serialized input as an unwrap, regardless of its `op`.
    pub fn handle_unwrap(&self, input: &[u8]) -> Result<Vec<u8>> {
        let request = KeyWrapProtocolInput::from_slice(input)?.into_unwrap_request();
        self.handle_unwrap_request(&request)
    }

    fn handle_wrap_request(&self, request: &WrapRequest) -> Result<Vec<u8>> {
        log::debug!("wrap request: {request:?}");
        protocol::encode_wrap_response(self.wrap_key(request)?)
    }

    fn handle_unwrap_request(&self, request: &UnwrapRequest) -> Result<Vec<u8>> {
        log::debug!("unwrap request with {} byte annotation", request.annotation.len());
        protocol::encode_unwrap_response(&self.unwrap_key(request)?)
    }
}
