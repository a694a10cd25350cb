pub mod cloud;
pub mod credentials;
pub mod local;

#[cfg(test)]
mod test_server;

/// Synchronous encrypt/decrypt primitives of a key management service.
///
/// `key_name` is the backend-native key name, i.e. the key URI with its
/// scheme stripped. No additional authenticated data is passed. Backends are
/// shared between concurrent requests.
pub trait KmsBackend: Send + Sync + 'static {
    /// Encrypt `plaintext` under the named key.
    fn encrypt(&self, key_name: &str, plaintext: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Decrypt `ciphertext` produced by [`KmsBackend::encrypt`] under the
    /// same key.
    fn decrypt(&self, key_name: &str, ciphertext: &[u8]) -> anyhow::Result<Vec<u8>>;
}
