//! Random credential generation.

use rand::RngExt;

/// Bytes of randomness per generated credential (160 bits).
pub const CREDENTIAL_BYTES: usize = 20;

/// Source of high-entropy credential strings.
///
/// Injected into the issuer and the API key registry so tests can substitute
/// a deterministic sequence.
pub trait CredentialGenerator: Send + Sync + 'static {
    /// Produce a fresh credential string.
    fn generate(&self) -> String;
}

/// Default generator: [`CREDENTIAL_BYTES`] from the thread-local CSPRNG,
/// lower-case hex encoded (40 characters).
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomHexGenerator;

impl CredentialGenerator for RandomHexGenerator {
    fn generate(&self) -> String {
        let bytes: [u8; CREDENTIAL_BYTES] = rand::rng().random();
        hex::encode(bytes)
    }
}
