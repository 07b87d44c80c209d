//! Identity and signature verification

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Identity is not a valid public key")]
    MalformedIdentity,

    #[error("Signature is not well formed")]
    MalformedSignature,

    #[error("Identity is not known to this orderer")]
    UnknownIdentity,

    #[error("Signature does not verify")]
    InvalidSignature,
}

/// Checks that `identity` signed `message`
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, identity: &[u8], message: &[u8], signature: &[u8]) -> Result<(), VerifyError>;
}

/// Identities are raw 32-byte ed25519 public keys.
///
/// With an allow-list, keys outside it fail with `UnknownIdentity` even if
/// the signature is valid.
#[derive(Debug, Clone, Default)]
pub struct Ed25519Verifier {
    known: Option<HashSet<[u8; 32]>>,
}

impl Ed25519Verifier {
    /// Accept any well-formed key
    pub fn new() -> Self {
        Self { known: None }
    }

    /// Accept only the listed keys
    pub fn with_known_identities<I>(identities: I) -> Self
    where
        I: IntoIterator<Item = [u8; 32]>,
    {
        Self {
            known: Some(identities.into_iter().collect()),
        }
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, identity: &[u8], message: &[u8], signature: &[u8]) -> Result<(), VerifyError> {
        let key_bytes: [u8; 32] = identity
            .try_into()
            .map_err(|_| VerifyError::MalformedIdentity)?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| VerifyError::MalformedIdentity)?;

        if let Some(known) = &self.known {
            if !known.contains(&key_bytes) {
                return Err(VerifyError::UnknownIdentity);
            }
        }

        let signature = Signature::from_slice(signature).map_err(|_| VerifyError::MalformedSignature)?;
        key.verify(message, &signature)
            .map_err(|_| VerifyError::InvalidSignature)
    }
}
