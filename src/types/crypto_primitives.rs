/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives: Ed25519 signing for replica and client messages, and the
//! certificate format under which a trusted counter component binds a counter value to a
//! message.
//!
//! Two signing disciplines coexist in the protocol. Requests and replies carry a plain
//! signature over the borsh serialization of the message body. Prepares and commits instead
//! carry a *counter certificate*: a signature over the counter value concatenated with a
//! SHA-256 digest of the body, produced inside the signer's trusted component. The certificate
//! byte layout defined by [`counter_certificate_bytes`] is shared by every backend of the
//! [`Usig`](crate::usig::Usig) trait, so certificates produced by one backend verify under any
//! other.

use sha2::{Digest, Sha256};

use super::basic::{SignatureBytes, UsigCounter};

// re-exports below.
pub use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// An Ed25519 signing key as used by replicas, clients, and the simulated trusted component.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign a message body. Used for the plainly-signed message kinds (requests and replies).
    pub(crate) fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Certify the binding of `counter` to `message`: the signature a trusted counter
    /// component attaches when it assigns a counter value to an outbound message.
    pub(crate) fn certify_counter(&self, counter: UsigCounter, message: &[u8]) -> SignatureBytes {
        self.sign(&counter_certificate_bytes(counter, message))
    }

    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }
}

/// Check whether `signature` is a signature created by `verifying_key` over `message`.
pub(crate) fn verify_signature(
    verifying_key: &VerifyingKey,
    message: &[u8],
    signature: &SignatureBytes,
) -> bool {
    let signature = Signature::from_bytes(&signature.bytes());
    verifying_key.verify(message, &signature).is_ok()
}

/// Check whether `signature` certifies the binding of `counter` to `message` under
/// `verifying_key`.
pub(crate) fn verify_counter_certificate(
    verifying_key: &VerifyingKey,
    counter: UsigCounter,
    message: &[u8],
    signature: &SignatureBytes,
) -> bool {
    verify_signature(
        verifying_key,
        &counter_certificate_bytes(counter, message),
        signature,
    )
}

/// The byte string a counter certificate signs over: the little-endian counter value followed
/// by a SHA-256 digest of the message body. The trusted component signs a fixed-size input,
/// whatever the size of the operation payload.
pub(crate) fn counter_certificate_bytes(counter: UsigCounter, message: &[u8]) -> Vec<u8> {
    let mut bytes = counter.int().to_le_bytes().to_vec();
    bytes.extend_from_slice(&message_digest(message));
    bytes
}

/// SHA-256 digest of a message body.
pub(crate) fn message_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(message);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn counter_certificates_bind_both_counter_and_message() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng));
        let certificate = keypair.certify_counter(UsigCounter::new(1), b"body");

        assert!(verify_counter_certificate(
            &keypair.public(),
            UsigCounter::new(1),
            b"body",
            &certificate
        ));
        // The same certificate stands for neither a different counter nor a different body.
        assert!(!verify_counter_certificate(
            &keypair.public(),
            UsigCounter::new(2),
            b"body",
            &certificate
        ));
        assert!(!verify_counter_certificate(
            &keypair.public(),
            UsigCounter::new(1),
            b"other",
            &certificate
        ));
    }
}
