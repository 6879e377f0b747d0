//! Ed25519 signing adapter.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use iou_contract::{OwningKey, PartySignature, ProposalId};
use sha2::{Digest, Sha256};

use crate::collaborators::{CollaboratorError, SigningService};

/// Holds one party's Ed25519 signing key.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Deterministic key derived from a label. Test networks only.
    pub fn derive(label: &str) -> Self {
        let mut h = Sha256::new();
        h.update(b"iou-signer/v1:");
        h.update(label.as_bytes());
        Self::from_seed(h.finalize().into())
    }

    /// Verify without holding any key material.
    pub fn verify_detached(id: &ProposalId, sig: &PartySignature) -> bool {
        let Ok(vk) = VerifyingKey::from_bytes(sig.by.as_bytes()) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&sig.bytes) else {
            return false;
        };
        vk.verify(id.as_bytes(), &signature).is_ok()
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("owning_key", &self.owning_key())
            .finish_non_exhaustive()
    }
}

impl SigningService for Ed25519Signer {
    fn owning_key(&self) -> OwningKey {
        OwningKey(self.key.verifying_key().to_bytes())
    }

    fn sign(&self, id: &ProposalId) -> Result<PartySignature, CollaboratorError> {
        let sig = self.key.sign(id.as_bytes());
        Ok(PartySignature {
            by: self.owning_key(),
            bytes: sig.to_bytes().to_vec(),
        })
    }

    fn verify(&self, id: &ProposalId, sig: &PartySignature) -> bool {
        Self::verify_detached(id, sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verifies_for_signed_id_only() {
        let signer = Ed25519Signer::derive("alice");
        let id = ProposalId([7; 32]);
        let sig = signer.sign(&id).unwrap();
        assert_eq!(sig.by, signer.owning_key());
        assert!(signer.verify(&id, &sig));
        assert!(!signer.verify(&ProposalId([8; 32]), &sig));
    }

    #[test]
    fn derived_keys_are_stable_and_distinct() {
        let a1 = Ed25519Signer::derive("alice");
        let a2 = Ed25519Signer::derive("alice");
        let b = Ed25519Signer::derive("bob");
        assert_eq!(a1.owning_key(), a2.owning_key());
        assert_ne!(a1.owning_key(), b.owning_key());
    }

    #[test]
    fn forged_signer_tag_is_rejected() {
        let alice = Ed25519Signer::derive("alice");
        let bob = Ed25519Signer::derive("bob");
        let id = ProposalId([1; 32]);
        let mut sig = bob.sign(&id).unwrap();
        sig.by = alice.owning_key();
        assert!(!alice.verify(&id, &sig));
    }

    #[test]
    fn verify_signatures_requires_every_key() {
        let alice = Ed25519Signer::derive("alice");
        let bob = Ed25519Signer::derive("bob");
        let id = ProposalId([3; 32]);
        let required = [alice.owning_key(), bob.owning_key()].into_iter().collect();
        let only_alice = vec![alice.sign(&id).unwrap()];
        assert!(!alice.verify_signatures(&id, &only_alice, &required));
        let both = vec![alice.sign(&id).unwrap(), bob.sign(&id).unwrap()];
        assert!(alice.verify_signatures(&id, &both, &required));
    }

    #[test]
    fn truncated_signature_is_rejected() {
        let alice = Ed25519Signer::derive("alice");
        let id = ProposalId([5; 32]);
        let mut sig = alice.sign(&id).unwrap();
        sig.bytes.truncate(10);
        assert!(!Ed25519Signer::verify_detached(&id, &sig));
    }
}
