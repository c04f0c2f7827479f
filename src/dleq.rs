use crate::dhke::{hash_to_curve, DhkeError};
use crate::hashes::sha256;
use crate::keys::{KeyError, PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DleqError {
    #[error("Proof carries no blinding factor, an unblinded signature cannot be re-verified")]
    MissingBlindingFactor,
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Dhke(#[from] DhkeError),
    #[error("Could not derive a valid challenge scalar")]
    ChallengeDerivation,
}

/// Non-interactive proof that the mint used one discrete log `k` for both its published
/// key `A = k·G` and a blind signature `C_ = k·B_`.
///
/// `e` is the Fiat-Shamir challenge and `s` the response. The blinding factor `r` is
/// absent on the wire form the mint returns; the holder attaches it after unblinding so
/// that anyone given the proof can later re-verify against the unblinded `C` alone.
///
/// Verification failure is a `false` result, never an error: a token whose proof does
/// not verify is simply to be rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DleqProof {
    pub e: SecretKey,
    pub s: SecretKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r: Option<SecretKey>,
}

/// `SHA256` over the UTF-8 hex of the four points, uncompressed. The uncompressed form
/// appears nowhere else in the protocol.
fn challenge(r1: &PublicKey, r2: &PublicKey, mint_pubkey: &PublicKey, blinded_signature: &PublicKey) -> [u8; 32] {
    let transcript = format!(
        "{}{}{}{}",
        hex::encode(r1.to_uncompressed_bytes()),
        hex::encode(r2.to_uncompressed_bytes()),
        hex::encode(mint_pubkey.to_uncompressed_bytes()),
        hex::encode(blinded_signature.to_uncompressed_bytes()),
    );
    sha256(transcript.as_bytes())
}

impl DleqProof {
    /// Issuer-side prover: picks a random nonce `p`, commits `R1 = p·G`, `R2 = p·B_`,
    /// and responds `s = p + e·k` to the challenge `e = H(R1, R2, A, C_)`.
    ///
    /// The loop resamples the nonce in the negligible case that a derived value falls
    /// outside the scalar group.
    pub fn prove(
        signing_key: &SecretKey,
        blinded_message: &PublicKey,
        blinded_signature: &PublicKey,
    ) -> Result<DleqProof, DleqError> {
        let mint_pubkey = signing_key.public_key();
        for _ in 0..16 {
            let p = SecretKey::random();
            let r1 = p.public_key();
            let r2 = blinded_message.mul_tweak(&p)?;
            let e_bytes = challenge(&r1, &r2, &mint_pubkey, blinded_signature);
            let Ok(e) = SecretKey::from_slice(&e_bytes) else {
                continue;
            };
            let Ok(e_times_k) = e.mul_tweak(signing_key) else {
                continue;
            };
            let Ok(s) = p.add_tweak(&e_times_k) else {
                continue;
            };
            return Ok(DleqProof { e, s, r: None });
        }
        Err(DleqError::ChallengeDerivation)
    }

    /// Attaches the holder's blinding factor so the proof stays verifiable after
    /// unblinding.
    pub fn with_blinding_factor(mut self, blinding_factor: SecretKey) -> DleqProof {
        self.r = Some(blinding_factor);
        self
    }

    /// Verifies the proof against the blinded pair `(B_, C_)`:
    /// recomputes `R1 = s·G − e·A` and `R2 = s·B_ − e·C_` and accepts iff the challenge
    /// matches. Any degenerate point arithmetic counts as a mismatch.
    pub fn verify_blinded(
        &self,
        blinded_message: &PublicKey,
        blinded_signature: &PublicKey,
        mint_pubkey: &PublicKey,
    ) -> bool {
        let Ok(e_times_a) = mint_pubkey.mul_tweak(&self.e) else {
            return false;
        };
        let Ok(r1) = self.s.public_key().combine(&e_times_a.negate()) else {
            return false;
        };
        let Ok(s_times_b) = blinded_message.mul_tweak(&self.s) else {
            return false;
        };
        let Ok(e_times_c) = blinded_signature.mul_tweak(&self.e) else {
            return false;
        };
        let Ok(r2) = s_times_b.combine(&e_times_c.negate()) else {
            return false;
        };
        challenge(&r1, &r2, mint_pubkey, blinded_signature) == self.e.secret_bytes()
    }

    /// Verifies the proof for an already-unblinded signature `C` on `secret_bytes`.
    ///
    /// Re-derives `B_ = hash_to_curve(secret) + r·G` and `C_ = C + r·A` from the stored
    /// blinding factor, then runs the blinded verification. Requires `r`; a proof that
    /// never had the factor attached cannot be checked this way.
    pub fn verify_unblinded(
        &self,
        mint_pubkey: &PublicKey,
        secret_bytes: &[u8],
        unblinded_signature: &PublicKey,
    ) -> Result<bool, DleqError> {
        let r = self.r.as_ref().ok_or(DleqError::MissingBlindingFactor)?;
        let y = hash_to_curve(secret_bytes)?;
        let Ok(blinded_message) = y.combine(&r.public_key()) else {
            return Ok(false);
        };
        let Ok(r_times_a) = mint_pubkey.mul_tweak(r) else {
            return Ok(false);
        };
        let Ok(blinded_signature) = unblinded_signature.combine(&r_times_a) else {
            return Ok(false);
        };
        Ok(self.verify_blinded(&blinded_message, &blinded_signature, mint_pubkey))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhke::{blind_message, sign_message, unblind_message};
    use crate::secret::Secret;

    fn proven_tuple() -> (SecretKey, PublicKey, PublicKey, DleqProof) {
        let mint_key = SecretKey::random();
        let secret = Secret::generate();
        let (blinded, _r) = blind_message(secret.as_bytes(), None).unwrap();
        let blind_sig = sign_message(&mint_key, &blinded).unwrap();
        let proof = DleqProof::prove(&mint_key, &blinded, &blind_sig).unwrap();
        (mint_key, blinded, blind_sig, proof)
    }

    #[test]
    fn prove_then_verify() {
        let (mint_key, blinded, blind_sig, proof) = proven_tuple();
        assert!(proof.verify_blinded(&blinded, &blind_sig, &mint_key.public_key()));
    }

    #[test]
    fn tampered_mint_key_fails() {
        let (_mint_key, blinded, blind_sig, proof) = proven_tuple();
        let other = SecretKey::random().public_key();
        assert!(!proof.verify_blinded(&blinded, &blind_sig, &other));
    }

    #[test]
    fn tampered_response_fails() {
        let (mint_key, blinded, blind_sig, mut proof) = proven_tuple();
        proof.s = SecretKey::random();
        assert!(!proof.verify_blinded(&blinded, &blind_sig, &mint_key.public_key()));
    }

    #[test]
    fn unblinded_verification_roundtrip() {
        let mint_key = SecretKey::random();
        let secret = Secret::generate();
        let (blinded, r) = blind_message(secret.as_bytes(), None).unwrap();
        let blind_sig = sign_message(&mint_key, &blinded).unwrap();
        let unblinded = unblind_message(&blind_sig, &r, &mint_key.public_key()).unwrap();

        let proof = DleqProof::prove(&mint_key, &blinded, &blind_sig)
            .unwrap()
            .with_blinding_factor(r);
        assert!(proof
            .verify_unblinded(&mint_key.public_key(), secret.as_bytes(), &unblinded)
            .unwrap());

        // A different secret cannot satisfy the same proof.
        let other = Secret::generate();
        assert!(!proof
            .verify_unblinded(&mint_key.public_key(), other.as_bytes(), &unblinded)
            .unwrap());
    }

    #[test]
    fn unblinded_verification_requires_factor() {
        let (mint_key, _blinded, blind_sig, proof) = proven_tuple();
        let result = proof.verify_unblinded(&mint_key.public_key(), b"whatever", &blind_sig);
        assert!(matches!(result, Err(DleqError::MissingBlindingFactor)));
    }

    #[test]
    fn wire_form_omits_blinding_factor() {
        let (_, _, _, proof) = proven_tuple();
        let json = serde_json::to_string(&proof).unwrap();
        assert!(!json.contains("\"r\""));
        let with_r = proof.with_blinding_factor(SecretKey::random());
        let json = serde_json::to_string(&with_r).unwrap();
        assert!(json.contains("\"r\""));
        let back: DleqProof = serde_json::from_str(&json).unwrap();
        assert_eq!(back, with_r);
    }
}
