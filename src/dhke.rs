use crate::hashes::sha256_concat;
use crate::keys::{KeyError, PublicKey, SecretKey};
use thiserror::Error;

/// Domain separator for hashing a secret message to a curve point. This string is part
/// of the protocol; changing it breaks interoperability with every other implementation.
pub const HASH_TO_CURVE_DOMAIN: &[u8] = b"Secp256k1_HashToCurve_Cashu_";

/// Upper bound on the hash-to-curve counter. Roughly half of all candidate x
/// coordinates lie on the curve, so failing 2^16 times in a row does not happen for
/// honestly generated input.
const MAX_HASH_TO_CURVE_ITERATIONS: u32 = 1 << 16;

#[derive(Debug, Error)]
pub enum DhkeError {
    #[error("No valid curve point found for message")]
    NoValidPoint,
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Deterministically maps a message to a curve point `Y` with unknown discrete log.
///
/// `h = SHA256(DOMAIN ‖ message)`; then for `counter = 0, 1, 2, …` the candidate
/// `0x02 ‖ SHA256(h ‖ LE32(counter))` is parsed as a compressed point and the first
/// valid one wins. The little-endian counter width and the domain separator are fixed
/// by the protocol.
pub fn hash_to_curve(message: &[u8]) -> Result<PublicKey, DhkeError> {
    let msg_hash = sha256_concat(&[HASH_TO_CURVE_DOMAIN, message]);
    let mut candidate = [0u8; 33];
    candidate[0] = 0x02;
    for counter in 0..MAX_HASH_TO_CURVE_ITERATIONS {
        let digest = sha256_concat(&[&msg_hash, &counter.to_le_bytes()]);
        candidate[1..].copy_from_slice(&digest);
        if let Ok(point) = PublicKey::from_slice(&candidate) {
            return Ok(point);
        }
    }
    Err(DhkeError::NoValidPoint)
}

/// Blinds a secret message for issuance: `B_ = Y + r·G` with `Y = hash_to_curve(message)`.
///
/// A fresh random blinding factor is drawn unless the caller passes one (the
/// deterministic-derivation path does). Returns the blinded point and the factor the
/// caller must keep to unblind the mint's signature later.
pub fn blind_message(
    message: &[u8],
    blinding_factor: Option<SecretKey>,
) -> Result<(PublicKey, SecretKey), DhkeError> {
    let y = hash_to_curve(message)?;
    let r = blinding_factor.unwrap_or_else(SecretKey::random);
    let blinded = y.combine(&r.public_key())?;
    Ok((blinded, r))
}

/// Issuer-side blind signing: `C_ = k·B_`.
///
/// The mint is a remote party; this lives here for the DLEQ prover, the protocol tests
/// and local verification of test vectors.
pub fn sign_message(signing_key: &SecretKey, blinded_message: &PublicKey) -> Result<PublicKey, DhkeError> {
    Ok(blinded_message.mul_tweak(signing_key)?)
}

/// Removes the blinding factor from a blind signature: `C = C_ − r·A`, where `A` is the
/// mint's public key for the amount. `C` is the bearer-token cryptogram.
pub fn unblind_message(
    blinded_signature: &PublicKey,
    blinding_factor: &SecretKey,
    mint_pubkey: &PublicKey,
) -> Result<PublicKey, DhkeError> {
    let r_times_a = mint_pubkey.mul_tweak(blinding_factor)?;
    Ok(blinded_signature.combine(&r_times_a.negate())?)
}

/// Issuer-side check that `C` is a valid signature on `message`: `C == k·hash_to_curve(message)`.
pub fn verify_message(
    signing_key: &SecretKey,
    unblinded_signature: &PublicKey,
    message: &[u8],
) -> Result<bool, DhkeError> {
    let expected = hash_to_curve(message)?.mul_tweak(signing_key)?;
    Ok(expected == *unblinded_signature)
}
