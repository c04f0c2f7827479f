//! Identity-blinded signer keys.
//!
//! A lock normally publishes its signer keys in the clear, so an observer can
//! correlate a token to the identities allowed to spend it. Here each signer slot `i`
//! publishes `B_i = P_i + r_i * G` instead, where `r_i` is derived from an ECDH secret
//! between an ephemeral key and the real key `P_i`. The ephemeral public key travels
//! with the token; only the ephemeral-key holder and the signers themselves can link a
//! slot to a real identity.
//!
//! Verification needs nothing from this module: a blinded key is an ordinary curve
//! point and signatures made with the tweaked secret `p_i + r_i` verify against it
//! through [`witness::verify_input`] unchanged.
//!
//! For per-input signing a fresh ephemeral key is drawn per output; for aggregate
//! (`SIG_ALL`) transactions one ephemeral key is supplied explicitly and shared by
//! every input, since all inputs must carry byte-identical tags.

use crate::conditions::witness::{self, WitnessError};
use crate::conditions::{ConditionsError, SpendingConditions};
use crate::hashes::sha256_concat;
use crate::helpers::Timestamp;
use crate::keys::{KeyError, PublicKey, SecretKey};
use crate::keyset::KeysetId;
use crate::proof::Proof;
use log::warn;
use thiserror::Error;

/// Domain separator for slot tweak derivation.
const BLINDED_KEY_DOMAIN: &[u8] = b"Secp256k1_BlindedKey_";

/// Upper bound on tweak derivation retries for one slot.
const MAX_TWEAK_ATTEMPTS: u16 = 256;

#[derive(Debug, Error)]
pub enum BlindedKeyError {
    #[error(transparent)]
    Conditions(#[from] ConditionsError),
    #[error(transparent)]
    Witness(#[from] WitnessError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("Could not derive a valid tweak scalar for slot {0}")]
    TweakDerivation(u32),
    #[error("Conditions carry no ephemeral key, signer keys are not blinded")]
    MissingEphemeralKey,
}

/// Derives the tweak scalar for one signer slot from the ECDH shared x coordinate.
///
/// `r_i = SHA256(domain || Zx || keyset id bytes || LE32(i))`; in the negligible case
/// the digest is not a valid scalar, a retry byte is appended and incremented.
fn slot_tweak(shared_x: &[u8; 32], keyset_id: &KeysetId, index: u32) -> Result<SecretKey, BlindedKeyError> {
    let id_bytes = keyset_id.to_bytes();
    let index_bytes = index.to_le_bytes();
    for attempt in 0..MAX_TWEAK_ATTEMPTS {
        let digest = if attempt == 0 {
            sha256_concat(&[BLINDED_KEY_DOMAIN, shared_x, &id_bytes, &index_bytes])
        } else {
            let retry = [(attempt - 1) as u8];
            sha256_concat(&[BLINDED_KEY_DOMAIN, shared_x, &id_bytes, &index_bytes, &retry])
        };
        if let Ok(tweak) = SecretKey::from_slice(&digest) {
            return Ok(tweak);
        }
    }
    Err(BlindedKeyError::TweakDerivation(index))
}

/// Blinds an ordered signer key list: slot `i` becomes `P_i + r_i * G` with
/// `r_i` bound to the ephemeral ECDH secret, the keyset and the slot index.
pub fn blind_signer_keys(
    keys: &[PublicKey],
    keyset_id: &KeysetId,
    ephemeral_key: &SecretKey,
) -> Result<Vec<PublicKey>, BlindedKeyError> {
    keys.iter()
        .enumerate()
        .map(|(index, key)| {
            let shared_x = ephemeral_key.shared_secret_x(key);
            let tweak = slot_tweak(&shared_x, keyset_id, index as u32)?;
            Ok(key.combine(&tweak.public_key())?)
        })
        .collect()
}

/// Rewrites a policy so its primary signer set is blinded, attaching the ephemeral
/// public key as a tag. Slot order is the policy's signatory order: the data-slot key
/// first (key locks), then the tag keys. Refund keys stay in the clear, since the
/// refund branch only ever applies after the lock has publicly expired.
pub fn blind_conditions(
    conditions: &SpendingConditions,
    keyset_id: &KeysetId,
    ephemeral_key: &SecretKey,
) -> Result<SpendingConditions, BlindedKeyError> {
    match conditions {
        SpendingConditions::P2pk { pubkey, conditions } => {
            let mut slots = vec![*pubkey];
            slots.extend(&conditions.pubkeys);
            let blinded = blind_signer_keys(&slots, keyset_id, ephemeral_key)?;
            let mut conditions = conditions.clone();
            conditions.pubkeys = blinded[1..].to_vec();
            conditions.ephemeral_key = Some(ephemeral_key.public_key());
            Ok(SpendingConditions::P2pk {
                pubkey: blinded[0],
                conditions,
            })
        }
        SpendingConditions::Htlc { hash_lock, conditions } => {
            let blinded = blind_signer_keys(&conditions.pubkeys, keyset_id, ephemeral_key)?;
            let mut conditions = conditions.clone();
            conditions.pubkeys = blinded;
            conditions.ephemeral_key = Some(ephemeral_key.public_key());
            Ok(SpendingConditions::Htlc {
                hash_lock: hash_lock.clone(),
                conditions,
            })
        }
    }
}

/// Recovers the tweaked signing keys matching blinded slots.
///
/// Each signer recomputes the shared `Zx` from its own key and the ephemeral public
/// key (ECDH symmetry, no slot index needed up front), then probes every unused slot
/// with both the direct tweak `p + r_i` and the negated-key counterpart `(-p) + r_i`.
/// A hit claims the slot. Fails once fewer than `threshold` slots could be claimed.
pub fn resolve_signing_keys(
    blinded_keys: &[PublicKey],
    keyset_id: &KeysetId,
    ephemeral_pubkey: &PublicKey,
    signing_keys: &[SecretKey],
    threshold: u64,
) -> Result<Vec<SecretKey>, BlindedKeyError> {
    let mut used = vec![false; blinded_keys.len()];
    let mut resolved: Vec<SecretKey> = Vec::new();
    for key in signing_keys {
        if resolved.len() as u64 >= threshold {
            break;
        }
        let shared_x = key.shared_secret_x(ephemeral_pubkey);
        let negated = key.negate();
        'slots: for (index, slot_key) in blinded_keys.iter().enumerate() {
            if used[index] {
                continue;
            }
            let tweak = slot_tweak(&shared_x, keyset_id, index as u32)?;
            for candidate in [key.add_tweak(&tweak), negated.add_tweak(&tweak)] {
                let Ok(candidate) = candidate else {
                    continue;
                };
                if candidate.public_key() == *slot_key {
                    used[index] = true;
                    resolved.push(candidate);
                    break 'slots;
                }
            }
        }
    }
    if (resolved.len() as u64) < threshold {
        warn!(
            "blinded slot search exhausted: {} of {threshold} slots claimed",
            resolved.len()
        );
        return Err(WitnessError::NotEnoughValidKeys {
            needed: threshold,
            got: resolved.len() as u64,
        }
        .into());
    }
    Ok(resolved)
}

/// Signs one input whose signer keys are blinded, using the caller's real keys.
///
/// Resolves the tweaked secrets via the slot search, then signs exactly like an
/// ordinary per-input witness. Once the lock has expired the refund policy applies
/// with keys in the clear, so the search is skipped.
pub fn sign_input(
    proof: &mut Proof,
    signing_keys: &[SecretKey],
    preimage: Option<&str>,
    now: Timestamp,
) -> Result<(), BlindedKeyError> {
    let conditions = SpendingConditions::from_secret(&proof.secret)?;
    let (allowed, threshold) = conditions.signatories(now);
    if threshold == 0 || witness::lock_expired(&conditions, now) {
        return Ok(witness::sign_input(proof, signing_keys, preimage, now)?);
    }
    let ephemeral_pubkey = conditions
        .conditions()
        .ephemeral_key
        .ok_or(BlindedKeyError::MissingEphemeralKey)?;
    let tweaked = resolve_signing_keys(
        &allowed,
        &proof.keyset_id,
        &ephemeral_pubkey,
        signing_keys,
        threshold,
    )?;
    Ok(witness::sign_input(proof, &tweaked, preimage, now)?)
}
