//! Per-input witnesses: each restricted input is signed on its own (the default
//! `SIG_INPUTS` mode).

use crate::conditions::{ConditionsError, SpendingConditions};
use crate::hashes::sha256;
use crate::helpers::Timestamp;
use crate::keys::{PublicKey, SecretKey};
use crate::proof::{Proof, Witness};
use crate::secret::Secret;
use bitcoin::secp256k1::schnorr::Signature;
use log::warn;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WitnessError {
    #[error(transparent)]
    Conditions(#[from] ConditionsError),
    #[error("Not enough valid keys: threshold is {needed}, only {got} allowed keys available")]
    NotEnoughValidKeys { needed: u64, got: u64 },
    #[error("A hash-locked token cannot be signed without its preimage")]
    MissingPreimage,
    #[error("Preimage is not valid hex")]
    MalformedPreimage,
    #[error("Preimage does not hash to the stored lock")]
    PreimageMismatch,
}

/// The message a per-input signature commits to: SHA-256 of the exact secret bytes.
pub fn input_message(secret: &Secret) -> [u8; 32] {
    sha256(secret.as_bytes())
}

/// Output-side counterpart, binding a signature to a blinded message instead:
/// SHA-256 of the compressed point's lowercase hex.
pub fn output_message(blinded_secret: &PublicKey) -> [u8; 32] {
    sha256(blinded_secret.as_hex().as_bytes())
}

pub(crate) fn preimage_matches(preimage: &str, hash_lock: &str) -> Result<bool, WitnessError> {
    let bytes = hex::decode(preimage).map_err(|_| WitnessError::MalformedPreimage)?;
    Ok(hex::encode(sha256(&bytes)) == hash_lock)
}

pub(crate) fn lock_expired(conditions: &SpendingConditions, now: Timestamp) -> bool {
    conditions
        .conditions()
        .locktime
        .is_some_and(|locktime| now.as_secs() >= locktime.as_secs())
}

/// Produces up to `threshold` signatures on `message` from the signing keys that match
/// an allowed key, each allowed key used at most once.
pub(crate) fn collect_signatures(
    message: &[u8; 32],
    allowed: &[PublicKey],
    threshold: u64,
    signing_keys: &[SecretKey],
) -> Result<Vec<String>, WitnessError> {
    let mut remaining: Vec<PublicKey> = allowed.to_vec();
    let mut signatures = Vec::new();
    for key in signing_keys {
        if signatures.len() as u64 >= threshold {
            break;
        }
        let pubkey = key.public_key();
        if let Some(slot) = remaining.iter().position(|allowed| *allowed == pubkey) {
            remaining.swap_remove(slot);
            signatures.push(key.sign_schnorr(*message).to_string());
        }
    }
    if (signatures.len() as u64) < threshold {
        return Err(WitnessError::NotEnoughValidKeys {
            needed: threshold,
            got: signatures.len() as u64,
        });
    }
    Ok(signatures)
}

/// Counts how many allowed keys have a valid signature on `message` among the given
/// signature hex strings. Unparsable signatures are skipped; each signature and each
/// key count at most once.
pub(crate) fn count_valid_signatures(
    message: &[u8; 32],
    allowed: &[PublicKey],
    signatures: &[String],
) -> u64 {
    let mut remaining: Vec<PublicKey> = allowed.to_vec();
    let mut count = 0u64;
    for sig_hex in signatures {
        let Ok(signature) = sig_hex.parse::<Signature>() else {
            warn!("skipping unparsable witness signature: {sig_hex}");
            continue;
        };
        if let Some(slot) = remaining
            .iter()
            .position(|key| key.verify_schnorr(*message, &signature))
        {
            remaining.swap_remove(slot);
            count += 1;
        }
    }
    count
}

/// Signs one restricted input in place, attaching the witness.
///
/// The keys that actually sign are those of the caller's signing keys matching the
/// policy's allowed set at time `now`; signing stops at the threshold. A hash-locked
/// input additionally needs its preimage (hex), verified against the lock before any
/// signature is made and shipped inside the witness. Once the lock has expired the
/// refund policy applies instead and the preimage is no longer involved.
pub fn sign_input(
    proof: &mut Proof,
    signing_keys: &[SecretKey],
    preimage: Option<&str>,
    now: Timestamp,
) -> Result<(), WitnessError> {
    let conditions = SpendingConditions::from_secret(&proof.secret)?;
    let (allowed, threshold) = conditions.signatories(now);
    if threshold == 0 {
        // Expired lock with no refund keys: nothing to witness.
        return Ok(());
    }

    let mut witness_preimage = None;
    if let SpendingConditions::Htlc { hash_lock, .. } = &conditions {
        if !lock_expired(&conditions, now) {
            let preimage = preimage.ok_or(WitnessError::MissingPreimage)?;
            if !preimage_matches(preimage, hash_lock)? {
                return Err(WitnessError::PreimageMismatch);
            }
            witness_preimage = Some(preimage.to_string());
        }
    }

    let message = input_message(&proof.secret);
    let signatures = collect_signatures(&message, &allowed, threshold, signing_keys)?;
    proof.witness = Some(Witness {
        preimage: witness_preimage,
        signatures,
    });
    Ok(())
}

/// Checks one input's witness against its policy at time `now`.
///
/// Returns `false` for any witness that does not satisfy the policy, including a
/// missing witness or a wrong preimage; errors are reserved for secrets that do not
/// decode to a policy at all.
pub fn verify_input(proof: &Proof, now: Timestamp) -> Result<bool, WitnessError> {
    let conditions = SpendingConditions::from_secret(&proof.secret)?;
    let (allowed, threshold) = conditions.signatories(now);
    if threshold == 0 {
        return Ok(true);
    }

    let Some(witness) = &proof.witness else {
        return Ok(false);
    };

    if let SpendingConditions::Htlc { hash_lock, .. } = &conditions {
        if !lock_expired(&conditions, now) {
            let Some(preimage) = &witness.preimage else {
                return Ok(false);
            };
            match preimage_matches(preimage, hash_lock) {
                Ok(true) => {}
                Ok(false) | Err(_) => return Ok(false),
            }
        }
    }

    let message = input_message(&proof.secret);
    Ok(count_valid_signatures(&message, &allowed, &witness.signatures) >= threshold)
}
