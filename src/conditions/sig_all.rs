//! Aggregate witnesses (`SIG_ALL`): one signature set authorizes an entire
//! multi-input, multi-output transaction.
//!
//! All inputs must carry the same policy. The signatures cover a single canonical
//! message built from every input and output, so changing any part of the transaction
//! after signing invalidates the witness. The signature set travels on the first input
//! only.

use crate::conditions::witness::{
    collect_signatures, count_valid_signatures, lock_expired, preimage_matches, WitnessError,
};
use crate::conditions::{ConditionsError, SigFlag, SpendingConditions};
use crate::hashes::sha256;
use crate::helpers::Timestamp;
use crate::keys::SecretKey;
use crate::proof::{BlindedMessage, Proof, Witness};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigAllError {
    #[error(transparent)]
    Conditions(#[from] ConditionsError),
    #[error(transparent)]
    Witness(#[from] WitnessError),
    #[error("An aggregate witness needs at least one input")]
    NoInputs,
    #[error("Inputs do not all carry identical spending conditions")]
    ConditionsMismatch,
    #[error("Inputs are not flagged for aggregate signing")]
    NotSigAll,
}

/// The canonical transaction message: in input order, each input's exact secret bytes
/// followed by its signature point hex; then each output's amount (decimal) followed by
/// its blinded point hex; then the melt quote id when the transaction pays a specific
/// quote. SHA-256 of the concatenation.
pub fn aggregate_message(
    inputs: &[Proof],
    outputs: &[BlindedMessage],
    melt_quote_id: Option<&str>,
) -> [u8; 32] {
    let mut transcript = String::new();
    for input in inputs {
        transcript.push_str(input.secret.as_str());
        transcript.push_str(&input.c.as_hex());
    }
    for output in outputs {
        transcript.push_str(&output.amount.to_string());
        transcript.push_str(&output.blinded_secret.as_hex());
    }
    if let Some(quote_id) = melt_quote_id {
        transcript.push_str(quote_id);
    }
    sha256(transcript.as_bytes())
}

/// Checks that every input carries the same aggregate-flagged policy and returns it.
///
/// "Same" means byte-identical data and tags; nonces are expected to differ. Any
/// mismatch is fatal before a single signature is made.
fn uniform_conditions(inputs: &[Proof]) -> Result<SpendingConditions, SigAllError> {
    let first = inputs.first().ok_or(SigAllError::NoInputs)?;
    let reference = first.secret.as_structured().map_err(ConditionsError::from)?;
    for input in &inputs[1..] {
        let structured = input.secret.as_structured().map_err(ConditionsError::from)?;
        if structured.kind != reference.kind
            || structured.data != reference.data
            || structured.tags != reference.tags
        {
            return Err(SigAllError::ConditionsMismatch);
        }
    }
    let conditions = SpendingConditions::from_structured(&reference)?;
    if conditions.conditions().sig_flag != SigFlag::SigAll {
        return Err(SigAllError::NotSigAll);
    }
    Ok(conditions)
}

/// Signs a whole transaction, attaching the witness to the first input.
///
/// The preimage is required for hash-locked inputs while the lock is active and ships
/// with the witness. Binding `melt_quote_id` ties the signatures to one specific
/// payment so they cannot be replayed against another.
pub fn sign_transaction(
    inputs: &mut [Proof],
    outputs: &[BlindedMessage],
    signing_keys: &[SecretKey],
    melt_quote_id: Option<&str>,
    preimage: Option<&str>,
    now: Timestamp,
) -> Result<(), SigAllError> {
    let conditions = uniform_conditions(inputs)?;
    let (allowed, threshold) = conditions.signatories(now);
    if threshold == 0 {
        return Ok(());
    }

    let mut witness_preimage = None;
    if let SpendingConditions::Htlc { hash_lock, .. } = &conditions {
        if !lock_expired(&conditions, now) {
            let preimage = preimage.ok_or(WitnessError::MissingPreimage)?;
            if !preimage_matches(preimage, hash_lock)? {
                return Err(WitnessError::PreimageMismatch.into());
            }
            witness_preimage = Some(preimage.to_string());
        }
    }

    let message = aggregate_message(inputs, outputs, melt_quote_id);
    let signatures = collect_signatures(&message, &allowed, threshold, signing_keys)?;
    inputs[0].witness = Some(Witness {
        preimage: witness_preimage,
        signatures,
    });
    Ok(())
}

/// Verifies an aggregate witness by reconstructing the transaction message from the
/// full input and output set. Returns `false` when the witness does not satisfy the
/// policy; errors are reserved for transactions that are malformed before any
/// cryptographic check applies.
pub fn verify_transaction(
    inputs: &[Proof],
    outputs: &[BlindedMessage],
    melt_quote_id: Option<&str>,
    now: Timestamp,
) -> Result<bool, SigAllError> {
    let conditions = uniform_conditions(inputs)?;
    let (allowed, threshold) = conditions.signatories(now);
    if threshold == 0 {
        return Ok(true);
    }

    let Some(witness) = &inputs[0].witness else {
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

    let message = aggregate_message(inputs, outputs, melt_quote_id);
    Ok(count_valid_signatures(&message, &allowed, &witness.signatures) >= threshold)
}
