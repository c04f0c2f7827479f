//! Deterministic secret and blinding-factor derivation from a wallet seed.
//!
//! Outputs derived this way can be recreated from the seed alone, which is what makes
//! token recovery possible after data loss. The derivation path is
//! `m/129372'/0'/{keyset id as int31}'/{counter}'/{0|1}'`, leaf 0 for the secret and
//! leaf 1 for the blinding factor. Each call is a pure function of
//! `(seed, keyset id, counter)`, so batches may be derived out of order or
//! concurrently; only the counter reservation is stateful.

use crate::amount::Amount;
use crate::dhke::DhkeError;
use crate::keys::{KeyError, SecretKey, SECP};
use crate::keyset::KeysetId;
use crate::proof::OutputData;
use crate::secret::{Secret, SecretError};
use bitcoin::bip32::{ChildNumber, Xpriv};
use bitcoin::Network;
use std::collections::HashMap;
use thiserror::Error;
use zeroize::Zeroizing;

/// First hardened path component, fixed by the protocol.
const DERIVATION_PURPOSE: u32 = 129372;

#[derive(Debug, Error)]
pub enum DerivationError {
    #[error(transparent)]
    Bip32(#[from] bitcoin::bip32::Error),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Dhke(#[from] DhkeError),
}

/// A wallet seed, wiped from memory on drop.
pub struct Seed(Zeroizing<Vec<u8>>);

impl Seed {
    pub fn new(bytes: Vec<u8>) -> Self {
        Seed(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Seed")
    }
}

fn derive_key(seed: &Seed, keyset_id: &KeysetId, counter: u32, leaf: u32) -> Result<SecretKey, DerivationError> {
    let master = Xpriv::new_master(Network::Bitcoin, seed.as_bytes())?;
    let path = [
        ChildNumber::from_hardened_idx(DERIVATION_PURPOSE)?,
        ChildNumber::from_hardened_idx(0)?,
        ChildNumber::from_hardened_idx(keyset_id.as_int31())?,
        ChildNumber::from_hardened_idx(counter)?,
        ChildNumber::from_hardened_idx(leaf)?,
    ];
    let child = master.derive_priv(&*SECP, &path)?;
    Ok(SecretKey::from_slice(&child.private_key.secret_bytes())?)
}

/// The secret for `(seed, keyset, counter)`: the derived key at leaf 0, hex-encoded.
pub fn derive_secret(seed: &Seed, keyset_id: &KeysetId, counter: u32) -> Result<Secret, DerivationError> {
    Ok(Secret::new(derive_key(seed, keyset_id, counter, 0)?.as_hex())?)
}

/// The blinding factor for `(seed, keyset, counter)`: the derived key at leaf 1.
pub fn derive_blinding_factor(
    seed: &Seed,
    keyset_id: &KeysetId,
    counter: u32,
) -> Result<SecretKey, DerivationError> {
    derive_key(seed, keyset_id, counter, 1)
}

/// One fully derived output, recoverable from the seed and counter alone.
pub fn derive_output(
    seed: &Seed,
    amount: Amount,
    keyset_id: &KeysetId,
    counter: u32,
) -> Result<OutputData, DerivationError> {
    let secret = derive_secret(seed, keyset_id, counter)?;
    let blinding_factor = derive_blinding_factor(seed, keyset_id, counter)?;
    Ok(OutputData::from_secret(
        amount,
        keyset_id.clone(),
        secret,
        Some(blinding_factor),
    )?)
}

/// Persistent per-keyset derivation counters.
///
/// Counters must survive across sessions or recovery would re-derive already-spent
/// secrets, so they live behind an explicit store handle rather than in any global
/// state. Implementations decide where the values persist.
pub trait CounterStore {
    /// Reserves `count` consecutive counter values for a keyset and returns the first.
    fn reserve(&mut self, keyset_id: &KeysetId, count: u32) -> u32;

    /// The next counter value that has not been reserved yet.
    fn current(&self, keyset_id: &KeysetId) -> u32;
}

/// In-memory store for tests and single-session use.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: HashMap<KeysetId, u32>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds a keyset's counter, e.g. from a recovery scan.
    pub fn with_counter(mut self, keyset_id: KeysetId, counter: u32) -> Self {
        self.counters.insert(keyset_id, counter);
        self
    }
}

impl CounterStore for MemoryCounterStore {
    fn reserve(&mut self, keyset_id: &KeysetId, count: u32) -> u32 {
        let counter = self.counters.entry(keyset_id.clone()).or_insert(0);
        let first = *counter;
        *counter += count;
        first
    }

    fn current(&self, keyset_id: &KeysetId) -> u32 {
        self.counters.get(keyset_id).copied().unwrap_or(0)
    }
}

/// Derives one output per amount, reserving a contiguous counter range from the store.
pub fn derive_outputs(
    seed: &Seed,
    amounts: &[Amount],
    keyset_id: &KeysetId,
    store: &mut dyn CounterStore,
) -> Result<Vec<OutputData>, DerivationError> {
    let first = store.reserve(keyset_id, amounts.len() as u32);
    amounts
        .iter()
        .enumerate()
        .map(|(offset, &amount)| derive_output(seed, amount, keyset_id, first + offset as u32))
        .collect()
}
