//! Spending conditions: policies a structured secret locks a token to, and the
//! witness machinery that satisfies them.
//!
//! A policy names required signer keys with a threshold, optionally a hash lock, and
//! optionally a locktime after which a refund key set (or nobody at all) takes over.
//! Witnesses are Schnorr signatures over a per-input message or, in aggregate mode,
//! over the whole transaction.

pub mod blinded;
pub mod sig_all;
pub mod witness;

use crate::helpers::Timestamp;
use crate::keys::{KeyError, PublicKey};
use crate::secret::{Kind, Secret, SecretError, StructuredSecret};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

const TAG_PUBKEYS: &str = "pubkeys";
const TAG_LOCKTIME: &str = "locktime";
const TAG_REFUND: &str = "refund";
const TAG_N_SIGS: &str = "n_sigs";
const TAG_N_SIGS_REFUND: &str = "n_sigs_refund";
const TAG_SIGFLAG: &str = "sigflag";
/// Ephemeral public key carried by tokens whose signer keys are identity-blinded.
const TAG_EPHEMERAL_KEY: &str = "e_pub";

#[derive(Debug, Error)]
pub enum ConditionsError {
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("Tag '{tag}' carries value '{value}' which does not parse")]
    InvalidTagValue { tag: String, value: String },
    #[error("Unknown signature flag '{0}'")]
    UnknownSigFlag(String),
    #[error("Hash lock must be 64 lowercase hex characters")]
    InvalidHashLock,
}

/// Which message the witness signatures commit to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigFlag {
    /// Each input is signed on its own over its secret bytes.
    #[default]
    #[serde(rename = "SIG_INPUTS")]
    SigInputs,
    /// One signature set covers every input and output of the transaction.
    #[serde(rename = "SIG_ALL")]
    SigAll,
}

impl SigFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigFlag::SigInputs => "SIG_INPUTS",
            SigFlag::SigAll => "SIG_ALL",
        }
    }
}

impl Display for SigFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SigFlag {
    type Err = ConditionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SIG_INPUTS" => Ok(SigFlag::SigInputs),
            "SIG_ALL" => Ok(SigFlag::SigAll),
            other => Err(ConditionsError::UnknownSigFlag(other.to_string())),
        }
    }
}

/// The tag-borne part of a spending policy, shared by both secret kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    /// Required signer keys beyond the primary slot (all signer keys, for hash locks).
    pub pubkeys: Vec<PublicKey>,
    /// UNIX time after which the refund policy replaces the primary one.
    pub locktime: Option<Timestamp>,
    /// Keys allowed to spend after the locktime.
    pub refund_keys: Vec<PublicKey>,
    /// Primary signature threshold; absent means 1.
    pub num_sigs: Option<u64>,
    /// Refund signature threshold; absent means 1.
    pub num_sigs_refund: Option<u64>,
    pub sig_flag: SigFlag,
    /// Present when the signer keys above are identity-blinded (see [`blinded`]).
    pub ephemeral_key: Option<PublicKey>,
}

impl Conditions {
    /// Encodes the policy into wire tags. Emission order is fixed so that building the
    /// same policy twice yields byte-identical secrets up to the nonce.
    pub(crate) fn to_tags(&self) -> Vec<Vec<String>> {
        let mut tags = Vec::new();
        if !self.pubkeys.is_empty() {
            let mut tag = vec![TAG_PUBKEYS.to_string()];
            tag.extend(self.pubkeys.iter().map(|pk| pk.as_hex()));
            tags.push(tag);
        }
        if let Some(locktime) = self.locktime {
            tags.push(vec![TAG_LOCKTIME.to_string(), locktime.as_secs().to_string()]);
        }
        if !self.refund_keys.is_empty() {
            let mut tag = vec![TAG_REFUND.to_string()];
            tag.extend(self.refund_keys.iter().map(|pk| pk.as_hex()));
            tags.push(tag);
        }
        if let Some(n) = self.num_sigs {
            tags.push(vec![TAG_N_SIGS.to_string(), n.to_string()]);
        }
        if let Some(n) = self.num_sigs_refund {
            tags.push(vec![TAG_N_SIGS_REFUND.to_string(), n.to_string()]);
        }
        tags.push(vec![TAG_SIGFLAG.to_string(), self.sig_flag.to_string()]);
        if let Some(ephemeral) = &self.ephemeral_key {
            tags.push(vec![TAG_EPHEMERAL_KEY.to_string(), ephemeral.as_hex()]);
        }
        tags
    }

    /// Decodes wire tags. Unknown tag names are ignored for forward compatibility;
    /// known tags with malformed values are an error.
    pub(crate) fn from_tags(tags: &[Vec<String>]) -> Result<Self, ConditionsError> {
        fn number(tag: &str, values: &[String]) -> Result<u64, ConditionsError> {
            let value = values.first().ok_or_else(|| ConditionsError::InvalidTagValue {
                tag: tag.to_string(),
                value: String::new(),
            })?;
            value.parse().map_err(|_| ConditionsError::InvalidTagValue {
                tag: tag.to_string(),
                value: value.clone(),
            })
        }

        let mut conditions = Conditions::default();
        for tag in tags {
            let Some((name, values)) = tag.split_first() else {
                continue;
            };
            match name.as_str() {
                TAG_PUBKEYS => {
                    for value in values {
                        conditions.pubkeys.push(value.parse()?);
                    }
                }
                TAG_LOCKTIME => conditions.locktime = Some(Timestamp::new(number(name, values)?)),
                TAG_REFUND => {
                    for value in values {
                        conditions.refund_keys.push(value.parse()?);
                    }
                }
                TAG_N_SIGS => conditions.num_sigs = Some(number(name, values)?),
                TAG_N_SIGS_REFUND => conditions.num_sigs_refund = Some(number(name, values)?),
                TAG_SIGFLAG => {
                    let value = values.first().ok_or_else(|| ConditionsError::InvalidTagValue {
                        tag: name.clone(),
                        value: String::new(),
                    })?;
                    conditions.sig_flag = value.parse()?;
                }
                TAG_EPHEMERAL_KEY => {
                    let value = values.first().ok_or_else(|| ConditionsError::InvalidTagValue {
                        tag: name.clone(),
                        value: String::new(),
                    })?;
                    conditions.ephemeral_key = Some(value.parse()?);
                }
                _ => {}
            }
        }
        Ok(conditions)
    }
}

/// A fully decoded spending policy, one variant per secret kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpendingConditions {
    /// Signatures from specific keys. The primary key lives in the secret's data slot.
    P2pk {
        pubkey: PublicKey,
        conditions: Conditions,
    },
    /// A SHA-256 hash lock plus signatures. All signer keys live in the tags; the data
    /// slot holds the hash, hex-encoded.
    Htlc {
        hash_lock: String,
        conditions: Conditions,
    },
}

impl SpendingConditions {
    pub fn kind(&self) -> Kind {
        match self {
            SpendingConditions::P2pk { .. } => Kind::P2PK,
            SpendingConditions::Htlc { .. } => Kind::HTLC,
        }
    }

    pub fn conditions(&self) -> &Conditions {
        match self {
            SpendingConditions::P2pk { conditions, .. } => conditions,
            SpendingConditions::Htlc { conditions, .. } => conditions,
        }
    }

    /// Decodes the policy a structured secret carries.
    pub fn from_secret(secret: &Secret) -> Result<Self, ConditionsError> {
        let structured = secret.as_structured()?;
        Self::from_structured(&structured)
    }

    pub fn from_structured(structured: &StructuredSecret) -> Result<Self, ConditionsError> {
        let conditions = Conditions::from_tags(structured.tags.as_deref().unwrap_or(&[]))?;
        match structured.kind {
            Kind::P2PK => Ok(SpendingConditions::P2pk {
                pubkey: structured.data.parse()?,
                conditions,
            }),
            Kind::HTLC => {
                if structured.data.len() != 64 || !structured.data.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(ConditionsError::InvalidHashLock);
                }
                Ok(SpendingConditions::Htlc {
                    hash_lock: structured.data.to_ascii_lowercase(),
                    conditions,
                })
            }
        }
    }

    /// Encodes the policy into a fresh wire secret (new random nonce each call).
    pub fn to_secret(&self) -> Secret {
        let (data, conditions) = match self {
            SpendingConditions::P2pk { pubkey, conditions } => (pubkey.as_hex(), conditions),
            SpendingConditions::Htlc { hash_lock, conditions } => (hash_lock.clone(), conditions),
        };
        StructuredSecret::new(self.kind(), data, Some(conditions.to_tags())).to_secret()
    }

    /// Resolves who may sign at time `now`, and how many of them must.
    ///
    /// Before the locktime (or without one) the primary key set applies. At or after
    /// the locktime the refund keys take over; if none were set the token is freely
    /// spendable, expressed as an empty key set with threshold zero.
    pub fn signatories(&self, now: Timestamp) -> (Vec<PublicKey>, u64) {
        let conditions = self.conditions();
        if let Some(locktime) = conditions.locktime {
            if now.as_secs() >= locktime.as_secs() {
                if conditions.refund_keys.is_empty() {
                    return (Vec::new(), 0);
                }
                return (
                    conditions.refund_keys.clone(),
                    conditions.num_sigs_refund.unwrap_or(1),
                );
            }
        }
        let mut keys: Vec<PublicKey> = Vec::new();
        if let SpendingConditions::P2pk { pubkey, .. } = self {
            keys.push(*pubkey);
        }
        for key in &conditions.pubkeys {
            if !keys.contains(key) {
                keys.push(*key);
            }
        }
        (keys, conditions.num_sigs.unwrap_or(1))
    }
}

/// Builds a key-locked policy.
#[derive(Debug, Clone)]
pub struct P2pkBuilder {
    pubkey: PublicKey,
    conditions: Conditions,
}

impl P2pkBuilder {
    pub fn new(pubkey: PublicKey) -> Self {
        P2pkBuilder {
            pubkey,
            conditions: Conditions::default(),
        }
    }

    /// Adds required signer keys beyond the primary one.
    pub fn additional_pubkeys<I: IntoIterator<Item = PublicKey>>(mut self, pubkeys: I) -> Self {
        self.conditions.pubkeys.extend(pubkeys);
        self
    }

    pub fn locktime(mut self, locktime: Timestamp) -> Self {
        self.conditions.locktime = Some(locktime);
        self
    }

    pub fn refund_keys<I: IntoIterator<Item = PublicKey>>(mut self, pubkeys: I) -> Self {
        self.conditions.refund_keys.extend(pubkeys);
        self
    }

    pub fn num_sigs(mut self, n: u64) -> Self {
        self.conditions.num_sigs = Some(n);
        self
    }

    pub fn num_sigs_refund(mut self, n: u64) -> Self {
        self.conditions.num_sigs_refund = Some(n);
        self
    }

    /// Switches the policy to aggregate signing over the whole transaction.
    pub fn sig_all(mut self) -> Self {
        self.conditions.sig_flag = SigFlag::SigAll;
        self
    }

    pub fn build(self) -> SpendingConditions {
        SpendingConditions::P2pk {
            pubkey: self.pubkey,
            conditions: self.conditions,
        }
    }
}

/// Builds a hash-locked policy. The signer set is optional; a bare hash lock is
/// spendable by anyone holding the preimage.
#[derive(Debug, Clone)]
pub struct HtlcBuilder {
    hash_lock: String,
    conditions: Conditions,
}

impl HtlcBuilder {
    /// Locks to an already-computed SHA-256 hash.
    pub fn new(hash_lock: [u8; 32]) -> Self {
        HtlcBuilder {
            hash_lock: hex::encode(hash_lock),
            conditions: Conditions::default(),
        }
    }

    /// Locks to the SHA-256 of the given preimage bytes.
    pub fn from_preimage(preimage: &[u8]) -> Self {
        Self::new(crate::hashes::sha256(preimage))
    }

    /// Keys required to sign alongside the preimage.
    pub fn pubkeys<I: IntoIterator<Item = PublicKey>>(mut self, pubkeys: I) -> Self {
        self.conditions.pubkeys.extend(pubkeys);
        self
    }

    pub fn locktime(mut self, locktime: Timestamp) -> Self {
        self.conditions.locktime = Some(locktime);
        self
    }

    pub fn refund_keys<I: IntoIterator<Item = PublicKey>>(mut self, pubkeys: I) -> Self {
        self.conditions.refund_keys.extend(pubkeys);
        self
    }

    pub fn num_sigs(mut self, n: u64) -> Self {
        self.conditions.num_sigs = Some(n);
        self
    }

    pub fn num_sigs_refund(mut self, n: u64) -> Self {
        self.conditions.num_sigs_refund = Some(n);
        self
    }

    pub fn sig_all(mut self) -> Self {
        self.conditions.sig_flag = SigFlag::SigAll;
        self
    }

    pub fn build(self) -> SpendingConditions {
        SpendingConditions::Htlc {
            hash_lock: self.hash_lock,
            conditions: self.conditions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SecretKey;

    fn key() -> PublicKey {
        SecretKey::random().public_key()
    }

    #[test]
    fn p2pk_roundtrip_through_secret() {
        let primary = key();
        let extra = key();
        let refund = key();
        let built = P2pkBuilder::new(primary)
            .additional_pubkeys([extra])
            .locktime(Timestamp::new(1_700_000_000))
            .refund_keys([refund])
            .num_sigs(2)
            .build();
        let secret = built.to_secret();
        let parsed = SpendingConditions::from_secret(&secret).unwrap();
        assert_eq!(parsed, built);
        assert_eq!(parsed.conditions().sig_flag, SigFlag::SigInputs);
    }

    #[test]
    fn htlc_roundtrip_through_secret() {
        let built = HtlcBuilder::from_preimage(b"payment preimage")
            .pubkeys([key(), key()])
            .num_sigs(2)
            .sig_all()
            .build();
        let secret = built.to_secret();
        let parsed = SpendingConditions::from_secret(&secret).unwrap();
        assert_eq!(parsed, built);
        assert_eq!(parsed.conditions().sig_flag, SigFlag::SigAll);
    }

    #[test]
    fn signatories_before_locktime() {
        let primary = key();
        let extra = key();
        let refund = key();
        let conditions = P2pkBuilder::new(primary)
            .additional_pubkeys([extra])
            .locktime(Timestamp::new(2_000_000_000))
            .refund_keys([refund])
            .num_sigs(2)
            .build();
        let (keys, threshold) = conditions.signatories(Timestamp::new(1_999_999_999));
        assert_eq!(keys, vec![primary, extra]);
        assert_eq!(threshold, 2);
    }

    #[test]
    fn signatories_after_locktime_switch_to_refund() {
        let primary = key();
        let refund = key();
        let conditions = P2pkBuilder::new(primary)
            .locktime(Timestamp::new(2_000_000_000))
            .refund_keys([refund])
            .num_sigs(2)
            .build();
        // At the boundary the refund policy already applies, with its own default
        // threshold of one.
        let (keys, threshold) = conditions.signatories(Timestamp::new(2_000_000_000));
        assert_eq!(keys, vec![refund]);
        assert_eq!(threshold, 1);
    }

    #[test]
    fn expired_lock_without_refund_is_freely_spendable() {
        let conditions = P2pkBuilder::new(key())
            .locktime(Timestamp::new(1_000_000_000))
            .build();
        let (keys, threshold) = conditions.signatories(Timestamp::new(1_000_000_001));
        assert!(keys.is_empty());
        assert_eq!(threshold, 0);
    }

    #[test]
    fn duplicate_primary_key_is_not_double_counted() {
        let primary = key();
        let conditions = P2pkBuilder::new(primary).additional_pubkeys([primary]).build();
        let (keys, _) = conditions.signatories(Timestamp::now());
        assert_eq!(keys, vec![primary]);
    }

    #[test]
    fn unknown_tags_are_ignored() {
        let secret = StructuredSecret::new(
            Kind::P2PK,
            key().as_hex(),
            Some(vec![
                vec!["n_sigs".to_string(), "2".to_string()],
                vec!["some_future_tag".to_string(), "whatever".to_string()],
            ]),
        )
        .to_secret();
        let parsed = SpendingConditions::from_secret(&secret).unwrap();
        assert_eq!(parsed.conditions().num_sigs, Some(2));
    }

    #[test]
    fn malformed_tag_values_are_rejected() {
        let secret = StructuredSecret::new(
            Kind::P2PK,
            key().as_hex(),
            Some(vec![vec!["locktime".to_string(), "not a number".to_string()]]),
        )
        .to_secret();
        assert!(matches!(
            SpendingConditions::from_secret(&secret),
            Err(ConditionsError::InvalidTagValue { .. })
        ));
    }

    #[test]
    fn bad_hash_lock_is_rejected() {
        let secret = StructuredSecret::new(Kind::HTLC, "deadbeef".to_string(), None).to_secret();
        assert!(matches!(
            SpendingConditions::from_secret(&secret),
            Err(ConditionsError::InvalidHashLock)
        ));
    }
}
