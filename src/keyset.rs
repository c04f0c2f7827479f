use crate::amount::Amount;
use crate::hashes::sha256_concat;
use crate::keys::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Hex lengths of legacy keyset ids; both early generations still circulate.
const LEN_LEGACY_SHORT: usize = 12;
const LEN_LEGACY_LONG: usize = 14;
/// Hex length of a current version-00 keyset id: the `00` version byte plus 14 hex
/// characters of truncated hash.
const LEN_V00: usize = 16;
/// Hex length of a future long-form keyset id (33 bytes).
const LEN_LONG: usize = 66;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeysetError {
    #[error("Keyset id must be {LEN_LEGACY_SHORT}, {LEN_LEGACY_LONG}, {LEN_V00} or {LEN_LONG} hex characters, got {0}")]
    InvalidIdLength(usize),
    #[error("Keyset id is not valid hex")]
    InvalidIdHex,
    #[error("Keyset id {claimed} does not match the id derived from the keys ({derived})")]
    IdMismatch { claimed: KeysetId, derived: KeysetId },
    #[error("Keyset holds no key for amount {0}")]
    MissingAmountKey(Amount),
}

/// Identifier of a mint keyset, derived from the keyset's sorted public keys.
///
/// Four wire generations exist: 12 and 14 hex characters (legacy), 16 hex characters
/// (current; a `00` version byte followed by a SHA-256 truncated to 14 hex
/// characters), and 66 hex characters (future long form). All of them parse;
/// comparison and hashing are case-insensitive because ids are normalised to
/// lowercase on the way in. Only the current form is ever derived here, the others
/// are carried as received.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeysetId(String);

impl KeysetId {
    /// Derives the current (version-00) id for a set of per-amount keys:
    /// the compressed key bytes are concatenated in ascending amount order, hashed with
    /// SHA-256, and the id is `"00"` plus the first 14 hex characters of the digest.
    pub fn from_keys(keys: &BTreeMap<Amount, PublicKey>) -> Self {
        // BTreeMap iteration is already sorted by amount.
        let key_bytes: Vec<[u8; 33]> = keys.values().map(|pk| pk.to_bytes()).collect();
        let parts: Vec<&[u8]> = key_bytes.iter().map(|b| b.as_slice()).collect();
        let digest = sha256_concat(&parts);
        KeysetId(format!("00{}", &hex::encode(digest)[..LEN_V00 - 2]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        hex::decode(&self.0).expect("keyset id is validated hex")
    }

    /// Reduces the id to a 31-bit integer for use as a hardened BIP-32 child index:
    /// the big-endian integer value of the id bytes mod (2^31 - 1).
    pub fn as_int31(&self) -> u32 {
        const MODULUS: u64 = (1 << 31) - 1;
        let reduced = self
            .to_bytes()
            .iter()
            .fold(0u64, |acc, byte| (acc * 256 + u64::from(*byte)) % MODULUS);
        reduced as u32
    }
}

impl FromStr for KeysetId {
    type Err = KeysetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !matches!(s.len(), LEN_LEGACY_SHORT | LEN_LEGACY_LONG | LEN_V00 | LEN_LONG) {
            return Err(KeysetError::InvalidIdLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(KeysetError::InvalidIdHex);
        }
        Ok(KeysetId(s.to_ascii_lowercase()))
    }
}

impl Display for KeysetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for KeysetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeysetId({})", self.0)
    }
}

impl Serialize for KeysetId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for KeysetId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        KeysetId::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A mint keyset: one public key per power-of-two amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyset {
    id: KeysetId,
    keys: BTreeMap<Amount, PublicKey>,
}

impl Keyset {
    /// Builds a keyset from its per-amount keys, deriving the id.
    pub fn new(keys: BTreeMap<Amount, PublicKey>) -> Self {
        let id = KeysetId::from_keys(&keys);
        Keyset { id, keys }
    }

    /// Builds a keyset from wire data carrying a claimed id, validating the id against
    /// the keys. Legacy and long-form ids cannot be re-derived and are taken as-is.
    pub fn from_parts(id: KeysetId, keys: BTreeMap<Amount, PublicKey>) -> Result<Self, KeysetError> {
        if id.as_str().len() == LEN_V00 {
            let derived = KeysetId::from_keys(&keys);
            if derived != id {
                return Err(KeysetError::IdMismatch { claimed: id, derived });
            }
        }
        Ok(Keyset { id, keys })
    }

    pub fn id(&self) -> &KeysetId {
        &self.id
    }

    pub fn keys(&self) -> &BTreeMap<Amount, PublicKey> {
        &self.keys
    }

    /// The verification key for one denomination.
    pub fn amount_key(&self, amount: Amount) -> Result<&PublicKey, KeysetError> {
        self.keys.get(&amount).ok_or(KeysetError::MissingAmountKey(amount))
    }
}

/// Builds a keyset of `max_order` random denomination keys (1, 2, 4, ...) together with
/// the mint-side secrets, standing in for a remote mint in tests.
#[cfg(test)]
pub(crate) fn test_keyset(max_order: u32) -> (BTreeMap<Amount, crate::keys::SecretKey>, Keyset) {
    use crate::keys::SecretKey;
    let mut secrets = BTreeMap::new();
    let mut keys = BTreeMap::new();
    for order in 0..max_order {
        let amount = Amount::new(1 << order);
        let sk = SecretKey::random();
        keys.insert(amount, sk.public_key());
        secrets.insert(amount, sk);
    }
    (secrets, Keyset::new(keys))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_derivation_shape() {
        let (_, keyset) = test_keyset(6);
        let id = keyset.id();
        assert_eq!(id.as_str().len(), 16);
        assert!(id.as_str().starts_with("00"));
        // Deterministic over the same keys.
        assert_eq!(&KeysetId::from_keys(keyset.keys()), id);
    }

    #[test]
    fn id_comparison_is_case_insensitive() {
        let lower: KeysetId = "00ffd48b8f5ecf80".parse().unwrap();
        let upper: KeysetId = "00FFD48B8F5ECF80".parse().unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower.as_int31(), upper.as_int31());
        assert_eq!(upper.to_string(), "00ffd48b8f5ecf80");
    }

    #[test]
    fn id_length_validation() {
        assert!("00ffd48b8f5e".parse::<KeysetId>().is_ok()); // legacy, 12
        assert!("00ffd48b8f5ecf".parse::<KeysetId>().is_ok()); // legacy, 14
        assert!("00ffd48b8f5ecf80".parse::<KeysetId>().is_ok()); // current, 16
        let long = format!("01{}", "ab".repeat(32));
        assert!(long.parse::<KeysetId>().is_ok()); // future, 66
        assert!(matches!(
            "00ffd48b8f5ecf8".parse::<KeysetId>(),
            Err(KeysetError::InvalidIdLength(15))
        ));
        assert!(matches!(
            "00ffd48b8f5ecfgg".parse::<KeysetId>(),
            Err(KeysetError::InvalidIdHex)
        ));
    }

    #[test]
    fn int31_reduction() {
        // 0x000000000000000a as an integer is 10, well under the modulus.
        let small: KeysetId = "000000000000000a".parse().unwrap();
        assert_eq!(small.as_int31(), 10);

        let (_, keyset) = test_keyset(4);
        assert!(u64::from(keyset.id().as_int31()) < (1 << 31) - 1);
    }

    #[test]
    fn from_parts_validates_current_ids() {
        let (_, keyset) = test_keyset(4);
        let ok = Keyset::from_parts(keyset.id().clone(), keyset.keys().clone());
        assert!(ok.is_ok());

        let wrong: KeysetId = "00ffd48b8f5ecf80".parse().unwrap();
        let err = Keyset::from_parts(wrong, keyset.keys().clone());
        assert!(matches!(err, Err(KeysetError::IdMismatch { .. })));
    }

    #[test]
    fn amount_key_lookup() {
        let (_, keyset) = test_keyset(3);
        assert!(keyset.amount_key(Amount::new(4)).is_ok());
        assert!(matches!(
            keyset.amount_key(Amount::new(16)),
            Err(KeysetError::MissingAmountKey(_))
        ));
    }
}
