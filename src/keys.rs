use bitcoin::secp256k1;
use bitcoin::secp256k1::ecdh::shared_secret_point;
use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::{All, Keypair, Message, Scalar, Secp256k1};
use hex::FromHexError;
use rand::thread_rng;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

pub(crate) static SECP: LazyLock<Secp256k1<All>> = LazyLock::new(Secp256k1::new);

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Could not deserialize from hex: {0}")]
    HexDeserializationError(#[from] FromHexError),
    #[error("Invalid string length")]
    InvalidStringLength,
    #[error("Invalid key or point: {0}")]
    InvalidKey(#[from] secp256k1::Error),
}

/// A compressed secp256k1 public key.
///
/// This is the single point type of the protocol: mint per-amount keys, blinded
/// messages `B_`, blind and unblinded signatures `C_`/`C`, and lock keys in spending
/// conditions are all values of this type. The wire form is the 33-byte compressed
/// encoding as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(secp256k1::PublicKey);

impl PublicKey {
    /// Tries to deserialize a 66-character hex string into a `PublicKey`. The string must
    /// represent a valid compressed point on the curve.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        if hex.len() != 66 {
            return Err(KeyError::InvalidStringLength);
        }
        let mut compressed = [0u8; 33];
        hex::decode_to_slice(hex.as_bytes(), &mut compressed)?;
        Ok(Self(secp256k1::PublicKey::from_slice(&compressed)?))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        Ok(Self(secp256k1::PublicKey::from_slice(bytes)?))
    }

    /// The 33-byte compressed encoding.
    pub fn to_bytes(&self) -> [u8; 33] {
        self.0.serialize()
    }

    /// The 65-byte uncompressed encoding. The protocol only uses this form inside the
    /// DLEQ challenge hash.
    pub fn to_uncompressed_bytes(&self) -> [u8; 65] {
        self.0.serialize_uncompressed()
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Point addition: `self + other`.
    pub fn combine(&self, other: &PublicKey) -> Result<PublicKey, KeyError> {
        Ok(Self(self.0.combine(&other.0)?))
    }

    /// Scalar multiplication: `scalar * self`.
    pub fn mul_tweak(&self, scalar: &SecretKey) -> Result<PublicKey, KeyError> {
        Ok(Self(self.0.mul_tweak(&SECP, &scalar.to_scalar())?))
    }

    /// Point negation: `-self`.
    pub fn negate(&self) -> PublicKey {
        Self(self.0.negate(&SECP))
    }

    /// Verifies a BIP-340 Schnorr signature over a 32-byte message digest against the
    /// x-only part of this key. Returns `false` for any invalid signature; it never errors.
    pub fn verify_schnorr(&self, msg_digest: [u8; 32], signature: &Signature) -> bool {
        let (x_only, _parity) = self.0.x_only_public_key();
        let message = Message::from_digest(msg_digest);
        SECP.verify_schnorr(signature, &message, &x_only).is_ok()
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex_str = String::deserialize(deserializer)?;
        PublicKey::from_hex(&hex_str).map_err(serde::de::Error::custom)
    }
}

/// A secp256k1 secret scalar.
///
/// Used for blinding factors, lock-key secrets, ephemeral identity-blinding keys and
/// (in tests) mint signing keys. Zero and out-of-range values are unrepresentable.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(secp256k1::SecretKey);

impl SecretKey {
    /// Generates a fresh random secret from the thread's CSPRNG.
    pub fn random() -> Self {
        Self(secp256k1::SecretKey::new(&mut thread_rng()))
    }

    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        if hex.len() != 64 {
            return Err(KeyError::InvalidStringLength);
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex.as_bytes(), &mut bytes)?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        Ok(Self(secp256k1::SecretKey::from_slice(bytes)?))
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.0.secret_bytes()
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.secret_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key(&SECP))
    }

    /// Scalar addition mod the curve order: `self + other`. Fails only when the sum is zero.
    pub fn add_tweak(&self, other: &SecretKey) -> Result<SecretKey, KeyError> {
        Ok(Self(self.0.add_tweak(&other.to_scalar())?))
    }

    /// Scalar multiplication mod the curve order: `self * other`.
    pub fn mul_tweak(&self, other: &SecretKey) -> Result<SecretKey, KeyError> {
        Ok(Self(self.0.mul_tweak(&other.to_scalar())?))
    }

    /// Scalar negation mod the curve order.
    pub fn negate(&self) -> SecretKey {
        Self(self.0.negate())
    }

    /// Produces a BIP-340 Schnorr signature over a 32-byte message digest.
    pub fn sign_schnorr(&self, msg_digest: [u8; 32]) -> Signature {
        let keypair = Keypair::from_secret_key(&SECP, &self.0);
        let message = Message::from_digest(msg_digest);
        SECP.sign_schnorr(&message, &keypair)
    }

    /// The x-coordinate of the ECDH shared point `self * peer`. Symmetric:
    /// `a.shared_secret_x(B) == b.shared_secret_x(A)` for keypairs `(a, A)` and `(b, B)`,
    /// and invariant under negation of either key.
    pub fn shared_secret_x(&self, peer: &PublicKey) -> [u8; 32] {
        let point = shared_secret_point(&peer.0, &self.0);
        let mut x = [0u8; 32];
        x.copy_from_slice(&point[..32]);
        x
    }

    pub(crate) fn to_scalar(&self) -> Scalar {
        // Secret keys are nonzero scalars below the curve order by construction.
        Scalar::from_be_bytes(self.secret_bytes()).expect("secret key is a valid scalar")
    }
}

impl Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey")
    }
}

impl Serialize for SecretKey {
    /// Serializes the secret key as a hex-encoded string.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex_str = String::deserialize(deserializer)?;
        SecretKey::from_hex(&hex_str).map_err(serde::de::Error::custom)
    }
}
