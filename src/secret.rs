use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret is not a well-formed structured secret: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Secret is empty")]
    Empty,
}

/// The message a token commits to.
///
/// The mint signs `hash_to_curve(secret bytes)`, so this wrapper stores the exact UTF-8
/// string that went over the wire and never re-encodes it: a secret that parses as a
/// [`StructuredSecret`] is still hashed from the original bytes, byte for byte.
///
/// A plain bearer secret is an opaque random string; a restricted one is the JSON
/// encoding `["KIND",{"nonce":…,"data":…,"tags":…}]`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new<S: Into<String>>(secret: S) -> Result<Self, SecretError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(SecretError::Empty);
        }
        Ok(Secret(secret))
    }

    /// Generates an unrestricted bearer secret: 32 random bytes as lowercase hex.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Secret(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The exact bytes that feed `hash_to_curve`.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Parses the secret as a structured spending-condition secret.
    pub fn as_structured(&self) -> Result<StructuredSecret, SecretError> {
        Ok(serde_json::from_str(&self.0)?)
    }

    /// Whether the secret carries a spending condition, as opposed to being an opaque
    /// bearer string.
    pub fn is_structured(&self) -> bool {
        self.as_structured().is_ok()
    }
}

impl Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Secret {
    type Err = SecretError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Secret::new(s)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret({})", self.0)
    }
}

/// The spending-condition kind a structured secret declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    /// Spending requires signatures from specific keys.
    P2PK,
    /// Spending additionally requires the preimage of a SHA-256 hash lock.
    HTLC,
}

/// The well-known structured secret `["KIND",{"nonce":…,"data":…,"tags":…}]`.
///
/// Field order inside the object is fixed by the protocol; serialisation uses compact
/// JSON so a freshly built secret is already in canonical form. Secrets received from
/// elsewhere are never re-serialised (see [`Secret`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredSecret {
    pub kind: Kind,
    pub nonce: String,
    /// Kind-dependent payload: the primary lock key (P2PK) or the hash lock (HTLC).
    pub data: String,
    pub tags: Option<Vec<Vec<String>>>,
}

#[derive(Serialize, Deserialize)]
struct SecretData {
    nonce: String,
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<Vec<String>>>,
}

#[derive(Serialize, Deserialize)]
struct WireSecret(Kind, SecretData);

impl StructuredSecret {
    /// Builds a structured secret with a fresh random nonce.
    pub fn new(kind: Kind, data: String, tags: Option<Vec<Vec<String>>>) -> Self {
        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);
        StructuredSecret {
            kind,
            nonce: hex::encode(nonce),
            data,
            tags,
        }
    }

    /// Serialises into the wire [`Secret`]. This is the only place a structured secret
    /// is ever encoded; the resulting string is carried verbatim from here on.
    pub fn to_secret(&self) -> Secret {
        let wire = WireSecret(
            self.kind,
            SecretData {
                nonce: self.nonce.clone(),
                data: self.data.clone(),
                tags: self.tags.clone(),
            },
        );
        Secret(serde_json::to_string(&wire).expect("structured secret serialises to JSON"))
    }
}

impl Serialize for StructuredSecret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = WireSecret(
            self.kind,
            SecretData {
                nonce: self.nonce.clone(),
                data: self.data.clone(),
                tags: self.tags.clone(),
            },
        );
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StructuredSecret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let WireSecret(kind, data) = WireSecret::deserialize(deserializer)?;
        Ok(StructuredSecret {
            kind,
            nonce: data.nonce,
            data: data.data,
            tags: data.tags,
        })
    }
}
