use crate::amount::Amount;
use crate::dhke::{blind_message, hash_to_curve, unblind_message, DhkeError};
use crate::dleq::DleqProof;
use crate::keys::{PublicKey, SecretKey};
use crate::keyset::KeysetId;
use crate::secret::{Secret, SecretError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("Blind signature is for keyset {got}, output was built for {expected}")]
    KeysetMismatch { expected: KeysetId, got: KeysetId },
    #[error("Blind signature is for amount {got}, output was built for {expected}")]
    AmountMismatch { expected: Amount, got: Amount },
    #[error("DLEQ proof on the blind signature does not verify")]
    InvalidDleq,
    #[error(transparent)]
    Dhke(#[from] DhkeError),
    #[error(transparent)]
    Secret(#[from] SecretError),
}

/// The blinded output sent to the mint for signing: `{amount, id, B_}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindedMessage {
    pub amount: Amount,
    #[serde(rename = "id")]
    pub keyset_id: KeysetId,
    #[serde(rename = "B_")]
    pub blinded_secret: PublicKey,
}

/// The mint's signature on a blinded output: `{amount, id, C_}`, optionally with a DLEQ
/// proof of correct issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindSignature {
    pub amount: Amount,
    #[serde(rename = "id")]
    pub keyset_id: KeysetId,
    #[serde(rename = "C_")]
    pub c: PublicKey,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dleq: Option<DleqProof>,
}

/// Signatures (and, for hash locks, the preimage) proving a spending condition is met.
///
/// On a [`Proof`] this travels as a JSON string, not as a nested object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
    pub signatures: Vec<String>,
}

impl Witness {
    pub fn from_signatures<I: IntoIterator<Item = String>>(signatures: I) -> Self {
        Witness {
            preimage: None,
            signatures: signatures.into_iter().collect(),
        }
    }

    /// The serialised string form carried on a proof.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("witness serialises to JSON")
    }

    pub fn from_wire(wire: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(wire)
    }
}

mod witness_wire {
    use super::Witness;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(witness: &Option<Witness>, serializer: S) -> Result<S::Ok, S::Error> {
        match witness {
            Some(w) => serializer.serialize_str(&w.to_wire()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Witness>, D::Error> {
        let wire: Option<String> = Option::deserialize(deserializer)?;
        wire.map(|s| Witness::from_wire(&s))
            .transpose()
            .map_err(D::Error::custom)
    }
}

/// A spendable bearer token.
///
/// Invariant: `c` is the mint's signature on `hash_to_curve(secret)` under the keyset's
/// key for `amount`. The witness is attached by the spending-condition engine when the
/// secret carries a lock; the DLEQ proof (with blinding factor) lets any later holder
/// re-verify issuance offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub amount: Amount,
    #[serde(rename = "id")]
    pub keyset_id: KeysetId,
    pub secret: Secret,
    #[serde(rename = "C")]
    pub c: PublicKey,
    #[serde(with = "witness_wire", skip_serializing_if = "Option::is_none", default)]
    pub witness: Option<Witness>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dleq: Option<DleqProof>,
}

impl Proof {
    /// The curve point the token commits to: `Y = hash_to_curve(secret)`.
    pub fn y(&self) -> Result<PublicKey, DhkeError> {
        hash_to_curve(self.secret.as_bytes())
    }
}

/// Ephemeral construction record for one pending output.
///
/// Holds everything needed to turn the mint's blind signature into a [`Proof`]:
/// the blinded message that went out, the secret, the blinding factor, and (for
/// blinded-identity outputs) the ephemeral key the lock was blinded with.
///
/// [`OutputData::into_proof`] consumes the record, so one output can never yield two
/// proofs.
#[derive(Debug, Clone)]
pub struct OutputData {
    blinded_message: BlindedMessage,
    secret: Secret,
    blinding_factor: SecretKey,
    ephemeral_key: Option<SecretKey>,
}

impl OutputData {
    /// A fresh unrestricted output with a random secret and blinding factor.
    pub fn random(amount: Amount, keyset_id: KeysetId) -> Result<Self, DhkeError> {
        Self::from_secret(amount, keyset_id, Secret::generate(), None)
    }

    /// An output for a caller-supplied secret, optionally with a caller-supplied
    /// blinding factor (the deterministic-derivation path supplies both).
    pub fn from_secret(
        amount: Amount,
        keyset_id: KeysetId,
        secret: Secret,
        blinding_factor: Option<SecretKey>,
    ) -> Result<Self, DhkeError> {
        let (blinded_secret, blinding_factor) = blind_message(secret.as_bytes(), blinding_factor)?;
        Ok(OutputData {
            blinded_message: BlindedMessage {
                amount,
                keyset_id,
                blinded_secret,
            },
            secret,
            blinding_factor,
            ephemeral_key: None,
        })
    }

    /// Records the ephemeral identity-blinding key used to build this output's lock.
    pub fn with_ephemeral_key(mut self, ephemeral_key: SecretKey) -> Self {
        self.ephemeral_key = Some(ephemeral_key);
        self
    }

    pub fn blinded_message(&self) -> &BlindedMessage {
        &self.blinded_message
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    pub fn blinding_factor(&self) -> &SecretKey {
        &self.blinding_factor
    }

    pub fn ephemeral_key(&self) -> Option<&SecretKey> {
        self.ephemeral_key.as_ref()
    }

    /// Consumes the output and the mint's blind signature into a spendable proof.
    ///
    /// Checks that the signature matches this output's amount and keyset, verifies the
    /// DLEQ proof when the mint attached one (a failing proof rejects the token), then
    /// unblinds. The blinding factor is folded into the carried DLEQ proof so the
    /// finished token stays independently verifiable.
    pub fn into_proof(self, signature: &BlindSignature, mint_pubkey: &PublicKey) -> Result<Proof, ProofError> {
        if signature.keyset_id != self.blinded_message.keyset_id {
            return Err(ProofError::KeysetMismatch {
                expected: self.blinded_message.keyset_id,
                got: signature.keyset_id.clone(),
            });
        }
        if signature.amount != self.blinded_message.amount {
            return Err(ProofError::AmountMismatch {
                expected: self.blinded_message.amount,
                got: signature.amount,
            });
        }
        if let Some(dleq) = &signature.dleq {
            if !dleq.verify_blinded(&self.blinded_message.blinded_secret, &signature.c, mint_pubkey) {
                return Err(ProofError::InvalidDleq);
            }
        }
        let c = unblind_message(&signature.c, &self.blinding_factor, mint_pubkey)?;
        let dleq = signature
            .dleq
            .clone()
            .map(|proof| proof.with_blinding_factor(self.blinding_factor.clone()));
        Ok(Proof {
            amount: self.blinded_message.amount,
            keyset_id: self.blinded_message.keyset_id,
            secret: self.secret,
            c,
            witness: None,
            dleq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhke::{sign_message, verify_message};
    use crate::keyset::test_keyset;

    #[test]
    fn wire_field_names() {
        let (_, keyset) = test_keyset(1);
        let output = OutputData::random(Amount::new(1), keyset.id().clone()).unwrap();
        let json = serde_json::to_string(output.blinded_message()).unwrap();
        assert!(json.contains("\"B_\""));
        assert!(json.contains("\"id\""));
        assert!(json.contains("\"amount\""));
    }

    #[test]
    fn issue_and_unblind_yields_valid_proof() {
        let (secrets, keyset) = test_keyset(2);
        let amount = Amount::new(2);
        let mint_key = &secrets[&amount];

        let output = OutputData::random(amount, keyset.id().clone()).unwrap();
        let c_blinded = sign_message(mint_key, &output.blinded_message().blinded_secret).unwrap();
        let signature = BlindSignature {
            amount,
            keyset_id: keyset.id().clone(),
            c: c_blinded,
            dleq: Some(
                DleqProof::prove(mint_key, &output.blinded_message().blinded_secret, &c_blinded).unwrap(),
            ),
        };

        let secret = output.secret().clone();
        let proof = output
            .into_proof(&signature, keyset.amount_key(amount).unwrap())
            .unwrap();
        assert_eq!(proof.amount, amount);
        assert!(verify_message(mint_key, &proof.c, secret.as_bytes()).unwrap());
        // The attached DLEQ now carries r and verifies against the unblinded signature.
        let dleq = proof.dleq.as_ref().unwrap();
        assert!(dleq
            .verify_unblinded(keyset.amount_key(amount).unwrap(), secret.as_bytes(), &proof.c)
            .unwrap());
    }

    #[test]
    fn mismatched_signature_is_rejected() {
        let (secrets, keyset) = test_keyset(2);
        let amount = Amount::new(1);
        let mint_key = &secrets[&amount];

        let output = OutputData::random(amount, keyset.id().clone()).unwrap();
        let c_blinded = sign_message(mint_key, &output.blinded_message().blinded_secret).unwrap();
        let wrong_amount = BlindSignature {
            amount: Amount::new(2),
            keyset_id: keyset.id().clone(),
            c: c_blinded,
            dleq: None,
        };
        let result = output.into_proof(&wrong_amount, keyset.amount_key(amount).unwrap());
        assert!(matches!(result, Err(ProofError::AmountMismatch { .. })));
    }

    #[test]
    fn invalid_dleq_rejects_the_token() {
        let (secrets, keyset) = test_keyset(1);
        let amount = Amount::new(1);
        let mint_key = &secrets[&amount];

        let output = OutputData::random(amount, keyset.id().clone()).unwrap();
        let c_blinded = sign_message(mint_key, &output.blinded_message().blinded_secret).unwrap();
        // A proof generated for a different output does not transfer.
        let other = OutputData::random(amount, keyset.id().clone()).unwrap();
        let other_sig = sign_message(mint_key, &other.blinded_message().blinded_secret).unwrap();
        let foreign_dleq =
            DleqProof::prove(mint_key, &other.blinded_message().blinded_secret, &other_sig).unwrap();

        let signature = BlindSignature {
            amount,
            keyset_id: keyset.id().clone(),
            c: c_blinded,
            dleq: Some(foreign_dleq),
        };
        let result = output.into_proof(&signature, keyset.amount_key(amount).unwrap());
        assert!(matches!(result, Err(ProofError::InvalidDleq)));
    }

    #[test]
    fn witness_travels_as_a_string() {
        let (secrets, keyset) = test_keyset(1);
        let amount = Amount::new(1);
        let mint_key = &secrets[&amount];
        let output = OutputData::random(amount, keyset.id().clone()).unwrap();
        let c_blinded = sign_message(mint_key, &output.blinded_message().blinded_secret).unwrap();
        let signature = BlindSignature {
            amount,
            keyset_id: keyset.id().clone(),
            c: c_blinded,
            dleq: None,
        };
        let mut proof = output.into_proof(&signature, keyset.amount_key(amount).unwrap()).unwrap();
        proof.witness = Some(Witness::from_signatures(vec!["deadbeef".to_string()]));

        let json = serde_json::to_string(&proof).unwrap();
        // The witness field is a JSON-escaped string, not a nested object.
        assert!(json.contains("\"witness\":\"{"));
        let back: Proof = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proof);
    }
}
