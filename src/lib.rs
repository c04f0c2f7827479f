pub mod amount;
pub mod conditions;
pub mod derivation;
pub mod dhke;
pub mod dleq;
pub mod hashes;
pub mod helpers;
pub mod keys;
pub mod keyset;
pub mod proof;
pub mod secret;
pub mod selection;

pub use amount::Amount;
pub use keys::{PublicKey, SecretKey};
pub use keyset::{Keyset, KeysetId};
pub use proof::{BlindSignature, BlindedMessage, OutputData, Proof, Witness};
pub use secret::Secret;
