use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

/// An ecash amount, denominated in the mint's base unit.
///
/// Mints only sign power-of-two denominations, so any amount that is minted or swapped
/// has to be decomposed with [`Amount::split`] first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u64);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount overflow")]
    Overflow,
}

impl Amount {
    pub const ZERO: Amount = Amount(0);
    pub const ONE: Amount = Amount(1);

    pub fn new(value: u64) -> Self {
        Amount(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Decomposes the amount into the power-of-two denominations a mint signs,
    /// largest first. `Amount::ZERO` splits into nothing.
    pub fn split(&self) -> Vec<Amount> {
        let mut parts = Vec::new();
        for bit in (0..64).rev() {
            let denom = 1u64 << bit;
            if self.0 & denom != 0 {
                parts.push(Amount(denom));
            }
        }
        parts
    }

    pub fn is_power_of_two(&self) -> bool {
        self.0 != 0 && self.0 & (self.0 - 1) == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Sums an iterator of amounts, failing on u64 overflow instead of wrapping.
    pub fn try_sum<I: IntoIterator<Item = Amount>>(iter: I) -> Result<Amount, AmountError> {
        iter.into_iter()
            .try_fold(Amount::ZERO, |acc, a| acc.checked_add(a).ok_or(AmountError::Overflow))
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Converts a summed per-proof fee (in parts per thousand) into a fee in base units,
/// rounding up. A transaction spending proofs with fee rates 100, 100 and 100 ppk
/// therefore pays 1 unit, not 0.
pub fn fee_from_ppk_sum(ppk_sum: u64) -> Amount {
    Amount(ppk_sum.div_ceil(1000))
}
