//! Transaction construction: coin selection, fee estimation, PSBT assembly.

mod builder;
pub mod selection;
pub mod size;

pub use builder::{build, BuiltTransaction};
pub use selection::Selection;

use bitcoin::Psbt;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Result, ValidationError};

/// Upper bound on a user-supplied fee rate, sat/vB.
pub const MAX_FEE_RATE: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeSpec {
    /// Absolute fee in sats
    Fixed(u64),
    /// sat/vB
    Rate(f64),
}

impl FeeSpec {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        match *self {
            FeeSpec::Fixed(0) => Err(ValidationError::InvalidFee("fee must be greater than zero".into())),
            FeeSpec::Fixed(_) => Ok(()),
            FeeSpec::Rate(rate) if !rate.is_finite() || rate < 1.0 => {
                Err(ValidationError::InvalidFee(format!("fee rate {rate} is below 1 sat/vB")))
            }
            FeeSpec::Rate(rate) if rate > MAX_FEE_RATE => {
                Err(ValidationError::InvalidFee(format!("fee rate {rate} exceeds {MAX_FEE_RATE} sat/vB")))
            }
            FeeSpec::Rate(_) => Ok(()),
        }
    }
}

pub fn psbt_to_base64(psbt: &Psbt) -> String {
    psbt.to_string()
}

pub fn psbt_from_base64(raw: &str) -> Result<Psbt> {
    Ok(Psbt::from_str(raw.trim()).map_err(|e| ValidationError::InvalidPsbt(e.to_string()))?)
}
