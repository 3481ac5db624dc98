//! Derivation path and protocol constants
//!
//! Centralized registry for every path the engine derives.

/// Account-level derivation paths (hardened).
pub mod derivation {
    /// BIP84 single-key witness: m/84'/coin'/0'
    pub const P2WPKH_PURPOSE: u32 = 84;
    /// BIP48 multisig: m/48'/coin'/0'/2'
    pub const P2WSH_PURPOSE: u32 = 48;
    /// BIP48 script type for native witness-script multisig
    pub const P2WSH_SCRIPT_TYPE: u32 = 2;
    pub const ACCOUNT: u32 = 0;

    /// Receive chain index below the account path
    pub const RECEIVE_CHAIN: u32 = 0;
    /// Change chain index below the account path
    pub const CHANGE_CHAIN: u32 = 1;
}

/// Transaction policy constants (sats).
pub mod policy {
    /// Leftover below this is folded into the fee instead of creating change.
    pub const DUST_THRESHOLD: u64 = 546;
    /// Fees above this raise the high-fee warning flag.
    pub const UNREASONABLE_FEE: u64 = 1_000_000;
    /// Default number of consecutive unused addresses scanned per chain.
    pub const DEFAULT_GAP_LIMIT: u32 = 10;
}

/// Config document constants.
pub mod config {
    pub const SCHEMA_VERSION: &str = "0.0.2";
    pub const ENVELOPE_VERSION: u32 = 1;
    pub const AAD: &[u8] = b"beevault-config";
}

/// HWI command names.
pub mod hwi {
    pub const ENUMERATE: &str = "enumerate";
    pub const GET_XPUB: &str = "getxpub";
    pub const SIGN_TX: &str = "signtx";
    pub const PROMPT_PIN: &str = "promptpin";
    pub const SEND_PIN: &str = "sendpin";
}
