//! MDM Crypto Utilities
//!
//! Device Authority generation, device certificate issuance from CSRs, fingerprints,
//! and client certificate verification.

mod authority;
mod cert;
mod issuer;
mod validity;
mod verify;

pub use authority::*;
pub use cert::*;
pub use issuer::*;
pub use validity::one_year_from;
pub use verify::*;
