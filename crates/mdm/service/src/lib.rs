//! Windows MDM service layer.
//!
//! Enrollment (discovery, policy, WSTEP), OMA-DM check-ins, and the rotating Device
//! Authority that signs device certificates.

mod auth;
mod authority;
mod config;
mod enrollment;
mod gateway;
mod management;
mod mdm;
mod traits;

pub use auth::*;
pub use authority::*;
pub use config::*;
pub use enrollment::*;
pub use gateway::*;
pub use management::*;
pub use mdm::*;
pub use traits::*;
