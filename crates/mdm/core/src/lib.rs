//! Windows MDM wire types.
//!
//! SOAP envelopes for discovery, enrollment policy and WSTEP enrollment, the WAP
//! provisioning document, and the SyncML messages exchanged after enrollment.

pub mod discovery;
mod enrollment;
mod fault;
pub mod policy;
mod provisioning;
mod request;
pub mod soap;
pub mod syncml;
pub mod wstep;
pub mod xml;

pub use enrollment::*;
pub use fault::*;
pub use provisioning::*;
pub use request::*;
