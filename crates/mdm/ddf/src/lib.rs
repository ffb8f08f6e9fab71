//! OMA-DM configuration schema compiled from vendor DDF documents.
//!
//! [`compile`] turns `MgmtTree` XML into a [`Schema`]; the runtime loads the
//! schema JSON with [`Schema::load`] and validates settings against it.

pub mod codegen;
mod ddf;
mod schema;

pub use ddf::*;
pub use schema::*;
