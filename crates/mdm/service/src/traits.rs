//! Service traits.

use mdm_core::{Fault, Request};

use crate::{AuthorityError, AuthoritySummary, IssueOutcome, ManagementError};

/// Enrollment endpoints: discovery, enrollment policy and WSTEP.
///
/// Each takes the raw SOAP request and returns the response envelope, or a fault to send back.
#[trait_variant::make(Send)]
pub trait Enrollment: Send + Sync {
    /// Handle a `Discover` request.
    async fn discover(&self, body: &str) -> Result<String, Fault>;

    /// Handle a `GetPolicies` request.
    async fn get_policies(&self, body: &str) -> Result<String, Fault>;

    /// Handle a WSTEP `RequestSecurityToken`.
    async fn enroll(&self, body: &str) -> Result<String, Fault>;
}

/// OMA-DM check-in service trait.
#[trait_variant::make(Send)]
pub trait Management: Send + Sync {
    /// Handle one SyncML message and return the reply.
    async fn manage(&self, req: &Request, body: &str) -> Result<String, ManagementError>;
}

/// Operator access to the Device Authority.
#[trait_variant::make(Send)]
pub trait AuthorityAdmin: Send + Sync {
    async fn rotate(&self) -> Result<IssueOutcome, AuthorityError>;

    async fn active_authority(&self) -> Result<Option<AuthoritySummary>, AuthorityError>;

    async fn authority_history(&self) -> Result<Vec<AuthoritySummary>, AuthorityError>;
}
