//! Windows MDM service implementation.

use std::sync::Arc;

use mdm_ddf::Schema;
use mdm_storage::ObjectStore;

use crate::{
    AuthorityAdmin, AuthorityError, AuthorityManager, AuthoritySummary, Authenticator, DomainBinding,
    EnrollmentConfig, HttpDomainBinding, IssueOutcome, PolicySource, StaticPolicySource,
};

/// Enrollment, management and authority administration backed by one [`AuthorityManager`].
pub struct WindowsMdm<S, G = HttpDomainBinding> {
    pub(crate) authority: Arc<AuthorityManager<S, G>>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) policies: Arc<dyn PolicySource>,
    pub(crate) schema: Arc<Schema>,
    pub(crate) config: Arc<EnrollmentConfig>,
}

impl<S, G> Clone for WindowsMdm<S, G> {
    fn clone(&self) -> Self {
        Self {
            authority: self.authority.clone(),
            authenticator: self.authenticator.clone(),
            policies: self.policies.clone(),
            schema: self.schema.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: ObjectStore, G: DomainBinding> WindowsMdm<S, G> {
    /// Create a service with no desired settings and an empty schema.
    pub fn new(
        authority: Arc<AuthorityManager<S, G>>,
        authenticator: Arc<dyn Authenticator>,
        config: EnrollmentConfig,
    ) -> Self {
        Self {
            authority,
            authenticator,
            policies: Arc::new(StaticPolicySource::default()),
            schema: Arc::new(Schema::default()),
            config: Arc::new(config),
        }
    }

    pub fn with_policies(mut self, schema: Schema, policies: Arc<dyn PolicySource>) -> Self {
        self.schema = Arc::new(schema);
        self.policies = policies;
        self
    }

    pub fn authority(&self) -> &AuthorityManager<S, G> {
        &self.authority
    }
}

impl<S: ObjectStore, G: DomainBinding> AuthorityAdmin for WindowsMdm<S, G> {
    async fn rotate(&self) -> Result<IssueOutcome, AuthorityError> {
        tracing::info!("rotating device authority");
        self.authority.issue_authority().await
    }

    async fn active_authority(&self) -> Result<Option<AuthoritySummary>, AuthorityError> {
        Ok(self.authority.active().await?.map(|r| r.summary()))
    }

    async fn authority_history(&self) -> Result<Vec<AuthoritySummary>, AuthorityError> {
        Ok(self
            .authority
            .history()?
            .iter()
            .map(|r| r.summary())
            .collect())
    }
}
