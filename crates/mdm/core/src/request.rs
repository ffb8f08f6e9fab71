//! Management request context.

/// Context of a `Manage.svc` request as received from the gateway.
///
/// The certificate has not been verified yet; the management service checks it against the
/// trust-store pool before trusting anything in it.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Client certificate (DER-encoded).
    pub certificate: Option<Vec<u8>>,

    /// SHA-1 fingerprint of the client certificate.
    pub fingerprint: Option<String>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_certificate(mut self, cert: Vec<u8>, fingerprint: impl Into<String>) -> Self {
        self.certificate = Some(cert);
        self.fingerprint = Some(fingerprint.into());
        self
    }
}
