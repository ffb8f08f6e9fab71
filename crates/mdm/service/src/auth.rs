//! Enrollment authentication.

use base64::Engine as _;
use mdm_core::soap::SecurityToken;
use subtle::ConstantTimeEq as _;

use crate::ConfigError;

/// Who an enrollment token was issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub principal: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("request carries no security token")]
    MissingToken,
    #[error("security token was not accepted")]
    InvalidToken,
}

/// Validates the security token of discovery, policy and enrollment requests.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &SecurityToken) -> Result<Identity, AuthError>;
}

/// Operator-issued enrollment tokens, each mapped to a principal.
///
/// With no tokens configured every request is rejected.
#[derive(Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: Vec<(String, String)>,
}

impl std::fmt::Debug for StaticTokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenAuthenticator")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    /// Parse `token=principal` pairs separated by commas.
    pub fn parse(pairs: &str) -> Result<Self, ConfigError> {
        let mut tokens = Vec::new();
        for pair in pairs.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((token, principal)) if !token.is_empty() && !principal.is_empty() => {
                    tokens.push((token.to_string(), principal.to_string()));
                }
                _ => return Err(ConfigError::InvalidTokenPair),
            }
        }
        Ok(Self { tokens })
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn lookup(&self, presented: &[u8]) -> Option<&str> {
        let mut found = None;
        for (token, principal) in &self.tokens {
            if bool::from(token.as_bytes().ct_eq(presented)) {
                found = Some(principal.as_str());
            }
        }
        found
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, token: &SecurityToken) -> Result<Identity, AuthError> {
        let presented = match token {
            SecurityToken::Binary(bst) => match bst.decode() {
                Ok(bytes) => bytes,
                Err(_) => bst.value.as_bytes().to_vec(),
            },
            SecurityToken::UsernamePassword { password, .. } => password.as_bytes().to_vec(),
        };

        // tokens entered on the authentication page come back base64 encoded a second time
        let nested = base64::engine::general_purpose::STANDARD
            .decode(&presented)
            .ok();

        let principal = self
            .lookup(&presented)
            .or_else(|| nested.as_deref().and_then(|n| self.lookup(n)))
            .ok_or(AuthError::InvalidToken)?;

        Ok(Identity {
            principal: principal.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use mdm_core::soap::{BinarySecurityToken, VALUE_TYPE_USER_TOKEN};

    use super::*;

    #[test]
    fn test_binary_token() {
        let auth = StaticTokenAuthenticator::parse("s3cret=alice@example.com, other=bob").unwrap();
        let token = SecurityToken::Binary(BinarySecurityToken::encode(VALUE_TYPE_USER_TOKEN, b"s3cret"));

        let identity = auth.authenticate(&token).unwrap();
        assert_eq!(identity.principal, "alice@example.com");
    }

    #[test]
    fn test_password_token() {
        let auth = StaticTokenAuthenticator::parse("other=bob").unwrap();
        let token = SecurityToken::UsernamePassword {
            username: "bob@example.com".into(),
            password: "other".into(),
        };
        assert_eq!(auth.authenticate(&token).unwrap().principal, "bob");
    }

    #[test]
    fn test_rejects_unknown_and_empty() {
        let token = SecurityToken::Binary(BinarySecurityToken::encode(VALUE_TYPE_USER_TOKEN, b"nope"));

        let auth = StaticTokenAuthenticator::parse("s3cret=alice").unwrap();
        assert!(matches!(auth.authenticate(&token), Err(AuthError::InvalidToken)));

        for near in [&b"s3cre"[..], b"s3cret!", b"S3cret"] {
            let token = SecurityToken::Binary(BinarySecurityToken::encode(VALUE_TYPE_USER_TOKEN, near));
            assert!(matches!(auth.authenticate(&token), Err(AuthError::InvalidToken)));
        }

        let empty = StaticTokenAuthenticator::default();
        assert!(empty.is_empty());
        assert!(matches!(empty.authenticate(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_parse_rejects_malformed_pairs() {
        assert!(StaticTokenAuthenticator::parse("novalue").is_err());
        assert!(StaticTokenAuthenticator::parse("=x").is_err());
        assert!(StaticTokenAuthenticator::parse("").unwrap().is_empty());
    }
}
