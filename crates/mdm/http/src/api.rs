//! Operator API for the Device Authority.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use mdm_service::{AuthorityAdmin, AuthorityError, AuthoritySummary};

/// Response to a rotation request.
#[derive(Debug, Serialize)]
pub struct RotateResponse {
    #[serde(flatten)]
    pub authority: AuthoritySummary,
    /// `issued`, or `concurrent` when another instance won the same sequence.
    pub outcome: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(e: &AuthorityError, action: &str) -> Response {
    tracing::error!(error = %e, action, "authority request failed");
    let status = match e {
        AuthorityError::MissingBucket => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorResponse {
        error: format!("failed to {action}"),
    };
    (status, Json(body)).into_response()
}

/// Issue a new authority and publish it.
pub async fn rotate_authority<A>(State(admin): State<A>) -> Response
where
    A: AuthorityAdmin,
{
    match admin.rotate().await {
        Ok(outcome) => {
            let response = RotateResponse {
                authority: outcome.record().summary(),
                outcome: outcome.as_str(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => error_response(&e, "rotate device authority"),
    }
}

/// The authority currently signing device certificates.
pub async fn active_authority<A>(State(admin): State<A>) -> Response
where
    A: AuthorityAdmin,
{
    match admin.active_authority().await {
        Ok(Some(summary)) => (StatusCode::OK, Json(summary)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(&e, "read active device authority"),
    }
}

/// Every authority issued so far, oldest first.
pub async fn authority_history<A>(State(admin): State<A>) -> Response
where
    A: AuthorityAdmin,
{
    match admin.authority_history().await {
        Ok(history) => (StatusCode::OK, Json(history)).into_response(),
        Err(e) => error_response(&e, "list device authorities"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use mdm_service::{AuthorityConfig, AuthorityManager, StaticTokenAuthenticator, WindowsMdm};
    use mdm_storage::MemoryStore;
    use tower::ServiceExt as _;

    use crate::api_router;

    use super::*;

    fn service(bucket: Option<&str>) -> WindowsMdm<Arc<MemoryStore>> {
        let authority = AuthorityManager::new(
            Arc::new(MemoryStore::new()),
            AuthorityConfig {
                bucket: bucket.map(String::from),
                key_bits: 2048,
                ..AuthorityConfig::default()
            },
        );
        WindowsMdm::new(
            Arc::new(authority),
            Arc::new(StaticTokenAuthenticator::default()),
            Default::default(),
        )
    }

    async fn call(
        mdm: &WindowsMdm<Arc<MemoryStore>>,
        method: &str,
        path: &str,
    ) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = api_router(mdm.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_rotate_then_read() {
        let mdm = service(Some("mdm"));

        let (status, _) = call(&mdm, "GET", "/v1/authority").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, rotated) = call(&mdm, "POST", "/v1/authority/rotate").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rotated["outcome"], "issued");
        assert_eq!(rotated["sequence"], 1);
        assert!(rotated.get("bundle").is_none());

        let (status, active) = call(&mdm, "GET", "/v1/authority").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(active["id"], rotated["id"]);

        call(&mdm, "POST", "/v1/authority/rotate").await;
        let (_, history) = call(&mdm, "GET", "/v1/authority/history").await;
        let sequences: Vec<_> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["sequence"].as_u64().unwrap())
            .collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_rotate_without_bucket() {
        let (status, body) = call(&service(None), "POST", "/v1/authority/rotate").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "failed to rotate device authority");
    }
}
