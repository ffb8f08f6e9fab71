//! Device-facing handlers: enrollment SOAP endpoints and OMA-DM check-ins.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use color_eyre::eyre::WrapErr as _;
use serde::Deserialize;

use mdm_core::soap::SOAP_CONTENT_TYPE;
use mdm_core::{Fault, FaultSubcode, Request, syncml};
use mdm_service::{Enrollment, Management};

fn xml_response(content_type: &'static str, body: String) -> Response {
    let headers = [
        (CONTENT_TYPE, HeaderValue::from_static(content_type)),
        (CONTENT_LENGTH, HeaderValue::from(body.len())),
    ];
    (StatusCode::OK, headers, body).into_response()
}

fn fault_response(fault: &Fault) -> Response {
    let status =
        StatusCode::from_u16(fault.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match fault.to_xml() {
        Ok(body) => {
            let headers = [
                (CONTENT_TYPE, HeaderValue::from_static(SOAP_CONTENT_TYPE)),
                (CONTENT_LENGTH, HeaderValue::from(body.len())),
            ];
            (status, headers, body).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to render SOAP fault");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn soap_reply(result: Result<String, Fault>) -> Response {
    match result {
        Ok(body) => xml_response(SOAP_CONTENT_TYPE, body),
        Err(fault) => fault_response(&fault),
    }
}

fn soap_body(body: &[u8]) -> Result<&str, Fault> {
    std::str::from_utf8(body).map_err(|_| {
        tracing::warn!("SOAP request body is not UTF-8");
        Fault::sender(FaultSubcode::MessageFormat, "The request is malformed.")
    })
}

/// Devices probe the discovery URL with a GET before posting.
pub async fn discovery_probe() -> StatusCode {
    StatusCode::OK
}

/// Handle `Discover` requests.
pub async fn discovery_handler<S>(State(service): State<S>, body: Bytes) -> Response
where
    S: Enrollment,
{
    let body = match soap_body(&body) {
        Ok(body) => body,
        Err(fault) => return fault_response(&fault),
    };
    soap_reply(service.discover(body).await)
}

/// Handle `GetPolicies` requests.
pub async fn policy_handler<S>(State(service): State<S>, body: Bytes) -> Response
where
    S: Enrollment,
{
    let body = match soap_body(&body) {
        Ok(body) => body,
        Err(fault) => return fault_response(&fault),
    };
    soap_reply(service.get_policies(body).await)
}

/// Handle WSTEP `RequestSecurityToken` requests.
pub async fn enrollment_handler<S>(State(service): State<S>, body: Bytes) -> Response
where
    S: Enrollment,
{
    let body = match soap_body(&body) {
        Ok(body) => body,
        Err(fault) => return fault_response(&fault),
    };
    soap_reply(service.enroll(body).await)
}

#[derive(Debug, Deserialize)]
pub struct AuthenticateParams {
    pub appru: Option<String>,
    pub login_hint: Option<String>,
}

/// Federated sign-in page. The enrolling user pastes their enrollment token, which Windows
/// picks up from the form post to `appru` and sends back as the `wresult` security token.
pub async fn authenticate_page(Query(params): Query<AuthenticateParams>) -> Response {
    let Some(appru) = params.appru.filter(|a| !a.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing appru").into_response();
    };

    let appru = quick_xml::escape::escape(&appru);
    let hint = params
        .login_hint
        .map(|h| quick_xml::escape::escape(&h).into_owned())
        .unwrap_or_default();

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Device enrollment</title></head>
<body>
<h3>Enroll {hint}</h3>
<form method="post" action="{appru}">
<label for="wresult">Enrollment token</label>
<input type="password" id="wresult" name="wresult" autocomplete="off" />
<input type="submit" value="Enroll" />
</form>
</body>
</html>"#
    ))
    .into_response()
}

/// Handle OMA-DM check-ins.
pub async fn manage_handler<S>(
    State(service): State<S>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: Management,
{
    let req = match request_context(&headers) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(error = %e, "unreadable client certificate header");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let Ok(body) = std::str::from_utf8(&body) else {
        tracing::warn!("SyncML body is not UTF-8");
        return StatusCode::BAD_REQUEST.into_response();
    };

    match service.manage(&req, body).await {
        Ok(response) => xml_response(syncml::CONTENT_TYPE, response),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                tracing::error!(error = %e, "management check-in failed");
            } else {
                tracing::warn!(error = %e, "management check-in rejected");
            }
            status.into_response()
        }
    }
}

/// Build the request context from the certificate forwarded by the TLS-terminating gateway.
fn request_context(headers: &HeaderMap) -> color_eyre::eyre::Result<Request> {
    for name in mdm_crypto::CLIENT_CERT_HEADERS {
        if let Some(value) = headers.get(name) {
            let value = value
                .to_str()
                .wrap_err_with(|| format!("invalid {name} header"))?;
            let cert = mdm_crypto::extract_client_cert(value)?;
            let fingerprint = mdm_crypto::sha1_fingerprint(&cert);
            return Ok(Request::new().with_certificate(cert, fingerprint));
        }
    }
    Ok(Request::new())
}
