//! MDM HTTP Layer
//!
//! Axum routers for the Windows enrollment endpoints, `Manage.svc`, and the operator API.

mod api;
mod handlers;
mod middleware;

pub use api::*;
pub use handlers::*;
pub use middleware::*;

use axum::Router;
use mdm_service::{AuthorityAdmin, Enrollment, Management};

/// Paths Windows devices are pointed at during enrollment.
pub const DISCOVERY_PATH: &str = "/EnrollmentServer/Discovery.svc";
pub const POLICY_PATH: &str = "/EnrollmentServer/Policy.svc";
pub const ENROLLMENT_PATH: &str = "/EnrollmentServer/Enrollment.svc";
pub const AUTHENTICATE_PATH: &str = "/EnrollmentServer/Authenticate.svc";
pub const MANAGE_PATH: &str = "/ManagementServer/Manage.svc";

/// Create the device-facing router.
pub fn mdm_router<S>(service: S) -> Router
where
    S: Enrollment + Management + Clone + 'static,
{
    use axum::routing::{get, post};

    Router::new()
        .route(
            DISCOVERY_PATH,
            get(handlers::discovery_probe).post(handlers::discovery_handler::<S>),
        )
        .route(POLICY_PATH, post(handlers::policy_handler::<S>))
        .route(ENROLLMENT_PATH, post(handlers::enrollment_handler::<S>))
        .route(AUTHENTICATE_PATH, get(handlers::authenticate_page))
        .route(MANAGE_PATH, post(handlers::manage_handler::<S>))
        .with_state(service)
}

/// Create the operator API router.
pub fn api_router<A>(admin: A) -> Router
where
    A: AuthorityAdmin + Clone + 'static,
{
    use axum::routing::{get, post};

    Router::new()
        .route("/v1/authority", get(api::active_authority::<A>))
        .route("/v1/authority/rotate", post(api::rotate_authority::<A>))
        .route("/v1/authority/history", get(api::authority_history::<A>))
        .with_state(admin)
}
