//! Windows MDM server.

mod config;

use std::sync::Arc;

use axum::Router;
use clap::Parser as _;
use color_eyre::eyre::WrapErr as _;
use mdm_service::{AuthorityManager, HttpDomainBinding, StaticTokenAuthenticator, WindowsMdm};
use tower_http::trace::TraceLayer;

use crate::config::Args;

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("winmdm-server starting");

    let storage = mdm_storage::SqliteStorage::new(&args.database_url)
        .wrap_err("failed to initialize storage")?;

    storage
        .run_migrations()
        .wrap_err("failed to run migrations")?;

    let mut authority = AuthorityManager::new(storage, args.authority());
    match args.gateway()? {
        Some(binding) => {
            let client = HttpDomainBinding::new(&binding).wrap_err("failed to build gateway client")?;
            tracing::info!(domain = %binding.domain, "trust-store updates enabled");
            authority = authority.with_gateway(binding, client);
        }
        None => tracing::warn!("no gateway configured, trust-store updates are disabled"),
    }
    if authority.config().bucket.is_none() {
        tracing::warn!("MDM_BUCKET is not set, enrollment will fail until it is");
    }

    let authenticator = StaticTokenAuthenticator::parse(&args.enrollment_tokens)
        .wrap_err("invalid MDM_ENROLLMENT_TOKENS")?;
    if authenticator.is_empty() {
        tracing::warn!("no enrollment tokens configured, every enrollment will be rejected");
    }

    let schema = args.schema()?;
    let policies = args.policies()?;
    tracing::info!(
        sections = schema.sections.len(),
        settings = schema.entries().count(),
        "loaded configuration schema"
    );

    let service = WindowsMdm::new(Arc::new(authority), Arc::new(authenticator), args.enrollment())
        .with_policies(schema, Arc::new(policies));

    let app = Router::new()
        .merge(mdm_http::mdm_router(service.clone()))
        .merge(mdm_http::api_router(service))
        .layer(axum::middleware::from_fn(mdm_http::logging_middleware))
        .layer(TraceLayer::new_for_http());

    tracing::info!(addr = %args.listen, "listening");

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .wrap_err_with(|| format!("failed to bind {}", args.listen))?;

    axum::serve(listener, app).await.wrap_err("server error")?;

    Ok(())
}
