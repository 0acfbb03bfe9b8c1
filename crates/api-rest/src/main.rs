//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own.
//!
//! ## Intended use
//! Useful for development and debugging; the workspace's main `omr-run`
//! binary is the deployment entry point and builds the same router.

use api_rest::{router, OmrService};
use omr_core::CoreConfig;

/// Main entry point for the standalone OMR REST API server.
///
/// # Environment Variables
/// - `OMR_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `OMR_SYS_ADMIN_TOKEN`: Bearer token of the sys admin (required)
/// - `OMR_AUDIT_PAGE_SIZE`: Default audit page size (default: 20)
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the configuration is invalid,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("OMR_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let sys_admin_token = std::env::var("OMR_SYS_ADMIN_TOKEN")
        .map_err(|_| anyhow::anyhow!("OMR_SYS_ADMIN_TOKEN must be set"))?;
    let audit_page_size = match std::env::var("OMR_AUDIT_PAGE_SIZE") {
        Ok(raw) => raw.parse()?,
        Err(_) => omr_core::config::DEFAULT_AUDIT_PAGE_SIZE,
    };

    tracing::info!("-- Starting OMR REST API on {}", addr);

    let cfg = CoreConfig::new(sys_admin_token, audit_page_size)?;
    let app = router(OmrService::new(cfg));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
