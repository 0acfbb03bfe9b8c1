//! Main entry point for the OMR application.
//!
//! Starts the REST API server with OpenAPI/Swagger documentation. All
//! business rules live in `omr-core`; this binary only wires configuration
//! from the environment into the router built by `api-rest`.

use api_rest::{router, OmrService};
use omr_core::CoreConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Starts the OMR server on the configured address (default: 0.0.0.0:3000).
///
/// # Environment Variables
/// - `OMR_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `OMR_SYS_ADMIN_TOKEN`: Bearer token of the sys admin (required)
/// - `OMR_AUDIT_PAGE_SIZE`: Default audit page size (default: 20)
///
/// # Returns
/// * `Ok(())` - If the server starts and runs successfully
/// * `Err(anyhow::Error)` - If startup or runtime fails
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - `OMR_SYS_ADMIN_TOKEN` is unset or the configuration is invalid,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("omr=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("OMR_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let sys_admin_token = std::env::var("OMR_SYS_ADMIN_TOKEN")
        .map_err(|_| anyhow::anyhow!("OMR_SYS_ADMIN_TOKEN must be set"))?;
    let audit_page_size = match std::env::var("OMR_AUDIT_PAGE_SIZE") {
        Ok(raw) => raw.parse()?,
        Err(_) => omr_core::config::DEFAULT_AUDIT_PAGE_SIZE,
    };

    tracing::info!("-- Starting OMR on {}", addr);

    let cfg = CoreConfig::new(sys_admin_token, audit_page_size)?;
    let app = router(OmrService::new(cfg));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
