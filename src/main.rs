use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lims_core::config::{letterhead_from_env_values, resolve_data_dir};
use lims_core::store::{FileOrderBook, FileResultStore};
use lims_core::{LabConfig, LabService, ReferenceRangeCatalog};

/// Main entry point for the LIMS application
///
/// Loads and validates the reference range catalog, then serves the REST API. A catalog that
/// fails its completeness check stops startup; requests never see a partial catalog.
///
/// # Environment Variables
/// - `LIMS_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `LIMS_DATA_DIR`: Directory for order and result storage (default: "lims_data")
/// - `LIMS_CATALOG_PATH`: Reference range catalog override (default: built-in catalog)
/// - `LIMS_LAB_NAME`, `LIMS_LAB_ADDRESS`, `LIMS_LAB_CONTACT`: Report letterhead
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the catalog or configuration is invalid,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("lims=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let env_value = |key: &str| std::env::var(key).ok();

    let rest_addr = env_value("LIMS_REST_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into());

    let catalog_path = env_value("LIMS_CATALOG_PATH").map(PathBuf::from);
    let catalog = ReferenceRangeCatalog::load_or_builtin(catalog_path.as_deref())?;
    tracing::info!(
        panels = catalog.panels().count(),
        source = %catalog_path
            .as_deref()
            .map_or_else(|| "built-in".to_string(), |p| p.display().to_string()),
        "reference range catalog loaded"
    );

    let letterhead = letterhead_from_env_values(
        env_value("LIMS_LAB_NAME"),
        env_value("LIMS_LAB_ADDRESS"),
        env_value("LIMS_LAB_CONTACT"),
    );
    let data_dir = resolve_data_dir(env_value("LIMS_DATA_DIR").map(PathBuf::from));
    let config = LabConfig::new(data_dir, letterhead)?;

    let service = LabService::new(
        Arc::new(catalog),
        Arc::new(config.clone()),
        FileOrderBook::new(config.orders_dir()),
        FileResultStore::new(config.results_dir()),
    );

    tracing::info!("++ Starting LIMS REST on {}", rest_addr);
    let app = api_rest::router(Arc::new(service));
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
