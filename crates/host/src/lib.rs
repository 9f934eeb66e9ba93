//! Relaybus Host - composition glue around `relaybus-core`
//!
//! Loads [`Settings`], resolves configured consumers through a
//! [`ConsumerCatalog`] and runs them with a [`HostedOrchestrator`]:
//!
//! ```ignore
//! init_logging(LogFormat::from_env())?;
//! let settings = Settings::load(Some(Path::new("relaybus.toml")))?;
//! let catalog = ConsumerCatalog::new().consumer("order_projector", OrderProjector::default);
//! HostedOrchestrator::builder(services)
//!     .settings(settings)
//!     .build(&catalog)?
//!     .run_until(shutdown_signal())
//!     .await?;
//! ```

pub mod catalog;
pub mod logging;
pub mod orchestrator;
pub mod settings;

pub use catalog::ConsumerCatalog;
pub use logging::{init_logging, LogFormat};
pub use orchestrator::{HostedOrchestrator, OrchestratorBuilder, Services};
pub use settings::{ConsumerOverrides, ConsumerSettings, Settings};

/// Resolves on Ctrl+C; if the handler cannot be installed, never resolves
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = ?e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
