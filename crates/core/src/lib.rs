//! HTTP surface and lifecycle wiring for the warden admin core.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod error;
mod router;

pub use error::{Error, Result};
pub use router::{ApiResult, TabSpec};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;
use warden_backup::BackupPipeline;
use warden_config::ConfigStore;
use warden_ensemble::EnsembleController;
use warden_logindex::LogIndexEngine;
use warden_rollout::RolloutCoordinator;

/// A custom tab contributed by the embedding application.
#[derive(Clone, Debug)]
pub struct UiTab {
    /// Display name.
    pub name: String,
    /// Plain-text content served by the tab endpoint.
    pub content: String,
}

/// Options for creating a new [`Core`].
pub struct CoreOptions {
    /// The versioned configuration store.
    pub config_store: Arc<ConfigStore>,
    /// The rollout coordinator.
    pub coordinator: RolloutCoordinator,
    /// The log index engine.
    pub engine: LogIndexEngine,
    /// The backup pipeline.
    pub backup: BackupPipeline,
    /// The ensemble controller.
    pub controller: EnsembleController,
    /// Additional tabs to expose besides the built-ins.
    pub additional_tabs: Vec<UiTab>,
}

pub(crate) struct Context {
    pub(crate) config_store: Arc<ConfigStore>,
    pub(crate) coordinator: RolloutCoordinator,
    pub(crate) engine: LogIndexEngine,
    pub(crate) backup: BackupPipeline,
    pub(crate) controller: EnsembleController,
    pub(crate) tabs: Vec<UiTab>,
}

/// Entrypoint for all admin interactions: owns the HTTP server and the
/// lifecycle of the background subsystems.
pub struct Core {
    context: Arc<Context>,
    started: AtomicBool,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl Core {
    /// Creates a new core.
    #[must_use]
    pub fn new(
        CoreOptions {
            config_store,
            coordinator,
            engine,
            backup,
            controller,
            additional_tabs,
        }: CoreOptions,
    ) -> Self {
        Self {
            context: Arc::new(Context {
                config_store,
                coordinator,
                engine,
                backup,
                controller,
                tabs: additional_tabs,
            }),
            started: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// The admin router, exposed separately for tests and embedding.
    #[must_use]
    pub fn router(&self) -> Router {
        router::admin_router(self.context.clone())
    }

    /// Starts the background subsystems and binds the admin server.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStarted`] on a second call, [`Error::Io`] when the
    /// port cannot be bound.
    pub async fn start(&self, port: u16) -> Result<()> {
        if self.started.swap(true, Ordering::Relaxed) {
            return Err(Error::AlreadyStarted);
        }

        self.context.controller.start();
        self.context.backup.start();

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| Error::Io("error binding admin port", e))?;
        info!(port, "admin server listening");

        let app = self.router();
        let token = self.shutdown_token.clone();
        self.task_tracker.spawn(async move {
            let shutdown = async move { token.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "admin server exited");
            }
        });
        self.task_tracker.close();
        Ok(())
    }

    /// Stops the server and every background subsystem.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.task_tracker.wait().await;
        self.context.backup.shutdown().await;
        self.context.controller.shutdown().await;
        info!("core stopped");
    }
}
