use super::orchestrator::ShutdownTrigger;
use super::{ComponentState, HomecamApp, ShutdownReason};
use crate::control::{serve_control, ControlOutcome};
use crate::error::{HomecamError, Result};
use crate::pipeline::PipelineCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often dead sessions are pruned and statistics logged
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

/// Longest single blocking wait of the pipeline watcher
const WATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Fire `PipelineStopped` once the pipeline stops. Returns after that or
/// when `token` is cancelled, with at most one bounded wait outstanding.
pub(super) async fn watch_pipeline(
    pipeline: PipelineCoordinator,
    trigger: ShutdownTrigger,
    token: CancellationToken,
) {
    loop {
        let waiter = pipeline.clone();
        let stopped =
            tokio::task::spawn_blocking(move || waiter.wait_stopped(Some(WATCH_INTERVAL))).await;
        match stopped {
            Ok(true) => {
                if trigger.fire(ShutdownReason::PipelineStopped).await {
                    warn!("Pipeline stopped on its own");
                }
                return;
            }
            Ok(false) if !token.is_cancelled() => {}
            Ok(false) => {
                debug!("Pipeline watcher cancelled");
                return;
            }
            Err(e) => {
                error!("Pipeline watcher failed: {}", e);
                return;
            }
        }
    }
}

impl HomecamApp {
    /// Register the managed components
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing homecam components");

        let mut states = self.component_states.lock().await;
        states.insert("pipeline".to_string(), ComponentState::Stopped);
        if self.stream_server.is_some() {
            states.insert("streaming".to_string(), ComponentState::Stopped);
        }
        if self.config.control.socket.is_some() {
            states.insert("control".to_string(), ComponentState::Stopped);
        }
        drop(states);

        Ok(())
    }

    /// Start the pipeline, the stream server and the control channel
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting homecam");

        // Bind first so a taken port fails before the camera is opened
        let listener = match &self.stream_server {
            Some(server) => {
                self.set_component_state("streaming", ComponentState::Starting)
                    .await;
                match server.bind().await {
                    Ok(listener) => Some(listener),
                    Err(e) => {
                        self.set_component_state("streaming", ComponentState::Failed)
                            .await;
                        error!("Failed to start stream server: {}", e);
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        self.start_pipeline().await?;

        if let (Some(server), Some(listener)) = (&self.stream_server, listener) {
            let server = Arc::clone(server);
            self.server_task = Some(tokio::spawn(async move {
                let result = server.serve(listener).await;
                if let Err(e) = &result {
                    error!("Stream server failed: {}", e);
                }
                result
            }));
            self.set_component_state("streaming", ComponentState::Running)
                .await;
        }

        if let Err(e) = self.start_control().await {
            error!("Failed to connect control channel: {}", e);
            self.set_component_state("control", ComponentState::Failed)
                .await;
            self.pipeline_stop().await;
            if let Some(server) = &self.stream_server {
                server.shutdown();
            }
            return Err(e);
        }

        self.start_maintenance();

        info!("Homecam started");
        Ok(())
    }

    async fn start_pipeline(&mut self) -> Result<()> {
        self.set_component_state("pipeline", ComponentState::Starting)
            .await;

        let pipeline = self.pipeline.clone();
        let started = tokio::task::spawn_blocking(move || pipeline.run())
            .await
            .map_err(|e| HomecamError::system(format!("Pipeline start task failed: {}", e)))
            .and_then(|result| result);

        if let Err(e) = started {
            self.set_component_state("pipeline", ComponentState::Failed)
                .await;
            error!("Failed to start pipeline: {}", e);
            return Err(e);
        }
        self.set_component_state("pipeline", ComponentState::Running)
            .await;

        // Report a pipeline that stops by itself
        self.background_tasks.push(tokio::spawn(watch_pipeline(
            self.pipeline.clone(),
            self.shutdown_trigger.clone(),
            self.cancellation_token.clone(),
        )));

        Ok(())
    }

    #[cfg(unix)]
    async fn start_control(&mut self) -> Result<()> {
        let Some(path) = self.config.control.socket.clone() else {
            return Ok(());
        };
        self.set_component_state("control", ComponentState::Starting)
            .await;

        let stream = tokio::net::UnixStream::connect(&path)
            .await
            .map_err(crate::error::ControlError::Io)?;
        info!("Connected to supervisor at {}", path.display());

        let trigger = self.shutdown_trigger.clone();
        let token = self.cancellation_token.clone();
        self.background_tasks.push(tokio::spawn(async move {
            let reason = tokio::select! {
                _ = token.cancelled() => return,
                outcome = serve_control(stream) => match outcome {
                    Ok(ControlOutcome::ExitRequested) => ShutdownReason::ControlExit,
                    Ok(ControlOutcome::Closed) => ShutdownReason::ControlLost,
                    Err(e) => {
                        warn!("Control channel failed: {}", e);
                        ShutdownReason::ControlLost
                    }
                },
            };
            trigger.fire(reason).await;
        }));

        self.set_component_state("control", ComponentState::Running)
            .await;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn start_control(&mut self) -> Result<()> {
        if self.config.control.socket.is_some() {
            warn!("Control sockets are only supported on Unix, ignoring");
        }
        Ok(())
    }

    fn start_maintenance(&mut self) {
        let registry = Arc::clone(&self.registry);
        let broadcaster = Arc::clone(&self.broadcaster);
        let pipeline = self.pipeline.clone();
        let token = self.cancellation_token.clone();

        self.background_tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let pruned = registry.prune();
                        if pruned > 0 {
                            debug!("Pruned {} stale sessions", pruned);
                        }
                        let stats = pipeline.stats();
                        let broadcast = broadcaster.stats();
                        info!(
                            "Pipeline: {} written, {} dropped, {:.1} fps; {} viewers, {} frames broadcast",
                            stats.frames_written,
                            stats.frames_dropped,
                            stats.measured_fps,
                            registry.len(),
                            broadcast.frames_broadcast
                        );
                    }
                }
            }
        }));
    }
}
