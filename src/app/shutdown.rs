use super::{ComponentState, HomecamApp, ShutdownReason};
use crate::error::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

const PIPELINE_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

impl HomecamApp {
    /// Stop everything in reverse start order.
    ///
    /// Exit code 1 when the pipeline halted on a fatal error or a component
    /// failed to stop, otherwise 0.
    pub async fn shutdown(&mut self, reason: ShutdownReason) -> Result<i32> {
        info!("Beginning graceful shutdown ({})", reason);

        self.cancellation_token.cancel();
        let mut exit_code = 0;

        if self.config.control.socket.is_some() {
            self.set_component_state("control", ComponentState::Stopped)
                .await;
        }

        self.set_component_state("pipeline", ComponentState::Stopping)
            .await;
        if self.pipeline_stop().await {
            self.set_component_state("pipeline", ComponentState::Stopped)
                .await;
        } else {
            self.set_component_state("pipeline", ComponentState::Failed)
                .await;
            exit_code = 1;
        }

        if let Some(failure) = self.pipeline.failure() {
            error!("Pipeline halted: {}", failure);
            exit_code = 1;
        }

        self.registry.sweep();

        if let Err(e) = self.stop_stream_server().await {
            error!("Error stopping streaming: {}", e);
            exit_code = 1;
        }

        for task in self.background_tasks.drain(..) {
            task.abort();
        }

        let stats = self.pipeline.stats();
        info!(
            "Recorded {} frames into {} files ({} dropped)",
            stats.frames_written, stats.files_opened, stats.frames_dropped
        );

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Stop the pipeline off the async runtime; false on timeout
    pub(super) async fn pipeline_stop(&self) -> bool {
        let pipeline = self.pipeline.clone();
        let stop = tokio::task::spawn_blocking(move || pipeline.stop());
        match timeout(PIPELINE_STOP_TIMEOUT, stop).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("Pipeline stop task failed: {}", e);
                false
            }
            Err(_) => {
                error!("Pipeline stop timeout");
                false
            }
        }
    }

    async fn stop_stream_server(&mut self) -> Result<()> {
        let Some(server) = &self.stream_server else {
            return Ok(());
        };
        self.set_component_state("streaming", ComponentState::Stopping)
            .await;
        server.shutdown();

        if let Some(task) = self.server_task.take() {
            match timeout(SERVER_STOP_TIMEOUT, task).await {
                Ok(Ok(result)) => result?,
                Ok(Err(e)) => warn!("Stream server task failed: {}", e),
                Err(_) => {
                    self.set_component_state("streaming", ComponentState::Failed)
                        .await;
                    return Err(crate::error::HomecamError::system(
                        "streaming component stop timeout",
                    ));
                }
            }
        }

        self.set_component_state("streaming", ComponentState::Stopped)
            .await;
        info!("streaming component stopped");
        Ok(())
    }
}
