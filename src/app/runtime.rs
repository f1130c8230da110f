use super::{HomecamApp, ShutdownReason};
use crate::error::{HomecamError, Result};
use tokio::signal;
use tracing::{error, info};

impl HomecamApp {
    /// Run until a signal, a supervisor request or the pipeline stopping,
    /// then shut down. Returns the process exit code.
    pub async fn run(&mut self) -> Result<i32> {
        info!("Homecam is running");

        let shutdown_receiver =
            self.shutdown_receiver
                .take()
                .ok_or_else(|| HomecamError::System {
                    message: "Shutdown receiver already taken".to_string(),
                })?;

        self.setup_signal_handlers();

        let shutdown_reason = shutdown_receiver.await.map_err(|_| HomecamError::System {
            message: "Shutdown channel closed unexpectedly".to_string(),
        })?;

        info!("Shutdown initiated: {}", shutdown_reason);

        let exit_code = self.shutdown(shutdown_reason).await?;

        info!("Homecam shutdown complete");
        Ok(exit_code)
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&mut self) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let trigger = self.shutdown_trigger.clone();
            self.background_tasks.push(tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            trigger.fire(ShutdownReason::Signal("SIGTERM".to_string())).await;
                        }
                    }
                    Err(e) => error!("Failed to register SIGTERM handler: {}", e),
                }
            }));
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let trigger = self.shutdown_trigger.clone();
        self.background_tasks.push(tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                trigger.fire(ShutdownReason::Signal("SIGINT".to_string())).await;
            }
        }));
    }
}
