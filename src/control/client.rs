use super::{control_codec, ControlMessage};
use crate::config::ControlConfig;
use crate::error::ControlError;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

/// Supervisor side of the control channel
pub struct ControlClient<T> {
    framed: Framed<T, LengthDelimitedCodec>,
    probe_timeout: Duration,
}

impl<T> ControlClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: T) -> Self {
        Self::from_config(io, &ControlConfig::default())
    }

    /// Client whose heartbeat uses `probe_timeout_ms` from `config`
    pub fn from_config(io: T, config: &ControlConfig) -> Self {
        Self {
            framed: Framed::new(io, control_codec()),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    async fn send(&mut self, message: ControlMessage) -> Result<(), ControlError> {
        self.framed
            .send(Bytes::from_static(message.payload()))
            .await?;
        Ok(())
    }

    /// Send `PING` and wait for `PONG`; returns the round-trip time.
    ///
    /// Fails with `Unresponsive` when no answer arrives within `timeout`.
    pub async fn probe(&mut self, timeout: Duration) -> Result<Duration, ControlError> {
        let started = Instant::now();
        self.send(ControlMessage::Ping).await?;

        let reply = tokio::time::timeout(timeout, self.framed.next())
            .await
            .map_err(|_| ControlError::Unresponsive {
                millis: timeout.as_millis() as u64,
            })?;

        match reply {
            Some(frame) => match ControlMessage::parse(&frame?)? {
                ControlMessage::Pong => {
                    let rtt = started.elapsed();
                    debug!("Control probe answered in {:?}", rtt);
                    Ok(rtt)
                }
                other => Err(ControlError::Unexpected {
                    message: other.to_string(),
                }),
            },
            None => Err(ControlError::Closed),
        }
    }

    /// `probe` with the configured timeout
    pub async fn heartbeat(&mut self) -> Result<Duration, ControlError> {
        self.probe(self.probe_timeout).await
    }

    pub async fn request_exit(&mut self) -> Result<(), ControlError> {
        self.send(ControlMessage::Exit).await
    }

    pub fn into_inner(self) -> T {
        self.framed.into_inner()
    }
}
