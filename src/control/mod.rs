//! Control channel to the supervising process.
//!
//! Messages are length-prefixed frames: a 4-byte native-endian length
//! followed by the payload. The supervisor probes liveness with `PING`
//! (answered with `PONG`) and requests a graceful exit with `EXIT`.

mod client;
#[cfg(test)]
mod tests;

pub use client::ControlClient;

use crate::error::ControlError;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

/// Largest control frame accepted
pub const MAX_CONTROL_FRAME: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Ping,
    Pong,
    Exit,
}

impl ControlMessage {
    pub fn payload(&self) -> &'static [u8] {
        match self {
            ControlMessage::Ping => b"PING",
            ControlMessage::Pong => b"PONG",
            ControlMessage::Exit => b"EXIT",
        }
    }

    pub fn parse(payload: &[u8]) -> Result<Self, ControlError> {
        match payload {
            b"PING" => Ok(ControlMessage::Ping),
            b"PONG" => Ok(ControlMessage::Pong),
            b"EXIT" => Ok(ControlMessage::Exit),
            other => Err(ControlError::Unexpected {
                message: String::from_utf8_lossy(other).into_owned(),
            }),
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.payload()))
    }
}

/// Length-delimited codec with a 4-byte native-endian header
pub fn control_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .native_endian()
        .max_frame_length(MAX_CONTROL_FRAME)
        .new_codec()
}

/// Why `serve_control` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    ExitRequested,
    /// The supervisor closed the channel
    Closed,
}

/// Answer probes on `io` until the supervisor asks us to exit or hangs up.
///
/// Unknown messages are logged and ignored.
pub async fn serve_control<T>(io: T) -> Result<ControlOutcome, ControlError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, control_codec());

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        match ControlMessage::parse(&frame) {
            Ok(ControlMessage::Ping) => {
                debug!("Control probe received");
                framed
                    .send(Bytes::from_static(ControlMessage::Pong.payload()))
                    .await?;
            }
            Ok(ControlMessage::Exit) => {
                info!("Exit requested over control channel");
                return Ok(ControlOutcome::ExitRequested);
            }
            Ok(ControlMessage::Pong) => debug!("Ignoring unsolicited PONG"),
            Err(e) => warn!("{}", e),
        }
    }

    info!("Control channel closed by supervisor");
    Ok(ControlOutcome::Closed)
}
