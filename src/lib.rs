pub mod annotate;
pub mod app;
pub mod camera;
pub mod config;
pub mod control;
pub mod decode;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod recording;
pub mod session;
pub mod streaming;

pub use app::{HomecamApp, ShutdownReason};
pub use config::HomecamConfig;
pub use error::{HomecamError, Result};
pub use frame::{DecodedImage, FrameContext, Packet, RawFrame};
pub use pipeline::{
    FrameTap, PipelineCoordinator, PipelineSettings, PipelineState, PipelineStatsSnapshot,
};
pub use session::{Broadcaster, FrameSink, Session, SessionRegistry};
pub use streaming::{StreamServer, StreamServerBuilder};
