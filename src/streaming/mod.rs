mod handlers;
mod server;
mod stats;
#[cfg(test)]
mod tests;
mod viewer;

pub use server::{StreamServer, StreamServerBuilder};
pub use stats::{StreamStats, StreamStatsSnapshot};
pub use viewer::ViewerConnection;
