use super::types::{ComponentState, ShutdownReason};
use crate::config::HomecamConfig;
use crate::pipeline::{
    ConfiguredStages, FrameTap, PipelineCoordinator, PipelineSettings, StageFactory,
};
use crate::session::{Broadcaster, SessionRegistry};
use crate::streaming::{StreamServer, StreamServerBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// First-come shutdown request shared by the signal, control and pipeline
/// watchers
#[derive(Clone)]
pub(super) struct ShutdownTrigger {
    sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
}

impl ShutdownTrigger {
    pub(super) fn new(sender: oneshot::Sender<ShutdownReason>) -> Self {
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    /// Returns false if a shutdown was already requested
    pub(super) async fn fire(&self, reason: ShutdownReason) -> bool {
        match self.sender.lock().await.take() {
            Some(sender) => sender.send(reason).is_ok(),
            None => false,
        }
    }
}

/// Wires the recording pipeline, the viewer sessions and the stream server
/// together and owns their lifecycle
pub struct HomecamApp {
    pub(super) config: HomecamConfig,
    pub(super) registry: Arc<SessionRegistry>,
    pub(super) broadcaster: Arc<Broadcaster>,
    pub(super) pipeline: PipelineCoordinator,
    pub(super) stream_server: Option<Arc<StreamServer>>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_trigger: ShutdownTrigger,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) background_tasks: Vec<JoinHandle<()>>,
    pub(super) server_task: Option<JoinHandle<crate::error::Result<()>>>,
    pub(super) cancellation_token: CancellationToken,
}

impl HomecamApp {
    /// Create the application from its configuration
    pub fn new(config: HomecamConfig) -> crate::error::Result<Self> {
        let stages = Arc::new(ConfiguredStages::new(config.clone()));
        Self::with_stages(config, stages)
    }

    /// Create the application with custom stage components
    pub fn with_stages(
        config: HomecamConfig,
        stages: Arc<dyn StageFactory>,
    ) -> crate::error::Result<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));

        let tap: Option<Arc<dyn FrameTap>> = if config.stream.enabled {
            Some(Arc::clone(&broadcaster) as Arc<dyn FrameTap>)
        } else {
            None
        };
        let pipeline = PipelineCoordinator::new(PipelineSettings::from_config(&config), stages, tap);

        let stream_server = if config.stream.enabled {
            let server = StreamServerBuilder::new()
                .config(config.stream.clone())
                .broadcaster(Arc::clone(&broadcaster))
                .pipeline(pipeline.clone())
                .build()?;
            Some(Arc::new(server))
        } else {
            None
        };

        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Ok(Self {
            config,
            registry,
            broadcaster,
            pipeline,
            stream_server,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_trigger: ShutdownTrigger::new(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            background_tasks: Vec::new(),
            server_task: None,
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn pipeline(&self) -> &PipelineCoordinator {
        &self.pipeline
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn stream_server(&self) -> Option<&Arc<StreamServer>> {
        self.stream_server.as_ref()
    }

    /// Ask the running application to shut down
    pub async fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        self.shutdown_trigger.fire(reason).await
    }
}
