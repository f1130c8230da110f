use crate::error::protocol_violation;
use crate::session::{FrameSink, Session, TransportKind};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse},
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::server::ServerState;
use super::viewer::ViewerConnection;

/// Upgrade to a WebSocket that carries one binary message per frame
pub async fn live_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(endpoint): ConnectInfo<SocketAddr>,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_viewer(socket, endpoint, state))
}

async fn serve_viewer(socket: WebSocket, endpoint: SocketAddr, state: ServerState) {
    let cancel = state.shutdown.child_token();
    let (viewer, mut backlog) = ViewerConnection::new(
        endpoint,
        state.send_backlog,
        state.max_backlog_drops,
        cancel.clone(),
        Arc::clone(&state.stats),
    );
    let sink: Arc<dyn FrameSink> = Arc::new(viewer);

    if !state
        .registry
        .insert(endpoint, Session::new(endpoint, TransportKind::Plain, &sink))
    {
        protocol_violation(&format!("session {} registered twice", endpoint));
    }
    state.stats.viewer_connected();
    info!("Viewer {} connected ({} live)", endpoint, state.registry.len());

    let (mut outgoing, mut incoming) = socket.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Closing viewer {}", endpoint);
                break;
            }
            frame = backlog.recv() => {
                let Some(frame) = frame else { break };
                let len = frame.len();
                if let Err(e) = outgoing.send(Message::Binary(frame.to_vec())).await {
                    debug!("Send to viewer {} failed: {}", endpoint, e);
                    state.stats.errors.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                state.stats.frame_sent(len);
            }
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(other)) => trace!("Ignoring message from viewer {}: {:?}", endpoint, other),
                Some(Err(e)) => {
                    debug!("Viewer {} connection error: {}", endpoint, e);
                    break;
                }
            },
        }
    }

    // Already absent after a shutdown sweep
    state.registry.remove(&endpoint);
    let _ = outgoing.send(Message::Close(None)).await;
    state.stats.viewer_disconnected();
    info!("Viewer {} disconnected", endpoint);
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let pipeline = state.pipeline.as_ref().map(|pipeline| {
        serde_json::json!({
            "state": pipeline.state().to_string(),
            "failure": pipeline.failure(),
            "stats": pipeline.stats(),
        })
    });

    let healthy = state
        .pipeline
        .as_ref()
        .map_or(true, |pipeline| pipeline.failure().is_none());

    let health_info = serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "viewers": state.registry.len(),
        "pipeline": pipeline,
        "broadcast": state.broadcaster.stats(),
        "stream": state.stats.snapshot(),
    });

    (StatusCode::OK, axum::Json(health_info))
}

/// Minimal page that paints the live frames into an image element
pub async fn viewer_page_handler() -> impl IntoResponse {
    Html(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Homecam</title>
    <style>
        :root { color-scheme: dark; }
        body {
            margin: 0;
            background: #000;
            display: flex;
            align-items: center;
            justify-content: center;
            min-height: 100vh;
        }
        img.live {
            display: block;
            max-width: 100vw;
            max-height: 100vh;
            object-fit: contain;
        }
    </style>
</head>
<body>
    <img class="live" id="live" alt="Homecam live view">
    <script>
        const img = document.getElementById("live");
        function connect() {
            const scheme = location.protocol === "https:" ? "wss" : "ws";
            const ws = new WebSocket(`${scheme}://${location.host}/live`);
            ws.binaryType = "blob";
            ws.onmessage = (event) => {
                const url = URL.createObjectURL(event.data);
                const previous = img.src;
                img.src = url;
                if (previous.startsWith("blob:")) URL.revokeObjectURL(previous);
            };
            ws.onclose = () => setTimeout(connect, 2000);
        }
        connect();
    </script>
</body>
</html>
"#,
    )
}
