/// Streaming account activity over WebSocket
///
/// Each snapshot produced by the ledger monitor is sent to the client as a
/// JSON text frame. The monitor stops once the client goes away.
use crate::{context::AppContext, error::AgentResult, ledger::AccountActivity};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::{
    sync::mpsc,
    task::{JoinError, JoinHandle},
    time::{timeout, Duration},
};
use tracing::{debug, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub fn routes() -> Router<AppContext> {
    Router::new().route("/v1/account/activity/:address", get(account_activity))
}

async fn account_activity(
    ws: WebSocketUpgrade,
    Path(address): Path<String>,
    State(ctx): State<AppContext>,
) -> AgentResult<Response> {
    let (snapshots, monitor) = ctx.handler.account_activity(&address)?;
    debug!(%address, "account activity subscription");
    Ok(ws.on_upgrade(move |socket| stream_activity(socket, snapshots, monitor)))
}

async fn stream_activity(
    socket: WebSocket,
    mut snapshots: mpsc::Receiver<AccountActivity>,
    monitor: JoinHandle<()>,
) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            snapshot = snapshots.recv() => {
                let Some(snapshot) = snapshot else {
                    break;
                };
                let text = match serde_json::to_string(&snapshot) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("failed to encode activity snapshot: {}", e);
                        continue;
                    }
                };
                match timeout(SEND_TIMEOUT, sender.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        debug!("client disconnected during send");
                        break;
                    }
                    Err(_) => {
                        warn!("send timeout, dropping activity subscription");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("client closed activity stream");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("websocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // The monitor exits on its own once the receiver is gone
    drop(snapshots);
    let _ = finish_monitor(monitor).await;
}

async fn finish_monitor(monitor: JoinHandle<()>) -> Result<(), JoinError> {
    monitor.await.map_err(|e| {
        warn!("account monitor ended abnormally: {}", e);
        e
    })
}
