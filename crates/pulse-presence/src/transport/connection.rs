//! Background socket task: dial on command, serve frames, classify
//! failures. No internal retry: after a failure the task parks and
//! waits for the next `Connect` command.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pulse_common::wire::{client_events, SYSTEM_CHANNEL};
use pulse_common::Envelope;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::types::{ConnectionState, FailureReason};

use super::types::{TransportCommand, TransportConfig};

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    WsMessage,
>;

pub(crate) async fn socket_task(
    config: TransportConfig,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::Sender<Envelope>,
    mut command_rx: mpsc::Receiver<TransportCommand>,
) {
    loop {
        // Parked: only a Connect command starts a dial attempt.
        match command_rx.recv().await {
            Some(TransportCommand::Connect) => {}
            Some(TransportCommand::Disconnect) => {
                let _ = state_tx.send(ConnectionState::Disconnected);
                continue;
            }
            Some(TransportCommand::Send(envelope)) => {
                debug!(channel = %envelope.channel, event = %envelope.event, "dropping frame while offline");
                continue;
            }
            None => return,
        }

        let _ = state_tx.send(ConnectionState::Connecting);
        let url = config.ws_url();
        info!(endpoint = %config.endpoint, "connecting to relay");

        match tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(&url))
            .await
        {
            Ok(Ok((ws, _))) => {
                let _ = state_tx.send(ConnectionState::Connected);
                match serve(ws, &config, &event_tx, &mut command_rx).await {
                    None => {
                        info!("transport closed deliberately");
                        let _ = state_tx.send(ConnectionState::Disconnected);
                    }
                    Some(reason) => {
                        warn!(kind = ?reason.kind, message = %reason.message, "transport failed");
                        let _ = state_tx.send(ConnectionState::Failed(reason));
                    }
                }
            }
            Ok(Err(e)) => {
                let reason = classify_connect_error(&e);
                warn!(kind = ?reason.kind, message = %reason.message, "connect failed");
                let _ = state_tx.send(ConnectionState::Failed(reason));
            }
            Err(_elapsed) => {
                let reason = FailureReason::transient(format!(
                    "connect timed out after {:?}",
                    config.connect_timeout
                ));
                warn!(message = %reason.message, "connect failed");
                let _ = state_tx.send(ConnectionState::Failed(reason));
            }
        }
    }
}

/// Serve an established connection. Returns `None` on deliberate
/// disconnect, `Some(reason)` on failure.
async fn serve(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    config: &TransportConfig,
    event_tx: &mpsc::Sender<Envelope>,
    command_rx: &mut mpsc::Receiver<TransportCommand>,
) -> Option<FailureReason> {
    let (mut sink, mut stream) = ws.split();

    // Identify ourselves before anything else.
    let hello = Envelope::new(
        SYSTEM_CHANNEL,
        client_events::HELLO,
        serde_json::json!({ "userId": config.user_id }),
    );
    if send_frame(&mut sink, &hello).await.is_err() {
        return Some(FailureReason::transient("failed to send hello"));
    }

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately; the hello above already covers it.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(TransportCommand::Send(envelope)) => {
                    if send_frame(&mut sink, &envelope).await.is_err() {
                        return Some(FailureReason::transient("write failed"));
                    }
                }
                Some(TransportCommand::Disconnect) => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return None;
                }
                Some(TransportCommand::Connect) => {} // already connected
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return None;
                }
            },
            _ = heartbeat.tick() => {
                let beat = Envelope::new(SYSTEM_CHANNEL, client_events::HEARTBEAT, serde_json::json!({}));
                if send_frame(&mut sink, &beat).await.is_err() {
                    return Some(FailureReason::transient("heartbeat write failed"));
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<Envelope>(&text) {
                        Ok(envelope) => {
                            if event_tx.send(envelope).await.is_err() {
                                // Consumer gone; treat as teardown.
                                let _ = sink.send(WsMessage::Close(None)).await;
                                return None;
                            }
                        }
                        Err(e) => debug!(error = %e, "unrecognized frame from relay"),
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = sink.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Some(FailureReason::transient("connection closed by relay"));
                }
                Some(Err(e)) => {
                    return Some(FailureReason::transient(format!("websocket error: {e}")));
                }
                _ => {}
            }
        }
    }
}

async fn send_frame(sink: &mut WsSink, envelope: &Envelope) -> Result<(), WsError> {
    let json = serde_json::to_string(envelope).map_err(|e| {
        WsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    sink.send(WsMessage::Text(json.into())).await
}

/// A handshake rejected with an HTTP client error means the relay
/// refused us for a configuration reason (bad or missing API key);
/// everything else is retryable.
fn classify_connect_error(error: &WsError) -> FailureReason {
    match error {
        WsError::Http(response) if response.status().is_client_error() => FailureReason::config(
            format!("relay rejected connection: HTTP {}", response.status()),
        ),
        other => FailureReason::transient(format!("connect failed: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureKind;
    use tokio_tungstenite::tungstenite::http::{Response, StatusCode};

    #[test]
    fn http_403_is_config_failure() {
        let mut response = Response::new(None);
        *response.status_mut() = StatusCode::FORBIDDEN;
        let reason = classify_connect_error(&WsError::Http(response));
        assert_eq!(reason.kind, FailureKind::Config);
        assert!(reason.message.contains("403"));
    }

    #[test]
    fn io_error_is_transient() {
        let err = WsError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        let reason = classify_connect_error(&err);
        assert_eq!(reason.kind, FailureKind::Transient);
    }

    #[test]
    fn server_error_is_transient() {
        let mut response = Response::new(None);
        *response.status_mut() = StatusCode::BAD_GATEWAY;
        let reason = classify_connect_error(&WsError::Http(response));
        assert_eq!(reason.kind, FailureKind::Transient);
    }
}
