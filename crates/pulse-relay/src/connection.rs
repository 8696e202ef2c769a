//! Per-connection handler: upgrade, hello, then envelope dispatch.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use pulse_common::wire::{client_events, server_events, SYSTEM_CHANNEL};
use pulse_common::Envelope;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::registry::{presence_diff, ConnId, Registry};

/// Handle a single client connection from TCP accept to cleanup.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn: ConnId,
    registry: Registry,
    api_key: Option<String>,
) {
    // Reject the upgrade outright when the API key does not match; the
    // client classifies the 403 as a permanent configuration failure.
    let check_key = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if let Some(required) = &api_key {
            let expected = format!("apikey={required}");
            let ok = req
                .uri()
                .query()
                .map(|q| q.split('&').any(|pair| pair == expected))
                .unwrap_or(false);
            if !ok {
                let mut reject = ErrorResponse::new(Some("invalid or missing api key".into()));
                *reject.status_mut() = StatusCode::FORBIDDEN;
                return Err(reject);
            }
        }
        Ok(resp)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_key).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(peer = %addr, error = %e, "WS handshake failed");
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();

    // First frame must be a hello on the system channel.
    let user_id = match read_hello(&mut stream, addr).await {
        Some(id) => id,
        None => return,
    };
    info!(peer = %addr, conn, user = %user_id, "client connected");

    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    loop {
        tokio::select! {
            // Envelopes routed to this client (broadcasts, diffs).
            Some(envelope) = rx.recv() => {
                if send_envelope(&mut sink, &envelope).await.is_err() {
                    break;
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<Envelope>(&text) {
                        Ok(envelope) => {
                            if let Some(reply) =
                                dispatch(&envelope, conn, &registry, &tx).await
                            {
                                if send_envelope(&mut sink, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            debug!(peer = %addr, error = %e, "unparseable frame");
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(peer = %addr, error = %e, "WS error");
                    break;
                }
                _ => {}
            }
        }
    }

    // Disconnect implies untrack: broadcast a leave diff everywhere the
    // client had tracked presence.
    info!(peer = %addr, conn, user = %user_id, "client disconnected");
    for (channel, meta) in registry.drop_connection(conn).await {
        registry
            .broadcast(&channel, presence_diff(&channel, vec![], vec![meta]), None)
            .await;
    }
}

/// Dispatch one client envelope. Returns a direct reply, if any.
async fn dispatch(
    envelope: &Envelope,
    conn: ConnId,
    registry: &Registry,
    tx: &mpsc::UnboundedSender<Envelope>,
) -> Option<Envelope> {
    match envelope.event.as_str() {
        client_events::JOIN => {
            registry.join(&envelope.channel, conn, tx.clone()).await;
            Some(envelope.reply(server_events::JOINED, serde_json::json!({})))
        }
        client_events::LEAVE => {
            if let Some(meta) = registry.leave(&envelope.channel, conn).await {
                registry
                    .broadcast(
                        &envelope.channel,
                        presence_diff(&envelope.channel, vec![], vec![meta]),
                        None,
                    )
                    .await;
            }
            Some(envelope.reply(server_events::LEFT, serde_json::json!({})))
        }
        client_events::PUBLISH => {
            if !registry.is_subscribed(&envelope.channel, conn).await {
                return Some(error_reply(envelope, "not subscribed"));
            }
            // Fan out to everyone but the publisher.
            let delivery = Envelope::new(
                &envelope.channel,
                server_events::EVENT,
                envelope.payload.clone(),
            );
            registry
                .broadcast(&envelope.channel, delivery, Some(conn))
                .await;
            None
        }
        client_events::TRACK => {
            if !registry
                .track(&envelope.channel, conn, envelope.payload.clone())
                .await
            {
                return Some(error_reply(envelope, "not subscribed"));
            }
            registry
                .broadcast(
                    &envelope.channel,
                    presence_diff(&envelope.channel, vec![envelope.payload.clone()], vec![]),
                    None,
                )
                .await;
            None
        }
        client_events::UNTRACK => {
            if let Some(meta) = registry.untrack(&envelope.channel, conn).await {
                registry
                    .broadcast(
                        &envelope.channel,
                        presence_diff(&envelope.channel, vec![], vec![meta]),
                        None,
                    )
                    .await;
            }
            None
        }
        client_events::SYNC => {
            let members = registry.members(&envelope.channel).await;
            Some(envelope.reply(
                server_events::PRESENCE,
                serde_json::json!({ "members": members }),
            ))
        }
        client_events::HEARTBEAT => {
            Some(envelope.reply(server_events::PONG, serde_json::json!({})))
        }
        client_events::HELLO => None, // repeated hello is harmless
        other => {
            debug!(event = %other, "unknown client event");
            Some(error_reply(envelope, "unknown event"))
        }
    }
}

fn error_reply(envelope: &Envelope, reason: &str) -> Envelope {
    envelope.reply(server_events::ERROR, serde_json::json!({ "reason": reason }))
}

/// Read and parse the first frame as a hello. Returns the user id.
async fn read_hello(
    stream: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
    addr: SocketAddr,
) -> Option<String> {
    let frame = tokio::time::timeout(std::time::Duration::from_secs(10), stream.next()).await;

    match frame {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<Envelope>(&text) {
            Ok(envelope)
                if envelope.channel == SYSTEM_CHANNEL
                    && envelope.event == client_events::HELLO =>
            {
                envelope
                    .payload
                    .get("userId")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .or_else(|| {
                        warn!(peer = %addr, "hello without userId");
                        None
                    })
            }
            Ok(_) => {
                warn!(peer = %addr, "expected hello as first frame");
                None
            }
            Err(e) => {
                warn!(peer = %addr, error = %e, "invalid hello frame");
                None
            }
        },
        Ok(Some(Ok(_))) => {
            warn!(peer = %addr, "expected text hello, got binary");
            None
        }
        Ok(Some(Err(e))) => {
            warn!(peer = %addr, error = %e, "WS error during hello");
            None
        }
        Ok(None) => {
            debug!(peer = %addr, "connection closed before hello");
            None
        }
        Err(_) => {
            warn!(peer = %addr, "hello timeout (10s)");
            None
        }
    }
}

async fn send_envelope(
    sink: &mut futures_util::stream::SplitSink<WebSocketStream<TcpStream>, Message>,
    envelope: &Envelope,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    match serde_json::to_string(envelope) {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "failed to encode envelope");
            Ok(())
        }
    }
}
