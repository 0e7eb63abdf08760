// src/live.rs
//
// WebSocket live push for the dashboard.
//
// Every client is one broadcaster subscriber. On connect the client gets the
// current link status, then one `newRecord` message per ingested record.
// Client text is logged and otherwise ignored.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::Broadcaster;
use crate::io::{ConnectionManager, ConnectionStatus};
use crate::record::SpeedRecord;

/// Record as pushed to the dashboard.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveRecord {
    pub id: i64,
    pub session_id: i64,
    pub object_no: i64,
    #[serde(rename = "speed_km_h")]
    pub speed_km_h: f64,
    #[serde(rename = "time_s")]
    pub time_s: u32,
    pub timestamp: String,
}

impl From<&SpeedRecord> for LiveRecord {
    fn from(record: &SpeedRecord) -> Self {
        LiveRecord {
            id: record.id,
            session_id: record.session_id,
            object_no: record.object_no,
            speed_km_h: record.speed,
            time_s: 0,
            timestamp: record.time.clone(),
        }
    }
}

/// Server to client message.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum LiveMessage {
    Status(ConnectionStatus),
    NewRecord(LiveRecord),
}

impl LiveMessage {
    pub fn to_json(&self) -> String {
        // Serialising these plain structs cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Accept clients until `shutdown` flips to true.
pub async fn serve(
    listener: TcpListener,
    broadcaster: Arc<Broadcaster>,
    connection: Arc<ConnectionManager>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        tlog!("[live] Listening on ws://{}", addr);
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let broadcaster = broadcaster.clone();
                    let status = connection.status();
                    tokio::spawn(handle_client(stream, peer, broadcaster, status));
                }
                Err(e) => {
                    tlog!("[live] Accept failed: {}", e);
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tlog!("[live] Stopped accepting clients");
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    broadcaster: Arc<Broadcaster>,
    status: ConnectionStatus,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tlog!("[live] Handshake with {} failed: {}", peer, e);
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    let mut subscription = broadcaster.subscribe();
    tlog!(
        "[live] Client {} connected. Total clients: {}",
        peer,
        broadcaster.subscriber_count()
    );

    let hello = LiveMessage::Status(status).to_json();
    if sink.send(Message::text(hello)).await.is_err() {
        broadcaster.unsubscribe(subscription.id);
        return;
    }

    loop {
        tokio::select! {
            record = subscription.rx.recv() => {
                let Some(record) = record else { break };
                let msg = LiveMessage::NewRecord(LiveRecord::from(record.as_ref())).to_json();
                if let Err(e) = sink.send(Message::text(msg)).await {
                    tlog!("[live] Send to {} failed: {}", peer, e);
                    break;
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    tlog!("[live] Message from {}: {}", peer, text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tlog!("[live] Client {} error: {}", peer, e);
                    break;
                }
            }
        }
    }

    broadcaster.unsubscribe(subscription.id);
    tlog!(
        "[live] Client {} disconnected. Total clients: {}",
        peer,
        broadcaster.subscriber_count()
    );
}
