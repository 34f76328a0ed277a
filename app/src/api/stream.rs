//! WebSocket feed of live frames.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use pcd_core::{ColorEncoding, PointCloudFrame};
use tokio::sync::mpsc;

use super::capture::FrameQuery;
use super::state::AppStateHandle;

const SUBSCRIPTION_POLL: Duration = Duration::from_millis(250);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppStateHandle>,
    Query(query): Query<FrameQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.colors))
}

fn encode(frame: &PointCloudFrame, encoding: ColorEncoding) -> Option<String> {
    match serde_json::to_string(&frame.to_message(encoding)) {
        Ok(json) => Some(json),
        Err(e) => {
            log::warn!("could not encode frame {}: {}", frame.frame_number(), e);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppStateHandle, encoding: ColorEncoding) {
    let ticket = match state.gate.clone() {
        Some(gate) => tokio::task::spawn_blocking(move || gate.join()).await.ok(),
        None => None,
    };
    log::info!("viewer connected");

    let (mut sender, mut receiver) = socket.split();
    let subscription = state.capture.cache().subscribe();

    // The subscription blocks, so it is drained on a blocking thread.
    let (tx, mut rx) = mpsc::channel::<Arc<PointCloudFrame>>(1);
    let forward = tokio::task::spawn_blocking(move || {
        while !tx.is_closed() {
            if let Some(frame) = subscription.recv_timeout(SUBSCRIPTION_POLL) {
                if tx.blocking_send(frame).is_err() {
                    break;
                }
            }
        }
    });

    let mut open = true;
    if let Some(frame) = state.capture.cache().get() {
        if let Some(json) = encode(&frame, encoding) {
            open = sender.send(Message::Text(json)).await.is_ok();
        }
    }

    while open {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if let Some(json) = encode(&frame, encoding) {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    drop(rx);
    let _ = forward.await;
    if let Some(ticket) = ticket {
        let _ = tokio::task::spawn_blocking(move || drop(ticket)).await;
    }
    log::info!("viewer disconnected");
}
