//! Push channels. Each socket is registered with a hub and receives JSON
//! snapshots; inbound frames other than close are ignored.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::fmt::Debug;
use std::hash::Hash;
use tracing::{debug, info, warn};

use super::AppState;
use crate::application::actors::subscriber_hub::{HubHandle, SubscriberSink};
use crate::auth::AccountIdentity;
use crate::domain::errors::ConnectionError;

/// Outbound half of a WebSocket
pub struct WsSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl SubscriberSink for WsSink {
    async fn push(&mut self, payload: String) -> Result<(), ConnectionError> {
        self.sender
            .send(Message::Text(payload))
            .await
            .map_err(|e| ConnectionError::PushFailed(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sender.send(Message::Close(None)).await {
            debug!("Close frame not delivered: {}", e);
        }
        if let Err(e) = self.sender.close().await {
            debug!("Socket close failed: {}", e);
        }
    }
}

pub async fn dashboard_stream(
    ws: WebSocketUpgrade,
    identity: AccountIdentity,
    State(state): State<AppState>,
) -> Response {
    let hub = state.dashboard_hub.clone();
    let account_id = identity.account_id();
    ws.on_upgrade(move |socket| serve_subscriber(socket, hub, account_id))
}

/// Unknown symbols are refused before the upgrade.
pub async fn market_stream(
    ws: WebSocketUpgrade,
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let symbol = symbol.trim().to_uppercase();
    let lookup = state.service.market_snapshot(&symbol).await;
    if !lookup.success {
        return lookup.into_response();
    }

    let hub = state.market_hub.clone();
    ws.on_upgrade(move |socket| serve_subscriber(socket, hub, symbol))
}

async fn serve_subscriber<K>(socket: WebSocket, hub: HubHandle<K>, key: K)
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    let (sender, mut receiver) = socket.split();

    let id = match hub.register(key.clone(), Box::new(WsSink { sender })).await {
        Ok(id) => id,
        Err(e) => {
            warn!("Could not register subscriber for {:?}: {}", key, e);
            return;
        }
    };
    info!("Subscriber {} connected for {:?}", id, key);

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(_) => debug!("Ignoring inbound frame from subscriber {}", id),
            Err(e) => {
                debug!("Subscriber {} read error: {}", id, e);
                break;
            }
        }
    }

    hub.unregister(id).await;
    info!("Subscriber {} disconnected", id);
}
