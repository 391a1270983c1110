//! HTTP surface. `GET <stream path>` subscribes the connection to the event stream;
//! every other request gets the fixed 404 and the connection is closed.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONNECTION, CONTENT_TYPE,
};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::registry::{ClientHandle, ClientId, ClientRegistry};

/// Events queued per subscriber before a send has to wait on the write timeout.
pub const CLIENT_QUEUE_DEPTH: usize = 4;

#[derive(Clone)]
struct StreamState {
    registry: Arc<ClientRegistry>,
}

/// Builds the router serving `stream_path`. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn router(registry: Arc<ClientRegistry>, stream_path: &str) -> Router {
    Router::new()
        .route(stream_path, get(subscribe).fallback(not_found))
        .fallback(not_found)
        .with_state(StreamState { registry })
}

async fn subscribe(
    State(state): State<StreamState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let (handle, rx) = ClientHandle::channel(CLIENT_QUEUE_DEPTH);
    let id = handle.id();
    if state.registry.add(handle) {
        info!(%peer, client = %id, clients = state.registry.len(), "client subscribed");
    } else {
        debug!(%peer, "registry closed; ending stream at once");
    }
    let subscription = Subscription {
        registry: state.registry,
        id,
        peer,
    };
    (
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
            (CONNECTION, "keep-alive"),
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Body::from_stream(event_stream(rx, subscription)),
    )
        .into_response()
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        [(CONTENT_TYPE, "text/plain"), (CONNECTION, "close")],
        "Not Found",
    )
}

/// Unregisters the client when its response body is dropped.
struct Subscription {
    registry: Arc<ClientRegistry>,
    id: ClientId,
    peer: SocketAddr,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.registry.remove(self.id).is_some() {
            debug!(peer = %self.peer, client = %self.id, "client went away");
        }
    }
}

fn event_stream(
    rx: mpsc::Receiver<Bytes>,
    subscription: Subscription,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
        let event = rx.recv().await?;
        Some((Ok(event), (rx, subscription)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[tokio::test]
    async fn stream_yields_queued_events_then_ends() {
        let registry = Arc::new(ClientRegistry::new(Duration::from_millis(100)));
        let (handle, rx) = ClientHandle::channel(CLIENT_QUEUE_DEPTH);
        let id = handle.id();
        registry.add(handle);
        let mut events = Box::pin(event_stream(
            rx,
            Subscription {
                registry: Arc::clone(&registry),
                id,
                peer: peer(),
            },
        ));

        assert_eq!(registry.broadcast(Bytes::from_static(b"data: a\n\n")).await.delivered, 1);
        assert_eq!(events.next().await.unwrap().unwrap(), "data: a\n\n");

        registry.close_all();
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_body_unregisters_the_client() {
        let registry = Arc::new(ClientRegistry::new(Duration::from_millis(100)));
        let (handle, rx) = ClientHandle::channel(CLIENT_QUEUE_DEPTH);
        let id = handle.id();
        registry.add(handle);
        let events = event_stream(
            rx,
            Subscription {
                registry: Arc::clone(&registry),
                id,
                peer: peer(),
            },
        );
        assert!(registry.contains(id));

        drop(events);
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
    }
}
