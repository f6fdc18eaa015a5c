use std::{collections::BTreeSet, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{credentials::TokenFactory, models::ItemId, settings::FeedSettings};

use super::{
    bus::{EventBus, EventFilter, EventHandler, HandlerToken},
    events::{ChannelEvent, ClientFrame},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("realtime channel is already running")]
    AlreadyRunning,
    #[error("realtime connection task failed: {0}")]
    TaskFailed(String),
}

/// Group intent plus the outbound queue of the live connection, guarded together
/// so a join issued during reconnect is either replayed or sent, never both lost.
#[derive(Default)]
struct Registry {
    groups: BTreeSet<ItemId>,
    outbound: Option<mpsc::UnboundedSender<ClientFrame>>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ChannelInner {
    url: String,
    token_factory: TokenFactory,
    settings: FeedSettings,
    registry: Mutex<Registry>,
    bus: EventBus,
    state_tx: watch::Sender<ConnectionState>,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

/// The one persistent hub connection of a feed session.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
}

impl RealtimeChannel {
    pub fn new(settings: &FeedSettings, token_factory: TokenFactory) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ChannelInner {
                url: settings.realtime_url.clone(),
                token_factory,
                settings: settings.clone(),
                registry: Mutex::new(Registry::default()),
                bus: EventBus::new(),
                state_tx,
                worker: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn on_event(&self, filter: EventFilter, handler: EventHandler) -> HandlerToken {
        self.inner.bus.on(filter, handler)
    }

    pub fn off(&self, token: HandlerToken) -> bool {
        self.inner.bus.off(token)
    }

    /// Items whose groups are joined, or will be joined once connected.
    pub fn subscriptions(&self) -> Vec<ItemId> {
        self.inner.registry.lock().groups.iter().cloned().collect()
    }

    pub async fn connect(&self) -> Result<(), ChannelError> {
        let mut worker = self.inner.worker.lock().await;
        if worker.is_some() {
            return Err(ChannelError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_connection(self.inner.clone(), cancel.clone()));
        *worker = Some(Worker { cancel, handle });
        Ok(())
    }

    /// Terminal teardown: closes the socket and drops every group subscription.
    pub async fn disconnect(&self) -> Result<(), ChannelError> {
        let worker = self.inner.worker.lock().await.take();
        let result = match worker {
            Some(Worker { cancel, handle }) => {
                cancel.cancel();
                handle
                    .await
                    .map_err(|err| ChannelError::TaskFailed(err.to_string()))
            }
            None => Ok(()),
        };

        {
            let mut registry = self.inner.registry.lock();
            registry.groups.clear();
            registry.outbound = None;
        }
        self.inner
            .state_tx
            .send_replace(ConnectionState::Disconnected);
        result
    }

    /// Join the item's group. Returns whether the join went out immediately;
    /// otherwise the intent is kept and replayed when the connection comes up.
    pub fn subscribe(&self, item_id: &ItemId) -> bool {
        let mut registry = self.inner.registry.lock();
        registry.groups.insert(item_id.clone());

        match &registry.outbound {
            Some(outbound) => outbound
                .send(ClientFrame::JoinGroup {
                    item_id: item_id.clone(),
                })
                .is_ok(),
            None => {
                log_warn!("Realtime channel not connected; join for item {item_id} deferred");
                false
            }
        }
    }

    pub fn unsubscribe(&self, item_id: &ItemId) -> bool {
        let mut registry = self.inner.registry.lock();
        if !registry.groups.remove(item_id) {
            return false;
        }

        if let Some(outbound) = &registry.outbound {
            let _ = outbound.send(ClientFrame::LeaveGroup {
                item_id: item_id.clone(),
            });
        }
        true
    }

    /// Join the item's group and route its events to `handler` until the
    /// returned subscription is released or dropped.
    pub fn watch_item(&self, item_id: ItemId, handler: EventHandler) -> ItemSubscription {
        let token = self.on_event(EventFilter::Item(item_id.clone()), handler);
        self.subscribe(&item_id);
        ItemSubscription {
            channel: self.clone(),
            item_id,
            token: Some(token),
        }
    }
}

/// A (connection, item) pairing. Leaves the group and detaches its handler on drop.
pub struct ItemSubscription {
    channel: RealtimeChannel,
    item_id: ItemId,
    token: Option<HandlerToken>,
}

impl ItemSubscription {
    pub fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    pub fn release(self) {}
}

impl Drop for ItemSubscription {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.channel.off(token);
            self.channel.unsubscribe(&self.item_id);
        }
    }
}

fn connection_url(base: &str, token: Option<String>) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("invalid realtime url '{base}'"))?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("access_token", &token);
    }
    Ok(url)
}

fn backoff(settings: &FeedSettings, attempt: usize) -> Duration {
    let delay = settings.reconnect_delay(attempt);
    let quarter = (delay.as_millis() / 4) as u64;
    if quarter == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=quarter))
}

async fn run_connection(inner: Arc<ChannelInner>, cancel: CancellationToken) {
    let mut attempt: usize = 0;
    let mut ever_connected = false;

    loop {
        inner.state_tx.send_replace(if ever_connected {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        // Re-read on every attempt so a refreshed credential is picked up.
        let token = (inner.token_factory)();
        match connection_url(&inner.url, token) {
            Ok(url) => {
                let connecting = time::timeout(
                    Duration::from_secs(CONNECT_TIMEOUT_SECS),
                    connect_async(url.as_str()),
                );
                let result = tokio::select! {
                    result = connecting => result,
                    _ = cancel.cancelled() => break,
                };

                match result {
                    Ok(Ok((stream, _response))) => {
                        log_info!("Realtime channel connected to {}", inner.url);
                        attempt = 0;
                        ever_connected = true;
                        if pump(&inner, stream, &cancel).await {
                            break;
                        }
                        log_warn!("Realtime connection dropped; reconnecting");
                    }
                    Ok(Err(err)) => log_warn!("Realtime connect failed: {err}"),
                    Err(_) => log_warn!(
                        "Realtime connect timeout (> {}s)",
                        CONNECT_TIMEOUT_SECS
                    ),
                }
            }
            Err(err) => log_error!("{err:#}"),
        }

        let delay = backoff(&inner.settings, attempt);
        attempt = attempt.saturating_add(1);
        inner.state_tx.send_replace(ConnectionState::Reconnecting);
        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = cancel.cancelled() => break,
        }
    }

    inner.registry.lock().outbound = None;
    inner
        .state_tx
        .send_replace(ConnectionState::Disconnected);
    log_info!("Realtime channel shut down");
}

/// Drive one live connection. Returns `true` when it ended by cancellation.
async fn pump(
    inner: &ChannelInner,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    cancel: &CancellationToken,
) -> bool {
    let (mut sink, mut source) = stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

    let rejoin: Vec<ItemId> = {
        let mut registry = inner.registry.lock();
        registry.outbound = Some(outbound_tx.clone());
        registry.groups.iter().cloned().collect()
    };
    for item_id in rejoin {
        let _ = outbound_tx.send(ClientFrame::JoinGroup { item_id });
    }
    drop(outbound_tx);
    inner.state_tx.send_replace(ConnectionState::Connected);

    let cancelled = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break true;
            }
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break false };
                match serde_json::to_string(&frame) {
                    Ok(text) => {
                        if let Err(err) = sink.send(Message::Text(text)).await {
                            log_warn!("Realtime send failed: {err}");
                            break false;
                        }
                    }
                    Err(err) => log_error!("Failed to encode {frame:?}: {err}"),
                }
            }
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => handle_frame(inner, &text),
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break false;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    log_warn!("Realtime server closed the connection: {frame:?}");
                    break false;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    log_warn!("Realtime receive failed: {err}");
                    break false;
                }
                None => break false,
            }
        }
    };

    inner.registry.lock().outbound = None;
    cancelled
}

fn handle_frame(inner: &ChannelInner, text: &str) {
    match serde_json::from_str::<ChannelEvent>(text) {
        Ok(event) => {
            let delivered = inner.bus.dispatch(&event);
            log_debug!(
                "Realtime {:?} for item {} delivered to {delivered} handler(s)",
                event.kind(),
                event.item_id()
            );
        }
        Err(err) => log_debug!("Ignoring unrecognised realtime frame: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    const WAIT: Duration = Duration::from_secs(5);

    async fn accept_one(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
        let (stream, _) = listener.accept().await.unwrap();
        let uri = Arc::new(Mutex::new(String::new()));
        let captured = uri.clone();
        let ws = tokio_tungstenite::accept_hdr_async(
            stream,
            move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                *captured.lock() = request.uri().to_string();
                Ok(response)
            },
        )
        .await
        .unwrap();
        let uri = uri.lock().clone();
        (ws, uri)
    }

    async fn next_client_frame(ws: &mut WebSocketStream<TcpStream>) -> ClientFrame {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    fn settings_for(addr: std::net::SocketAddr) -> FeedSettings {
        FeedSettings {
            realtime_url: format!("ws://{addr}/hubs/feed"),
            reconnect_delays_ms: vec![0],
            ..FeedSettings::default()
        }
    }

    #[tokio::test]
    async fn subscription_intent_is_kept_until_connected() {
        let channel = RealtimeChannel::new(&FeedSettings::default(), Credentials::new().token_factory());

        assert!(!channel.subscribe(&ItemId::from(1)));
        let subscription = channel.watch_item(ItemId::from(2), Arc::new(|_: &ChannelEvent| {}));
        assert_eq!(channel.subscriptions(), vec![ItemId::from(1), ItemId::from(2)]);

        subscription.release();
        assert!(channel.unsubscribe(&ItemId::from(1)));
        assert!(channel.subscriptions().is_empty());
        assert_eq!(channel.inner.bus.handler_count(), 0);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn token_travels_as_query_parameter() {
        let url = connection_url("ws://localhost:5000/hubs/feed", Some("a b".into())).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:5000/hubs/feed?access_token=a+b");

        let anonymous = connection_url("ws://localhost:5000/hubs/feed", None).unwrap();
        assert_eq!(anonymous.query(), None);
    }

    #[tokio::test]
    async fn joins_deferred_groups_and_routes_item_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let settings = settings_for(listener.local_addr().unwrap());
        let credentials = Credentials::with_token("tok-1");
        let channel = RealtimeChannel::new(&settings, credentials.token_factory());

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let _subscription = channel.watch_item(
            ItemId::from(42),
            Arc::new(move |event: &ChannelEvent| {
                let _ = event_tx.send(event.clone());
            }),
        );

        let server = tokio::spawn(async move {
            let (mut ws, uri) = accept_one(&listener).await;
            let join = next_client_frame(&mut ws).await;
            ws.send(Message::Text(
                r#"{"type":"likeCountUpdated","itemId":43,"count":1}"#.into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(
                r#"{"type":"likeCountUpdated","itemId":42,"count":7}"#.into(),
            ))
            .await
            .unwrap();
            (uri, join, ws)
        });

        channel.connect().await.unwrap();
        assert!(matches!(channel.connect().await, Err(ChannelError::AlreadyRunning)));

        let (uri, join, _ws) = time::timeout(WAIT, server).await.unwrap().unwrap();
        assert!(uri.contains("access_token=tok-1"), "uri was {uri}");
        assert_eq!(join, ClientFrame::JoinGroup { item_id: ItemId::from(42) });

        let event = time::timeout(WAIT, event_rx.recv()).await.unwrap().unwrap();
        assert_eq!(
            event,
            ChannelEvent::LikeCountUpdated {
                item_id: ItemId::from(42),
                count: 7,
                liked_by_viewer: None,
            }
        );

        channel.disconnect().await.unwrap();
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(channel.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn reconnect_rejoins_groups_with_a_fresh_token() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let settings = settings_for(listener.local_addr().unwrap());

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let factory: TokenFactory = Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Some(format!("tok-{n}"))
        });
        let channel = RealtimeChannel::new(&settings, factory);
        channel.subscribe(&ItemId::from(7));

        let server = tokio::spawn(async move {
            let (mut first, first_uri) = accept_one(&listener).await;
            let first_join = next_client_frame(&mut first).await;
            drop(first);

            let (mut second, second_uri) = accept_one(&listener).await;
            let second_join = next_client_frame(&mut second).await;
            (first_uri, first_join, second_uri, second_join, second)
        });

        channel.connect().await.unwrap();
        let (first_uri, first_join, second_uri, second_join, _ws) =
            time::timeout(WAIT, server).await.unwrap().unwrap();

        assert!(first_uri.contains("access_token=tok-1"));
        assert!(second_uri.contains("access_token=tok-2"));
        assert_eq!(first_join, ClientFrame::JoinGroup { item_id: ItemId::from(7) });
        assert_eq!(second_join, first_join);

        channel.disconnect().await.unwrap();
    }
}
