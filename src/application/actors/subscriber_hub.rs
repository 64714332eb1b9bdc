//! Subscriber Hub Actor
//!
//! Fan-out of JSON snapshots to live connections. One hub task owns the
//! subscriber set; everything else talks to it through [`HubHandle`]:
//! - `Register` adds a connection and pushes one snapshot to it alone
//! - `Unregister` removes and closes a connection (idempotent)
//! - a [`BroadcastTrigger`] makes the hub rebuild and push to everyone
//!
//! Triggers never block the producer and coalesce while a round is running.
//! Queued commands are always handled before a pending trigger, so a connection
//! registered before the trigger fired receives that round.

use crate::domain::errors::{ConnectionError, SnapshotError};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Builds the snapshot a subscriber with a given key receives.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Snapshot: Serialize + Send;

    async fn snapshot(&self, key: &Self::Key) -> Result<Self::Snapshot, SnapshotError>;
}

/// Outbound half of one connection.
#[async_trait]
pub trait SubscriberSink: Send + 'static {
    async fn push(&mut self, payload: String) -> Result<(), ConnectionError>;

    async fn close(&mut self);
}

/// Messages that can be sent to a hub
pub enum HubMessage<K> {
    Register {
        id: ConnectionId,
        key: K,
        sink: Box<dyn SubscriberSink>,
    },
    Unregister {
        id: ConnectionId,
    },
    SubscriberCount {
        reply: mpsc::Sender<usize>,
    },
    /// Closes every connection and stops the hub
    Shutdown,
}

/// Non-blocking broadcast signal. Fires while a round is in flight collapse
/// into one more round.
#[derive(Clone, Default)]
pub struct BroadcastTrigger {
    notify: Arc<Notify>,
}

impl BroadcastTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.notify.notify_one();
    }

    /// Resolves on the next fire, or immediately if one is pending.
    pub async fn fired(&self) {
        self.notify.notified().await;
    }
}

struct Subscriber<K> {
    key: K,
    sink: Box<dyn SubscriberSink>,
}

/// Hub state, owned by the hub task.
pub struct SubscriberHub<S: SnapshotSource> {
    name: String,
    source: Arc<S>,
    subscribers: HashMap<ConnectionId, Subscriber<S::Key>>,
    push_timeout: Duration,
}

impl<S: SnapshotSource> SubscriberHub<S> {
    pub fn new(name: &str, source: S, push_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            source: Arc::new(source),
            subscribers: HashMap::new(),
            push_timeout,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<HubMessage<S::Key>>, trigger: BroadcastTrigger) {
        info!("{} hub started", self.name);

        loop {
            tokio::select! {
                biased;

                msg = rx.recv() => {
                    match msg {
                        Some(HubMessage::Shutdown) => {
                            info!("{} hub shutting down", self.name);
                            break;
                        }
                        Some(msg) => self.handle(msg).await,
                        None => {
                            debug!("{} hub channel closed", self.name);
                            break;
                        }
                    }
                }

                _ = trigger.fired() => {
                    self.broadcast().await;
                }
            }
        }

        let remaining: Vec<(ConnectionId, Subscriber<S::Key>)> = self.subscribers.drain().collect();
        close_all(&self.name, remaining, self.push_timeout).await;
        info!("{} hub stopped", self.name);
    }

    async fn handle(&mut self, msg: HubMessage<S::Key>) {
        match msg {
            HubMessage::Register { id, key, sink } => self.register(id, key, sink).await,
            HubMessage::Unregister { id } => self.unregister(id).await,
            HubMessage::SubscriberCount { reply } => {
                if let Err(e) = reply.send(self.subscribers.len()).await {
                    warn!("{} hub: failed to reply with subscriber count: {}", self.name, e);
                }
            }
            HubMessage::Shutdown => {}
        }
    }

    async fn register(&mut self, id: ConnectionId, key: S::Key, mut sink: Box<dyn SubscriberSink>) {
        match render(self.source.as_ref(), &self.name, &key).await {
            Some(payload) => {
                if let Err(e) = push_with_timeout(sink.as_mut(), payload, self.push_timeout).await {
                    warn!(
                        "{} hub: initial push to connection {} failed: {}",
                        self.name, id, e
                    );
                    close_with_timeout(&self.name, id, sink.as_mut(), self.push_timeout).await;
                    return;
                }
            }
            None => {
                warn!(
                    "{} hub: no initial snapshot for connection {} ({:?})",
                    self.name, id, key
                );
            }
        }

        debug!("{} hub: registered connection {} for {:?}", self.name, id, key);
        self.subscribers.insert(id, Subscriber { key, sink });
    }

    async fn unregister(&mut self, id: ConnectionId) {
        match self.subscribers.remove(&id) {
            Some(mut subscriber) => {
                close_with_timeout(&self.name, id, subscriber.sink.as_mut(), self.push_timeout)
                    .await;
                debug!("{} hub: unregistered connection {}", self.name, id);
            }
            None => debug!("{} hub: connection {} already gone", self.name, id),
        }
    }

    async fn broadcast(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }

        let keys: Vec<S::Key> = self.subscribers.values().map(|s| s.key.clone()).collect();
        let mut payloads: HashMap<S::Key, Option<String>> = HashMap::new();
        for key in keys {
            if !payloads.contains_key(&key) {
                let payload = render(self.source.as_ref(), &self.name, &key).await;
                payloads.insert(key, payload);
            }
        }

        let timeout = self.push_timeout;
        let pushes = self.subscribers.iter_mut().filter_map(|(id, subscriber)| {
            let payload = payloads.get(&subscriber.key).cloned().flatten()?;
            let id = *id;
            Some(async move {
                let result = push_with_timeout(subscriber.sink.as_mut(), payload, timeout).await;
                (id, result)
            })
        });
        let results = join_all(pushes).await;

        let failed: Vec<ConnectionId> = results
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    warn!("{} hub: push to connection {} failed: {}", self.name, id, e);
                    Some(id)
                }
            })
            .collect();

        let dropped: Vec<(ConnectionId, Subscriber<S::Key>)> = failed
            .iter()
            .filter_map(|id| self.subscribers.remove(id).map(|s| (*id, s)))
            .collect();
        close_all(&self.name, dropped, timeout).await;

        debug!(
            "{} hub: broadcast to {} subscriber(s), {} dropped",
            self.name,
            self.subscribers.len(),
            failed.len()
        );
    }
}

/// Snapshot for `key`, JSON encoded. Failures are logged and yield `None`.
async fn render<S: SnapshotSource>(source: &S, hub: &str, key: &S::Key) -> Option<String> {
    let snapshot = match source.snapshot(key).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("{} hub: snapshot for {:?} failed: {}", hub, key, e);
            return None;
        }
    };
    match serde_json::to_string(&snapshot) {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!("{} hub: failed to encode snapshot for {:?}: {}", hub, key, e);
            None
        }
    }
}

/// Closes `sink`, giving up after `timeout` so a stalled peer cannot hold the
/// hub loop.
async fn close_with_timeout(
    hub: &str,
    id: ConnectionId,
    sink: &mut dyn SubscriberSink,
    timeout: Duration,
) {
    if tokio::time::timeout(timeout, sink.close()).await.is_err() {
        warn!("{} hub: close of connection {} timed out, dropping it", hub, id);
    }
}

async fn close_all<K>(hub: &str, subscribers: Vec<(ConnectionId, Subscriber<K>)>, timeout: Duration) {
    let closes = subscribers.into_iter().map(|(id, mut subscriber)| async move {
        close_with_timeout(hub, id, subscriber.sink.as_mut(), timeout).await;
    });
    join_all(closes).await;
}

async fn push_with_timeout(
    sink: &mut dyn SubscriberSink,
    payload: String,
    timeout: Duration,
) -> Result<(), ConnectionError> {
    match tokio::time::timeout(timeout, sink.push(payload)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Timeout),
    }
}

/// Cloneable handle to a running hub.
pub struct HubHandle<K> {
    name: String,
    tx: mpsc::Sender<HubMessage<K>>,
    trigger: BroadcastTrigger,
}

impl<K> Clone for HubHandle<K> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            trigger: self.trigger.clone(),
        }
    }
}

impl<K: Clone + Eq + Hash + Debug + Send + Sync + 'static> HubHandle<K> {
    /// Spawn a hub task for `source`
    pub fn spawn<S>(name: &str, source: S, capacity: usize, push_timeout: Duration) -> Self
    where
        S: SnapshotSource<Key = K>,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let trigger = BroadcastTrigger::new();
        let hub = SubscriberHub::new(name, source, push_timeout);

        let loop_trigger = trigger.clone();
        tokio::spawn(async move {
            hub.run(rx, loop_trigger).await;
        });

        info!("{} hub spawned", name);
        Self {
            name: name.to_string(),
            tx,
            trigger,
        }
    }

    pub fn trigger(&self) -> BroadcastTrigger {
        self.trigger.clone()
    }

    /// Queues a registration and returns the id to unregister with.
    pub async fn register(
        &self,
        key: K,
        sink: Box<dyn SubscriberSink>,
    ) -> Result<ConnectionId, ConnectionError> {
        let id = next_connection_id();
        self.tx
            .send(HubMessage::Register { id, key, sink })
            .await
            .map_err(|_| ConnectionError::Closed)?;
        Ok(id)
    }

    pub async fn unregister(&self, id: ConnectionId) {
        if self.tx.send(HubMessage::Unregister { id }).await.is_err() {
            debug!("{} hub gone before unregistering {}", self.name, id);
        }
    }

    pub async fn subscriber_count(&self) -> Option<usize> {
        let (reply, mut rx) = mpsc::channel(1);
        self.tx
            .send(HubMessage::SubscriberCount { reply })
            .await
            .ok()?;
        rx.recv().await
    }

    pub async fn shutdown(&self) {
        if self.tx.send(HubMessage::Shutdown).await.is_err() {
            debug!("{} hub already stopped", self.name);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::time::sleep;

    #[derive(Serialize)]
    struct Counter {
        key: String,
        round: usize,
    }

    /// Snapshot is the number of snapshots built so far for any key.
    #[derive(Default)]
    struct CountingSource {
        builds: AtomicUsize,
        missing: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SnapshotSource for Arc<CountingSource> {
        type Key = String;
        type Snapshot = Counter;

        async fn snapshot(&self, key: &String) -> Result<Counter, SnapshotError> {
            if self.missing.lock().unwrap().contains(key) {
                return Err(SnapshotError::InstrumentNotFound {
                    symbol: key.clone(),
                });
            }
            let round = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Counter {
                key: key.clone(),
                round,
            })
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Behaviour {
        Ok,
        Fail,
        Hang,
        /// Hangs in push and in close, like a peer that stopped reading
        Stall,
    }

    struct ChannelSink {
        tx: mpsc::UnboundedSender<String>,
        closes: Arc<AtomicUsize>,
        behaviour: Arc<Mutex<Behaviour>>,
    }

    #[async_trait]
    impl SubscriberSink for ChannelSink {
        async fn push(&mut self, payload: String) -> Result<(), ConnectionError> {
            let behaviour = *self.behaviour.lock().unwrap();
            match behaviour {
                Behaviour::Ok => self
                    .tx
                    .send(payload)
                    .map_err(|e| ConnectionError::PushFailed(e.to_string())),
                Behaviour::Fail => Err(ConnectionError::PushFailed("broken pipe".to_string())),
                Behaviour::Hang | Behaviour::Stall => {
                    sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if *self.behaviour.lock().unwrap() == Behaviour::Stall {
                sleep(Duration::from_secs(3600)).await;
            }
        }
    }

    struct Tap {
        rx: mpsc::UnboundedReceiver<String>,
        closes: Arc<AtomicUsize>,
        behaviour: Arc<Mutex<Behaviour>>,
    }

    impl Tap {
        fn set(&self, behaviour: Behaviour) {
            *self.behaviour.lock().unwrap() = behaviour;
        }

        async fn next(&mut self) -> serde_json::Value {
            let payload = tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
                .await
                .expect("timed out waiting for push")
                .expect("sink dropped");
            serde_json::from_str(&payload).unwrap()
        }
    }

    fn sink() -> (Box<dyn SubscriberSink>, Tap) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closes = Arc::new(AtomicUsize::new(0));
        let behaviour = Arc::new(Mutex::new(Behaviour::Ok));
        (
            Box::new(ChannelSink {
                tx,
                closes: closes.clone(),
                behaviour: behaviour.clone(),
            }),
            Tap {
                rx,
                closes,
                behaviour,
            },
        )
    }

    fn spawn_hub(timeout: Duration) -> (HubHandle<String>, Arc<CountingSource>) {
        let source = Arc::new(CountingSource::default());
        let hub = HubHandle::spawn("test", source.clone(), 16, timeout);
        (hub, source)
    }

    #[tokio::test]
    async fn test_register_pushes_initial_snapshot() {
        let (hub, _source) = spawn_hub(Duration::from_secs(1));
        let (sink, mut tap) = sink();

        hub.register("ACME".to_string(), sink).await.unwrap();

        let first = tap.next().await;
        assert_eq!(first["key"], "ACME");
        assert_eq!(first["round"], 1);
        assert_eq!(hub.subscriber_count().await, Some(1));
    }

    #[tokio::test]
    async fn test_registration_before_trigger_gets_that_round() {
        let (hub, _source) = spawn_hub(Duration::from_secs(1));
        let (sink, mut tap) = sink();

        hub.register("ACME".to_string(), sink).await.unwrap();
        hub.trigger().fire();

        let initial = tap.next().await;
        let broadcast = tap.next().await;
        assert_eq!(initial["round"], 1);
        assert_eq!(broadcast["round"], 2);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_key() {
        let (hub, _source) = spawn_hub(Duration::from_secs(1));
        let (a, mut tap_a) = sink();
        let (b, mut tap_b) = sink();
        let (c, mut tap_c) = sink();

        hub.register("AAA".to_string(), a).await.unwrap();
        hub.register("BBB".to_string(), b).await.unwrap();
        hub.register("AAA".to_string(), c).await.unwrap();
        tap_a.next().await;
        tap_b.next().await;
        tap_c.next().await;

        hub.trigger().fire();

        let from_a = tap_a.next().await;
        let from_b = tap_b.next().await;
        let from_c = tap_c.next().await;
        assert_eq!(from_a["key"], "AAA");
        assert_eq!(from_b["key"], "BBB");
        // One build per key per round
        assert_eq!(from_a["round"], from_c["round"]);
    }

    #[tokio::test]
    async fn test_unregister_twice_closes_once() {
        let (hub, _source) = spawn_hub(Duration::from_secs(1));
        let (sink, mut tap) = sink();

        let id = hub.register("ACME".to_string(), sink).await.unwrap();
        tap.next().await;

        hub.unregister(id).await;
        hub.unregister(id).await;

        assert_eq!(hub.subscriber_count().await, Some(0));
        assert_eq!(tap.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_push_drops_only_that_subscriber() {
        let (hub, _source) = spawn_hub(Duration::from_secs(1));
        let (good, mut good_tap) = sink();
        let (bad, mut bad_tap) = sink();

        hub.register("ACME".to_string(), good).await.unwrap();
        hub.register("ACME".to_string(), bad).await.unwrap();
        good_tap.next().await;
        bad_tap.next().await;

        bad_tap.set(Behaviour::Fail);
        hub.trigger().fire();

        good_tap.next().await;
        assert_eq!(hub.subscriber_count().await, Some(1));
        assert_eq!(bad_tap.closes.load(Ordering::SeqCst), 1);
        assert_eq!(good_tap.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_times_out() {
        let (hub, _source) = spawn_hub(Duration::from_millis(50));
        let (fast, mut fast_tap) = sink();
        let (slow, mut slow_tap) = sink();

        hub.register("ACME".to_string(), fast).await.unwrap();
        hub.register("ACME".to_string(), slow).await.unwrap();
        fast_tap.next().await;
        slow_tap.next().await;

        slow_tap.set(Behaviour::Hang);
        hub.trigger().fire();

        fast_tap.next().await;
        assert_eq!(hub.subscriber_count().await, Some(1));
        assert_eq!(slow_tap.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stalled_close_does_not_block_the_hub() {
        let (hub, _source) = spawn_hub(Duration::from_millis(50));
        let (healthy, mut healthy_tap) = sink();
        let (stalled, mut stalled_tap) = sink();

        hub.register("ACME".to_string(), healthy).await.unwrap();
        hub.register("ACME".to_string(), stalled).await.unwrap();
        healthy_tap.next().await;
        stalled_tap.next().await;

        stalled_tap.set(Behaviour::Stall);
        hub.trigger().fire();
        healthy_tap.next().await;

        hub.trigger().fire();
        let second = healthy_tap.next().await;
        assert_eq!(second["key"], "ACME");

        let count = tokio::time::timeout(Duration::from_secs(1), hub.subscriber_count())
            .await
            .expect("hub stopped answering");
        assert_eq!(count, Some(1));
        assert_eq!(stalled_tap.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stalled_unregister_and_shutdown_finish() {
        let (hub, _source) = spawn_hub(Duration::from_millis(50));
        let (a, mut tap_a) = sink();
        let (b, mut tap_b) = sink();

        let id = hub.register("AAA".to_string(), a).await.unwrap();
        hub.register("BBB".to_string(), b).await.unwrap();
        tap_a.next().await;
        tap_b.next().await;

        tap_a.set(Behaviour::Stall);
        hub.unregister(id).await;
        let count = tokio::time::timeout(Duration::from_secs(1), hub.subscriber_count())
            .await
            .expect("hub stopped answering");
        assert_eq!(count, Some(1));

        tap_b.set(Behaviour::Stall);
        hub.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while !hub.is_closed() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("hub did not stop");
        assert_eq!(tap_b.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_initial_push_is_not_registered() {
        let (hub, _source) = spawn_hub(Duration::from_secs(1));
        let (sink, tap) = sink();
        tap.set(Behaviour::Fail);

        hub.register("ACME".to_string(), sink).await.unwrap();

        assert_eq!(hub.subscriber_count().await, Some(0));
        assert_eq!(tap.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_snapshot_failure_keeps_subscriber() {
        let (hub, source) = spawn_hub(Duration::from_secs(1));
        let (sink, mut tap) = sink();

        hub.register("ACME".to_string(), sink).await.unwrap();
        tap.next().await;

        source.missing.lock().unwrap().push("ACME".to_string());
        hub.trigger().fire();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.subscriber_count().await, Some(1));

        source.missing.lock().unwrap().clear();
        hub.trigger().fire();
        let next = tap.next().await;
        assert_eq!(next["key"], "ACME");
        assert_eq!(tap.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_triggers_coalesce() {
        let (hub, source) = spawn_hub(Duration::from_secs(1));
        let (sink, mut tap) = sink();
        hub.register("ACME".to_string(), sink).await.unwrap();
        tap.next().await;

        for _ in 0..50 {
            hub.trigger().fire();
        }
        tap.next().await;
        sleep(Duration::from_millis(100)).await;

        // Initial push plus at most two rounds for fifty fires
        assert!(source.builds.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everyone() {
        let (hub, _source) = spawn_hub(Duration::from_secs(1));
        let (a, mut tap_a) = sink();
        let (b, mut tap_b) = sink();
        hub.register("AAA".to_string(), a).await.unwrap();
        hub.register("BBB".to_string(), b).await.unwrap();
        tap_a.next().await;
        tap_b.next().await;

        hub.shutdown().await;
        sleep(Duration::from_millis(100)).await;

        assert!(hub.is_closed());
        assert_eq!(tap_a.closes.load(Ordering::SeqCst), 1);
        assert_eq!(tap_b.closes.load(Ordering::SeqCst), 1);
        assert_eq!(hub.subscriber_count().await, None);
    }
}
