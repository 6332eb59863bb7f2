use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::options::ConnectOptions;
use crate::transport::{subscription_channel, Subscription, Transport};

const SUBSCRIPTION_CAPACITY: usize = 1024;

/// In-memory bus for tests and simulations.
///
/// Published payloads are captured and also delivered to local subscribers
/// of the exact subject, one subscriber per queue group.
#[derive(Debug)]
pub struct InMemoryTransport {
    endpoint: String,
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    connected: bool,
    fail_start: bool,
    start_calls: Vec<ConnectOptions>,
    close_calls: usize,
    published: Vec<(String, Bytes)>,
    failing_subjects: HashSet<String>,
    stalled_subjects: HashSet<String>,
    subscribers: Vec<MemorySubscriber>,
}

#[derive(Debug)]
struct MemorySubscriber {
    subject: String,
    queue_group: String,
    tx: mpsc::Sender<Bytes>,
}

impl InMemoryTransport {
    /// Creates a transport that reports `endpoint` once started.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every option set `start` was called with, oldest first.
    pub fn start_calls(&self) -> Vec<ConnectOptions> {
        self.lock().start_calls.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    /// Publishes captured so far, in call order.
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.lock().published.clone()
    }

    /// Drains and returns the captured publishes.
    pub fn take_published(&self) -> Vec<(String, Bytes)> {
        std::mem::take(&mut self.lock().published)
    }

    /// Subjects with a live subscriber, with their queue groups.
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        self.lock()
            .subscribers
            .iter()
            .filter(|s| !s.tx.is_closed())
            .map(|s| (s.subject.clone(), s.queue_group.clone()))
            .collect()
    }

    /// Makes every subsequent publish to `subject` fail.
    pub fn fail_publish_to(&self, subject: impl Into<String>) {
        self.lock().failing_subjects.insert(subject.into());
    }

    /// Makes every subsequent publish to `subject` hang forever, like a
    /// server that stopped reading.
    pub fn stall_publish_to(&self, subject: impl Into<String>) {
        self.lock().stalled_subjects.insert(subject.into());
    }

    /// Makes the next `start` calls fail.
    pub fn set_fail_start(&self, fail: bool) {
        self.lock().fail_start = fail;
    }

    /// Simulates a dropped session; `connected_server` goes back to `None`.
    pub fn disconnect(&self) {
        self.lock().connected = false;
    }

    /// Delivers `payload` to local subscribers of `subject` as if another
    /// client had published it. Returns the number of deliveries.
    pub fn inject(&self, subject: &str, payload: impl Into<Bytes>) -> usize {
        let mut state = self.lock();
        deliver(&mut state, subject, payload.into())
    }
}

fn deliver(state: &mut MemoryState, subject: &str, payload: Bytes) -> usize {
    state.subscribers.retain(|s| !s.tx.is_closed());
    let mut served_groups = HashSet::new();
    let mut delivered = 0_usize;
    for sub in state.subscribers.iter().filter(|s| s.subject == subject) {
        if !sub.queue_group.is_empty() && !served_groups.insert(sub.queue_group.clone()) {
            continue;
        }
        if sub.tx.try_send(payload.clone()).is_ok() {
            delivered += 1;
        }
    }
    delivered
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn start(&self, options: &ConnectOptions) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.start_calls.push(options.clone());
        if state.fail_start {
            return Err(TransportError::Connect("start disabled".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        let stalled = {
            let mut state = self.lock();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            if state.failing_subjects.contains(subject) {
                return Err(TransportError::Publish {
                    subject: subject.to_string(),
                    reason: "publish disabled".to_string(),
                });
            }
            if state.stalled_subjects.contains(subject) {
                true
            } else {
                state.published.push((subject.to_string(), payload.clone()));
                deliver(&mut state, subject, payload);
                false
            }
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
    ) -> Result<Subscription, TransportError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        let (tx, subscription) = subscription_channel(subject, queue_group, SUBSCRIPTION_CAPACITY);
        state.subscribers.push(MemorySubscriber {
            subject: subject.to_string(),
            queue_group: queue_group.to_string(),
            tx,
        });
        Ok(subscription)
    }

    fn connected_server(&self) -> Option<String> {
        let state = self.lock();
        state.connected.then(|| self.endpoint.clone())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.close_calls += 1;
        state.connected = false;
        state.subscribers.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use std::time::Duration;

    use super::InMemoryTransport;
    use crate::error::TransportError;
    use crate::options::ConnectOptions;
    use crate::transport::Transport;

    async fn started(endpoint: &str) -> InMemoryTransport {
        let transport = InMemoryTransport::new(endpoint);
        transport
            .start(&ConnectOptions::new("n", Vec::new()))
            .await
            .expect("start");
        transport
    }

    #[tokio::test]
    async fn queue_group_receives_each_message_once() {
        let transport = started("nats1").await;
        let mut a = transport.subscribe("s", "grp").await.expect("sub a");
        let _b = transport.subscribe("s", "grp").await.expect("sub b");
        let mut solo = transport.subscribe("s", "").await.expect("sub solo");

        assert_eq!(transport.inject("s", Bytes::from_static(b"m")), 2);
        assert_eq!(a.next().await, Some(Bytes::from_static(b"m")));
        assert_eq!(solo.next().await, Some(Bytes::from_static(b"m")));
        assert_eq!(transport.inject("other", Bytes::from_static(b"m")), 0);
    }

    #[tokio::test]
    async fn failing_subject_rejects_publish_without_capturing() {
        let transport = started("nats1").await;
        transport.fail_publish_to("bad");

        let err = transport
            .publish("bad", Bytes::from_static(b"x"))
            .await
            .expect_err("should fail");
        assert!(matches!(err, TransportError::Publish { .. }));
        transport
            .publish("good", Bytes::from_static(b"x"))
            .await
            .expect("publish");

        let published = transport.take_published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "good");
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn stalled_subject_never_completes() {
        let transport = started("nats1").await;
        transport.stall_publish_to("slow");

        let stuck = tokio::time::timeout(
            Duration::from_millis(50),
            transport.publish("slow", Bytes::from_static(b"x")),
        )
        .await;
        assert!(stuck.is_err());
        assert!(transport.published().is_empty());

        transport
            .publish("fast", Bytes::from_static(b"x"))
            .await
            .expect("publish");
        assert_eq!(transport.published().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_clears_connected_server() {
        let transport = started("nats1").await;
        assert_eq!(transport.connected_server().as_deref(), Some("nats1"));
        transport.disconnect();
        assert!(transport.connected_server().is_none());
        let err = transport
            .publish("x", Bytes::new())
            .await
            .expect_err("disconnected");
        assert_eq!(err, TransportError::NotConnected);
    }

    #[tokio::test]
    async fn failed_start_is_recorded() {
        let transport = InMemoryTransport::new("nats1");
        transport.set_fail_start(true);
        assert!(transport
            .start(&ConnectOptions::new("n", Vec::new()))
            .await
            .is_err());
        assert_eq!(transport.start_calls().len(), 1);
        assert!(transport.connected_server().is_none());
    }
}
