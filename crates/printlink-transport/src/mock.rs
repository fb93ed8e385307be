//! In-memory transport for tests.
//!
//! [`MockTransport`] hands out connections whose far end is controlled
//! through a [`MockLink`]: tests push inbound frames, hang up, inject
//! errors, and inspect everything the session wrote.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::traits::{Connection, Endpoint, Transport, TransportError};

/// How the simulated printer behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Every written frame is sent straight back.
    Echo,
    /// Accepts writes, never answers on its own.
    Silent,
    /// Refuses to open with the given reason.
    Refuse(String),
}

#[derive(Debug)]
enum Inbound {
    Frame(String),
    HangUp,
    Fail(String),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Test double implementing [`Transport`].
#[derive(Debug)]
pub struct MockTransport {
    behavior: MockBehavior,
    open_delay: Option<Duration>,
    attempts: AtomicUsize,
    links: Mutex<Vec<MockLink>>,
}

impl MockTransport {
    /// Create a transport with the given behavior.
    #[must_use]
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            open_delay: None,
            attempts: AtomicUsize::new(0),
            links: Mutex::new(Vec::new()),
        }
    }

    /// A printer that echoes every frame.
    #[must_use]
    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    /// A printer that never speaks first.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(MockBehavior::Silent)
    }

    /// A printer that refuses connections.
    #[must_use]
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self::new(MockBehavior::Refuse(reason.into()))
    }

    /// Delay every open by `delay`.
    #[must_use]
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Number of `open` calls so far, successful or not.
    #[must_use]
    pub fn open_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// All links opened so far, oldest first.
    #[must_use]
    pub fn links(&self) -> Vec<MockLink> {
        lock(&self.links).clone()
    }

    /// The most recently opened link.
    #[must_use]
    pub fn last_link(&self) -> Option<MockLink> {
        lock(&self.links).last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        if let MockBehavior::Refuse(reason) = &self.behavior {
            debug!(endpoint = %endpoint, "Mock open refused");
            return Err(TransportError::ConnectFailed(reason.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let link = MockLink {
            endpoint: endpoint.clone(),
            inbound: tx.clone(),
            written: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        lock(&self.links).push(link.clone());

        debug!(endpoint = %endpoint, "Mock link opened");
        Ok(Box::new(MockConnection {
            echo: self.behavior == MockBehavior::Echo,
            loopback: tx,
            inbound: rx,
            written: link.written,
            closed: link.closed,
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Far end of a mock connection.
#[derive(Debug, Clone)]
pub struct MockLink {
    endpoint: Endpoint,
    inbound: mpsc::UnboundedSender<Inbound>,
    written: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockLink {
    /// Endpoint the session opened.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Deliver a frame to the session.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.inbound.send(Inbound::Frame(text.into()));
    }

    /// Close the link from the printer side.
    pub fn hang_up(&self) {
        let _ = self.inbound.send(Inbound::HangUp);
    }

    /// Make the next receive fail.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.inbound.send(Inbound::Fail(reason.into()));
    }

    /// Every frame the session wrote, in order.
    #[must_use]
    pub fn written(&self) -> Vec<String> {
        lock(&self.written).clone()
    }

    /// Whether the session closed its end.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockConnection {
    echo: bool,
    loopback: mpsc::UnboundedSender<Inbound>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    written: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        match self.inbound.recv().await {
            Some(Inbound::Frame(text)) => Ok(Some(text)),
            Some(Inbound::Fail(reason)) => Err(TransportError::ReceiveFailed(reason)),
            Some(Inbound::HangUp) | None => {
                self.closed.store(true, Ordering::SeqCst);
                Ok(None)
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        lock(&self.written).push(text.clone());
        if self.echo {
            let _ = self.loopback.send(Inbound::Frame(text));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("mock".to_string())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_link() {
        let transport = MockTransport::echo();
        let mut conn = transport.open(&Endpoint::new("127.0.0.1", 9999)).await.unwrap();

        conn.send("hello".to_string()).await.unwrap();
        assert_eq!(conn.recv().await.unwrap().as_deref(), Some("hello"));

        let link = transport.last_link().unwrap();
        assert_eq!(link.written(), vec!["hello"]);
        assert_eq!(link.endpoint().port, 9999);
    }

    #[tokio::test]
    async fn test_silent_link_push_and_hang_up() {
        let transport = MockTransport::silent();
        let mut conn = transport.open(&Endpoint::new("h", 1)).await.unwrap();
        let link = transport.last_link().unwrap();

        conn.send("x".to_string()).await.unwrap();
        link.push("from printer");
        link.fail("reset");
        link.hang_up();

        assert_eq!(conn.recv().await.unwrap().as_deref(), Some("from printer"));
        assert!(matches!(conn.recv().await, Err(TransportError::ReceiveFailed(_))));
        assert!(conn.recv().await.unwrap().is_none());
        assert!(link.is_closed());
    }

    #[tokio::test]
    async fn test_refusing_transport() {
        let transport = MockTransport::refusing("connection refused");
        let result = transport.open(&Endpoint::new("h", 1)).await;

        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
        assert_eq!(transport.open_attempts(), 1);
        assert!(transport.links().is_empty());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let transport = MockTransport::silent();
        let mut conn = transport.open(&Endpoint::new("h", 1)).await.unwrap();

        conn.close().await.unwrap();
        assert!(!conn.is_open());
        assert!(matches!(
            conn.send("x".to_string()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
