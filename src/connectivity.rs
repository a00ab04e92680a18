//! Connectivity monitor: current reachability plus ordered transition events.
//!
//! The platform's reachability signal is fed in through [`ConnectivityMonitor::set_online`];
//! the monitor never probes the network itself. Subscribers receive every
//! transition in occurrence order through their own unbounded channel.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

struct Inner {
    online: AtomicBool,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, mpsc::UnboundedSender<ConnectivityEvent>)>>,
}

#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ConnectivityEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next transition; `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<ConnectivityEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ConnectivityEvent> {
        self.rx.try_recv().ok()
    }
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                online: AtomicBool::new(initially_online),
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Record the platform signal. Emits an event only when the state changes.
    pub fn set_online(&self, online: bool) {
        // hold the lock across swap and fan-out so events keep occurrence order
        let mut subs = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if self.inner.online.swap(online, Ordering::SeqCst) == online {
            return;
        }
        let event = if online {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        };
        info!(?event, "connectivity changed");
        subs.retain(|(_, tx)| tx.send(event).is_ok());
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((id, tx));
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|(sid, _)| *sid != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }
}
