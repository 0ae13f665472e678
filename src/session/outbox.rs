//! Per-session outbound queue
//!
//! The broker pushes events through an [`Outbox`] without ever blocking; the
//! connection's writer drains the matching [`Inbox`]. A shared depth counter
//! tracks events that have been queued but not yet taken by the writer, so
//! the broker can detect a stalled reader and disconnect it instead of
//! letting the queue grow without bound.
//!
//! Dropping the [`Outbox`] closes the session. The connection observes that
//! through [`Inbox::closed`], even while events are still queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, watch};

use crate::protocol::Event;
use crate::utils::error::SessionError;

/// Creates a connected outbox/inbox pair holding at most `capacity`
/// undelivered events.
pub fn channel(capacity: usize) -> (Outbox, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (open, closed) = watch::channel(());
    let depth = Arc::new(AtomicUsize::new(0));
    (
        Outbox {
            tx,
            depth: depth.clone(),
            capacity,
            _open: open,
        },
        Inbox { rx, depth, closed },
    )
}

#[derive(Debug)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Event>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
    // never written; dropping it is the close signal
    _open: watch::Sender<()>,
}

impl Outbox {
    pub fn push(&self, event: Event) -> Result<(), SessionError> {
        if self.depth.load(Ordering::Acquire) >= self.capacity {
            return Err(SessionError::QueueFull {
                capacity: self.capacity,
            });
        }
        // counted before sending so the writer can never decrement first
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(event).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(SessionError::Disconnected);
        }
        Ok(())
    }

    /// Number of events queued but not yet taken by the writer.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiving half, owned by the connection's writer.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Event>,
    depth: Arc<AtomicUsize>,
    closed: watch::Receiver<()>,
}

impl Inbox {
    /// Waits for the next event. Returns `None` once the session has been
    /// closed by the broker and every queued event has been taken.
    pub async fn recv(&mut self) -> Option<Event> {
        let event = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(event)
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        let event = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(event)
    }

    /// Signal that resolves once the broker has closed the session, whether
    /// or not queued events remain.
    pub fn closed(&self) -> SessionClosed {
        SessionClosed(self.closed.clone())
    }
}

/// Completion signal for a session's outbound side. See [`Inbox::closed`].
#[derive(Debug, Clone)]
pub struct SessionClosed(watch::Receiver<()>);

impl SessionClosed {
    pub async fn wait(mut self) {
        while self.0.changed().await.is_ok() {}
    }

    pub fn is_closed(&self) -> bool {
        self.0.has_changed().is_err()
    }
}
