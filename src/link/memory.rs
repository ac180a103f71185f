//! Loopback push channel over an in-process broadcast bus.
//!
//! Stands in for the broadcast service in tests: frames published on the bus
//! reach every connected session, and frames a session sends are fanned back
//! out to all sessions (including the sender, which exercises the
//! reconciler's duplicate absorption the same way a real echoing fan-out
//! does).

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::warn;

use crate::dto::wire::WireFrame;

use super::{BroadcastLink, LinkError, LinkResult, LinkSession};

/// Capacity of the in-process fan-out bus.
const BUS_CAPACITY: usize = 64;

/// [`BroadcastLink`] backed by a process-local broadcast channel.
#[derive(Clone)]
pub struct MemoryLink {
    inner: Arc<MemoryLinkInner>,
}

struct MemoryLinkInner {
    bus: broadcast::Sender<WireFrame>,
    auths: Mutex<Vec<WireFrame>>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

impl Default for MemoryLink {
    fn default() -> Self {
        let (bus, _rx) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(MemoryLinkInner {
                bus,
                auths: Mutex::new(Vec::new()),
                refuse: AtomicBool::new(false),
                attempts: AtomicUsize::new(0),
            }),
        }
    }
}

impl MemoryLink {
    /// Fresh bus with no connected sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a frame as if the broadcast service fanned it out.
    pub fn publish(&self, frame: WireFrame) {
        let _ = self.inner.bus.send(frame);
    }

    /// Make subsequent connection attempts fail (simulates a down service).
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Auth frames observed across all connection attempts.
    pub fn auth_history(&self) -> Vec<WireFrame> {
        self.inner.auths.lock().expect("auth history lock").clone()
    }

    /// Total connection attempts, refused ones included.
    pub fn connect_attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }
}

impl BroadcastLink for MemoryLink {
    fn connect(&self, auth: WireFrame) -> BoxFuture<'static, LinkResult<LinkSession>> {
        let link = self.clone();
        Box::pin(async move {
            link.inner.attempts.fetch_add(1, Ordering::SeqCst);
            if link.inner.refuse.load(Ordering::SeqCst) {
                return Err(LinkError::Unavailable);
            }
            link.inner
                .auths
                .lock()
                .expect("auth history lock")
                .push(auth);

            let (inbound_tx, inbound_rx) = mpsc::channel(BUS_CAPACITY);
            let mut bus_stream = BroadcastStream::new(link.inner.bus.subscribe());
            let reader = tokio::spawn(async move {
                while let Some(item) = bus_stream.next().await {
                    match item {
                        Ok(frame) => {
                            if inbound_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "memory bus subscriber lagged");
                        }
                    }
                }
            });

            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireFrame>();
            let bus = link.inner.bus.clone();
            let writer = tokio::spawn(async move {
                while let Some(frame) = outbound_rx.recv().await {
                    let _ = bus.send(frame);
                }
            });

            Ok(LinkSession::new(inbound_rx, outbound_tx, vec![reader, writer]))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::studio::{BuzzerDirection, StudioId};

    fn buzz(active: bool) -> WireFrame {
        WireFrame::buzz(
            StudioId::from("studio-1"),
            BuzzerDirection::ProducerToTalent,
            active,
        )
    }

    fn auth() -> WireFrame {
        WireFrame::Auth {
            role: crate::state::studio::Role::Producer,
            studio_access: vec![StudioId::from("studio-1")],
            cleared_watermarks: Default::default(),
        }
    }

    #[tokio::test]
    async fn published_frames_reach_connected_sessions() {
        let link = MemoryLink::new();
        let mut session = link.connect(auth()).await.unwrap();

        link.publish(buzz(true));
        assert_eq!(session.next_frame().await, Some(buzz(true)));
    }

    #[tokio::test]
    async fn sent_frames_are_fanned_out_to_everyone() {
        let link = MemoryLink::new();
        let sender = link.connect(auth()).await.unwrap();
        let mut observer = link.connect(auth()).await.unwrap();

        sender.send(buzz(true)).unwrap();
        assert_eq!(observer.next_frame().await, Some(buzz(true)));
    }

    #[tokio::test]
    async fn refused_connections_report_unavailable() {
        let link = MemoryLink::new();
        link.refuse_connections(true);
        assert!(matches!(
            link.connect(auth()).await,
            Err(LinkError::Unavailable)
        ));
        link.refuse_connections(false);
        assert!(link.connect(auth()).await.is_ok());
        assert_eq!(link.auth_history().len(), 1);
    }
}
