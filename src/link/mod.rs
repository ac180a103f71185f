//! Push channel to the State Store's broadcast service.
//!
//! The engine treats the push path as an accelerator, never a requirement:
//! every failure here is recoverable (reconnect with backoff) or absorbable
//! (the polling fallback keeps running regardless).

pub mod memory;
pub mod sse;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::dto::wire::WireFrame;

/// Convenient result alias returning [`LinkError`] failures.
pub type LinkResult<T> = Result<T, LinkError>;

/// Failures that can occur on the push channel. All of them are non-fatal.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The broadcast service could not be reached.
    #[error("failed to reach the broadcast service")]
    Connect {
        /// Underlying transport failure.
        #[source]
        source: reqwest::Error,
    },
    /// The broadcast service refused the session.
    #[error("broadcast service rejected the session: {status}")]
    Rejected {
        /// Returned status.
        status: reqwest::StatusCode,
    },
    /// The event stream broke mid-session.
    #[error("push event stream failed")]
    Stream {
        /// Underlying transport failure.
        #[source]
        source: reqwest::Error,
    },
    /// A pushed frame could not be decoded.
    #[error("failed to decode pushed frame")]
    Decode {
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
    /// The broadcast service is not accepting sessions right now.
    #[error("broadcast service unavailable")]
    Unavailable,
    /// The session has been closed.
    #[error("push session closed")]
    Closed,
}

/// A live, authenticated push session.
///
/// Reading and writing are decoupled through channels fed by background
/// tasks, so a stalled write can never block inbound delivery (and vice
/// versa). Dropping the session tears both tasks down.
pub struct LinkSession {
    inbound: mpsc::Receiver<WireFrame>,
    outbound: mpsc::UnboundedSender<WireFrame>,
    tasks: Vec<JoinHandle<()>>,
}

impl LinkSession {
    /// Assemble a session from its channel halves and background tasks.
    pub fn new(
        inbound: mpsc::Receiver<WireFrame>,
        outbound: mpsc::UnboundedSender<WireFrame>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            inbound,
            outbound,
            tasks,
        }
    }

    /// Queue a frame for delivery to the broadcast service.
    pub fn send(&self, frame: WireFrame) -> LinkResult<()> {
        self.outbound.send(frame).map_err(|_| LinkError::Closed)
    }

    /// Next pushed frame, or `None` once the session has ended.
    pub async fn next_frame(&mut self) -> Option<WireFrame> {
        self.inbound.recv().await
    }
}

impl Drop for LinkSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Connection factory for the push channel.
pub trait BroadcastLink: Send + Sync {
    /// Open an authenticated session against the broadcast service.
    ///
    /// `auth` must be a [`WireFrame::Auth`] carrying the client's role,
    /// studio scope, and cleared chat watermarks.
    fn connect(&self, auth: WireFrame) -> BoxFuture<'static, LinkResult<LinkSession>>;
}
