//! In-memory State Store backend.
//!
//! Backs tests and demo wiring with the same trait surface as the HTTP
//! client. Writes can be made to fail on demand so write-failure semantics
//! are testable without a network.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use reqwest::StatusCode;

use crate::state::{
    buzzer::BuzzerSignal,
    call_line::CallLine,
    chat::ChatMessage,
    epoch_ms,
    studio::{BuzzerDirection, StudioId},
};

use super::{
    StateStore,
    error::{StoreError, StoreResult},
};

/// [`StateStore`] holding everything in process memory.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    buzzers: DashMap<(StudioId, BuzzerDirection), BuzzerSignal>,
    lines: DashMap<(StudioId, u8), CallLine>,
    chats: DashMap<StudioId, Vec<ChatMessage>>,
    fail_writes: AtomicBool,
}

impl MemoryStateStore {
    /// Fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a 503 until re-enabled.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Seed a line snapshot directly, bypassing the write-failure toggle.
    pub fn seed_line(&self, snapshot: CallLine) {
        self.inner
            .lines
            .insert((snapshot.studio.clone(), snapshot.line), snapshot);
    }

    /// Seed chat history directly.
    pub fn seed_chat(&self, studio: StudioId, messages: Vec<ChatMessage>) {
        self.inner.chats.insert(studio, messages);
    }

    /// Backdate a stored buzzer so its expiry deadline has already passed.
    pub fn expire_buzzer(&self, studio: &StudioId, direction: BuzzerDirection) {
        if let Some(mut entry) = self.inner.buzzers.get_mut(&(studio.clone(), direction)) {
            entry.activated_at = entry.activated_at.map(|at| at - 60_000);
            entry.expires_at = entry.expires_at.map(|at| at - 60_000);
        }
    }

    /// Messages currently stored for a studio.
    pub fn chat_len(&self, studio: &StudioId) -> usize {
        self.inner
            .chats
            .get(studio)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    fn check_writable(&self, path: &str) -> StoreResult<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::RequestStatus {
                path: path.to_string(),
                status: StatusCode::SERVICE_UNAVAILABLE,
            })
        } else {
            Ok(())
        }
    }
}

impl StateStore for MemoryStateStore {
    fn fetch_buzzer(
        &self,
        studio: StudioId,
        direction: BuzzerDirection,
    ) -> BoxFuture<'static, StoreResult<BuzzerSignal>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .buzzers
                .get(&(studio.clone(), direction))
                .map(|entry| entry.value().clone())
                .unwrap_or_else(|| BuzzerSignal::inactive(studio, direction)))
        })
    }

    fn fetch_lines(&self, studio: StudioId) -> BoxFuture<'static, StoreResult<Vec<CallLine>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut lines: Vec<CallLine> = store
                .inner
                .lines
                .iter()
                .filter(|entry| entry.key().0 == studio)
                .map(|entry| entry.value().clone())
                .collect();
            lines.sort_by_key(|line| line.line);
            Ok(lines)
        })
    }

    fn fetch_chat(&self, studio: StudioId) -> BoxFuture<'static, StoreResult<Vec<ChatMessage>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .chats
                .get(&studio)
                .map(|entry| entry.value().clone())
                .unwrap_or_default())
        })
    }

    fn write_buzzer(
        &self,
        studio: StudioId,
        direction: BuzzerDirection,
        active: bool,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_writable("buzzer")?;
            let signal = if active {
                BuzzerSignal::active_at(studio.clone(), direction, epoch_ms(), 10_000)
            } else {
                BuzzerSignal::inactive(studio.clone(), direction)
            };
            store.inner.buzzers.insert((studio, direction), signal);
            Ok(())
        })
    }

    fn write_line(&self, snapshot: CallLine) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_writable("lines")?;
            store
                .inner
                .lines
                .insert((snapshot.studio.clone(), snapshot.line), snapshot);
            Ok(())
        })
    }

    fn append_chat(&self, message: ChatMessage) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_writable("chat")?;
            store
                .inner
                .chats
                .entry(message.studio.clone())
                .or_default()
                .push(message);
            Ok(())
        })
    }

    fn clear_chat(&self, studio: StudioId) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_writable("chat")?;
            store.inner.chats.remove(&studio);
            Ok(())
        })
    }
}
