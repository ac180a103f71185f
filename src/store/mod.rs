//! Client for the authoritative State Store.

pub mod error;
pub mod http;
pub mod memory;

use futures::future::BoxFuture;

use crate::state::{
    buzzer::BuzzerSignal,
    call_line::CallLine,
    chat::ChatMessage,
    studio::{BuzzerDirection, StudioId},
};

use self::error::StoreResult;

/// Abstraction over the State Store's REST surface.
///
/// The store owns the canonical copy of every entity and serializes
/// concurrent writers (last-write-wins per entity by its own timestamp); the
/// engine never attempts conflict resolution beyond re-converging on the next
/// authoritative read.
pub trait StateStore: Send + Sync {
    /// Current signal for one buzzer slot.
    fn fetch_buzzer(
        &self,
        studio: StudioId,
        direction: BuzzerDirection,
    ) -> BoxFuture<'static, StoreResult<BuzzerSignal>>;

    /// Current call-line list for a studio.
    fn fetch_lines(&self, studio: StudioId) -> BoxFuture<'static, StoreResult<Vec<CallLine>>>;

    /// Full chat history for a studio.
    fn fetch_chat(&self, studio: StudioId) -> BoxFuture<'static, StoreResult<Vec<ChatMessage>>>;

    /// Activate or deactivate a buzzer slot.
    fn write_buzzer(
        &self,
        studio: StudioId,
        direction: BuzzerDirection,
        active: bool,
    ) -> BoxFuture<'static, StoreResult<()>>;

    /// Persist a call-line snapshot.
    fn write_line(&self, snapshot: CallLine) -> BoxFuture<'static, StoreResult<()>>;

    /// Append a chat message.
    fn append_chat(&self, message: ChatMessage) -> BoxFuture<'static, StoreResult<()>>;

    /// Permanently delete a studio's chat history. Best-effort: the local
    /// cleared watermark is what actually prevents resurrection.
    fn clear_chat(&self, studio: StudioId) -> BoxFuture<'static, StoreResult<()>>;
}
