//! Background services and the session facade.

pub mod expiry;
pub mod poller;
pub mod reconciler;
pub mod screener;
pub mod transport;
