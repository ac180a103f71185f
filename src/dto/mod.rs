//! Wire-level payloads exchanged with the State Store's broadcast service.

pub mod wire;
