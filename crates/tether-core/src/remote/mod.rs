//! Bundled [`RemoteService`](crate::sync::RemoteService) implementations

mod dir;
mod http;
mod log;
mod memory;

pub use dir::DirRemote;
pub use http::{classify_status, HttpRemote};
pub use memory::{MemoryRemote, PushGate};
