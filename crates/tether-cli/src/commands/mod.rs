pub mod common;
pub mod export;
pub mod items;
pub mod notes;
pub mod sync;
pub mod watch;
