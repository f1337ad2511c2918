//! Bidirectional streaming edit surface.

mod ws;

pub use ws::{note_stream, StreamQuery};
pub(crate) use ws::run_edit_socket;
