//! Edit session hub.
//!
//! Serializes concurrent patches to a single note across many streaming
//! clients, performs optimistic version control against the store, and fans
//! committed updates out to every connected peer — including peers attached
//! to a different process instance, via the keyed edit bus. The hub holds no
//! global state beyond its local session registry.

mod bus;
mod frames;
mod hub;
mod redis_bus;
mod session;

pub use bus::LocalBus;
pub use frames::{
    note_channel, ClientFrame, ErrorData, InitData, PatchData, ServerFrame, UpdateData,
    UpdateEvent, CLOSE_INTERNAL, CLOSE_NOT_FOUND, CLOSE_POLICY, CLOSE_QUOTA, CLOSE_SLOW_CONSUMER,
};
pub use hub::{EditHub, EditSession};
pub use redis_bus::RedisBus;
pub use session::{DeliverError, SessionHandle, SessionRegistry};
