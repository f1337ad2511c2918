//! Backend-agnostic ports for the Quill core.
//!
//! These traits enable dependency inversion at the seams the core does not
//! own: the relational store, the shared quota primitive, the cross-process
//! edit bus and the embedding producer. Production wires PostgreSQL and
//! Redis implementations; tests wire the in-memory ones.

mod bus;
mod embed;
mod quota;
mod store;

pub use bus::{BusSubscription, EditBus};
pub use embed::Embedder;
pub use quota::{BucketOutcome, QuotaBackend};
pub use store::{ApiKeyStore, IdentityStore, NoteStore, UsageSink};
