//! Embedding producer port.

/// Maps text to a fixed-dimension vector.
///
/// Implementations must be deterministic, pure and thread-safe; the index
/// normalizes the output to unit length before storing it. Changing the
/// dimension invalidates existing snapshots.
pub trait Embedder: Send + Sync {
    /// Fixed output dimension for the life of the process
    fn dimension(&self) -> usize;

    /// Embed a text; the returned vector has `dimension()` components.
    fn embed(&self, text: &str) -> Vec<f32>;
}
