//! Storage layer for mirage-daemon
//!
//! Fabricated resources, their embeddings, the append-only interaction
//! log, and captured login credentials.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryStorage;
pub use sqlite::SqliteStorage;
pub use traits::{InteractionStore, ResourceStore, Storage, UserStore};

/// Cosine distance between two vectors, in `[0, 2]`.
///
/// Mismatched lengths and zero-norm vectors are maximally distant rather
/// than an error; a honeypot never fails a request over a bad embedding row.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }

    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Pinned distance-to-similarity mapping: `s = 1 - d`.
///
/// Monotonically decreasing in distance, `s = 1` at zero distance. A vector
/// match is accepted iff `similarity(d) >= threshold` (default 0.8).
pub fn similarity(distance: f32) -> f32 {
    1.0 - distance
}
