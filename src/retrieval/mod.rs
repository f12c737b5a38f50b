//! # Hybrid Retrieval
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Seed extraction | `entities` | `Seed` values named by the question |
//! | Structural | `graph` | fragments within `max_hops` of the seeds |
//! | Fusion | `hybrid` | structural + semantic fragments, one ranking |

pub mod entities;
pub mod graph;
pub mod hybrid;

pub use entities::{Seed, extract_seeds};
pub use graph::GraphContextRetriever;
pub use hybrid::{HybridRetriever, Retrieval, fuse};
