//! # Data Model
//!
//! Clean DTOs shared by every pipeline stage: graph entities and values as
//! returned by drivers, plus the pipeline's own values (schema snapshots,
//! context fragments, candidate queries).
//!
//! Design rule: this module is pure data with no I/O or async.

pub mod node;
pub mod relationship;
pub mod value;
pub mod property_map;
pub mod schema;
pub mod fragment;
pub mod query;

pub use node::{Node, NodeId};
pub use relationship::{Relationship, RelId};
pub use value::Value;
pub use property_map::{PropertyMap, props};
pub use schema::{SchemaSnapshot, SchemaSnapshotBuilder, ConnectionPattern};
pub use fragment::{ContextFragment, Evidence, FragmentKey, FragmentSource};
pub use query::{CandidateQuery, RejectReason, ValidationStatus};
