//! Ensemble Core Library
//!
//! Treats a homogeneous collection of dataset-like objects as one object:
//! attribute reads and method calls on the ensemble fan out to every
//! member, and the per-member results are recast into a list, a shared
//! object list or a new ensemble.
//!
//! ## Layer 1 - Dispatch
//!
//! - `Ensemble`: id-indexed member container
//! - `dispatch`: collective method calls with argument expansion
//! - `recast`: result shape classification
//! - `parallel`: `ExecutionBackend` and the default `BlockingPool`
//! - `batch`: one loader call per expanded argument set

pub mod batch;
pub mod dispatch;
pub mod ensemble;
pub mod error;
pub mod fakes;
pub mod member;
pub mod metrics;
pub mod obs;
pub mod parallel;
pub mod recast;
pub mod telemetry;

pub use ensemble_expand::{
    expand_arguments, to_arg_map, ArgMap, ExpandError, Expansion, OuterSlot, ProductMode,
};
pub use serde_json::Value;

pub use batch::{BatchLoad, BatchOptions, Loaded};
pub use dispatch::{distribute_positional, BoundDispatcher, CallArgs, Dispatch};
pub use ensemble::{
    Ensemble, EnsembleOptions, MemberRef, Selection, Selector, RESERVED_NAMES,
};
pub use error::{EnsembleError, ErrorKind, Result};
pub use member::{
    id_of, Attribute, Item, Member, TypeDescriptor, TypeRegistry, DEFAULT_ID_KEY, PARENT_ID_KEY,
};
pub use parallel::{
    BlockingPool, Completed, CompletionCallback, ExecutionBackend, InlineBackend, ParallelConfig,
    WorkUnit,
};
pub use recast::{recast, Recast, RecastContext};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
