//! # Rangedist
//!
//! Range-partitioned distributed collections for SPMD programs.
//!
//! A global index space is split into contiguous chunks spread over a fixed
//! team of places. Each collection tracks chunk ownership with a
//! [`LocationManager`], relocates chunks through batched byte exchanges
//! driven by a [`MoveManager`], and may keep read-only mirrors of remote
//! ranges ([`CachableChunkedList`]).
//!
//! Every place runs the same program. Collective calls (`sync`, `update`,
//! `allreduce`, ...) must be issued by every place, the same number of
//! times and in the same order.

pub mod cache;
pub mod chunk;
pub mod config;
pub mod context;
pub mod dist;
pub mod distribution;
pub mod error;
pub mod location;
pub mod range;
pub mod registry;
pub mod relocation;
pub mod team;
pub mod wire;

// Re-export main types for convenience
pub use cache::{CachableChunkedList, Mirror};
pub use chunk::{Chunk, ChunkedList, Product, RangedList, RangedSlice, SquareChunk};
pub use config::DistConfig;
pub use context::PlaceContext;
pub use dist::{DistChunkedList, DistMap, Element};
pub use distribution::{DistributionSnapshot, MapDistribution, RangedDistribution};
pub use error::{DistError, Result};
pub use location::{LocationManager, Provenance};
pub use range::{Interval, Rectangle};
pub use relocation::{CollectiveMoveManager, MoveManager, OneSidedMoveManager};
pub use team::{run_places, LocalTeam, Place, Team};
