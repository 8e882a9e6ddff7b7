//! Local storage: chunks addressed by an [`Interval`](crate::range::Interval),
//! their two-dimensional analogue, lazy products and the per-collection
//! chunk set.

mod chunked_list;
mod product;
mod square;
mod storage;
mod view;

pub use chunked_list::ChunkedList;
pub use product::{Pair, Product};
pub use square::SquareChunk;
pub use storage::{Chunk, ChunkCursor};
pub use view::{Indexed, RangedList, RangedSlice};
