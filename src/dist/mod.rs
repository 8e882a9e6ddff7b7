//! Distributed collections: local storage plus a location manager, relocated
//! through the move managers.

mod chunked;
mod map;

pub use chunked::DistChunkedList;
pub use map::DistMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Values a distributed collection can store and ship.
pub trait Element: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Element for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Wire operations of the distributed collections.
pub(crate) mod ops {
    pub const MOVE_CHUNKS: u16 = 0;
    pub const MOVE_ENTRIES: u16 = 1;
    pub const SHARE_CHUNKS: u16 = 2;
}
