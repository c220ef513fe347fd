//! In-memory data structures backing the command handlers: the TTL'd
//! keyspace, lists, the skip-list sorted set, plain sets, the geospatial
//! index, and the command ring buffer that feeds the core loop.

pub mod geo;
pub mod geohash;
pub mod list;
pub mod ring;
pub mod set;
pub mod skiplist;
pub mod ttl_map;

pub use geo::{GeoHit, GeoIndex};
pub use list::List;
pub use ring::CircularBuffer;
pub use set::Set;
pub use skiplist::{Insert, SortedSet};
pub use ttl_map::TtlMap;
