//! # Team
//!
//! The fixed group of places a program runs on, and the byte-level
//! operations the relocation machinery needs from it:
//!
//! - **Collectives** (`barrier`, `all_to_all`, `all_to_all_v`, `all_gather`,
//!   `broadcast`, `gather`) must be called by every place, in the same
//!   order, before any of them returns.
//! - **Point-to-point posts** (`post`, `next_posted`, `acknowledge`,
//!   `poll_delivered`) involve only a sender and one receiver and back the
//!   one-sided move manager.
//!
//! [`LocalTeam`] implements both over in-process channels, one thread per
//! place.

mod local;

pub use local::{run_places, LocalTeam};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One participant of a team, numbered `0..size`.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Place(pub u32);

impl Place {
    pub fn new(index: usize) -> Self {
        Place(index as u32)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one post; acknowledgements are routed back by ticket.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticket {
    pub origin: Place,
    pub seq: u64,
}

/// A point-to-point payload waiting at its destination.
#[derive(Debug, Clone)]
pub struct Posted {
    pub source: Place,
    pub ticket: Ticket,
    pub bytes: Vec<u8>,
}

/// Outcome reported by the receiver of a post.
pub type Delivery = std::result::Result<(), String>;

/// Byte transport over a fixed group of places.
pub trait Team: Send + Sync {
    /// The calling place.
    fn place(&self) -> Place;

    /// Number of places in the group.
    fn size(&self) -> usize;

    fn barrier(&self) -> Result<()>;

    /// Send `send[p]` to every place `p`; returns the value each place sent here.
    fn all_to_all(&self, send: &[u64]) -> Result<Vec<u64>>;

    /// Send `send[p]` to every place `p`. `recv_sizes[p]` is the number of
    /// bytes place `p` announced for this place.
    fn all_to_all_v(&self, send: Vec<Vec<u8>>, recv_sizes: &[u64]) -> Result<Vec<Vec<u8>>>;

    /// Every place's contribution, in place order.
    fn all_gather(&self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>>;

    /// `root` supplies `Some(bytes)`; every place returns them.
    fn broadcast(&self, root: Place, bytes: Option<Vec<u8>>) -> Result<Vec<u8>>;

    /// Every place's contribution at `root`, `None` elsewhere.
    fn gather(&self, root: Place, bytes: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>>;

    /// Queue `bytes` at `dest` without waiting for it to be processed.
    fn post(&self, dest: Place, bytes: Vec<u8>) -> Result<Ticket>;

    /// Next payload posted to this place, waiting at most `timeout`.
    fn next_posted(&self, timeout: Duration) -> Result<Option<Posted>>;

    /// Report the outcome of processing `posted` back to its sender.
    fn acknowledge(&self, posted: &Posted, outcome: Delivery) -> Result<()>;

    /// Outcome of a post made by this place, waiting at most `timeout` for it.
    fn poll_delivered(&self, ticket: Ticket, timeout: Duration) -> Result<Option<Delivery>>;
}

/// All places of a team, in order.
pub fn places(team: &dyn Team) -> impl Iterator<Item = Place> {
    (0..team.size()).map(Place::new)
}
