//! Range algebra: one-dimensional [`Interval`]s and two-dimensional [`Rectangle`]s.

mod interval;
mod rectangle;

pub use interval::{coalesce, find_overlapping, overlapping, Interval};
pub use rectangle::Rectangle;
