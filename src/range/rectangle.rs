//! # Rectangle
//!
//! Two-dimensional index ranges: the cross product of an outer and an inner
//! [`Interval`], optionally restricted to the upper triangle
//! `inner >= outer + triangle_diff`. The triangular form halves the work of
//! symmetric pairwise interactions.

use super::Interval;
use crate::error::{DistError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::{max, min};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    outer: Interval,
    inner: Interval,
    upper_triangle: bool,
    triangle_diff: i64,
}

impl Rectangle {
    /// The full cross product `outer x inner`.
    pub const fn new(outer: Interval, inner: Interval) -> Self {
        Self {
            outer,
            inner,
            upper_triangle: false,
            triangle_diff: 0,
        }
    }

    /// Only the cells with `inner_index >= outer_index + diff`.
    pub const fn upper_triangle(outer: Interval, inner: Interval, diff: i64) -> Self {
        Self {
            outer,
            inner,
            upper_triangle: true,
            triangle_diff: diff,
        }
    }

    pub const fn outer(&self) -> Interval {
        self.outer
    }

    pub const fn inner(&self) -> Interval {
        self.inner
    }

    pub const fn is_upper_triangle(&self) -> bool {
        self.upper_triangle
    }

    pub const fn triangle_diff(&self) -> i64 {
        self.triangle_diff
    }

    /// Check whether the cell `(outer_index, inner_index)` belongs to this rectangle.
    pub fn contains(&self, outer_index: i64, inner_index: i64) -> bool {
        self.outer.contains(outer_index)
            && self.inner.contains(inner_index)
            && (!self.upper_triangle || inner_index >= outer_index + self.triangle_diff)
    }

    /// Inner indices present in row `outer_index` (empty outside the rectangle).
    pub fn row_range(&self, outer_index: i64) -> Interval {
        if !self.outer.contains(outer_index) {
            return Interval::empty_at(self.inner.from());
        }
        let from = if self.upper_triangle {
            min(
                max(self.inner.from(), outer_index + self.triangle_diff),
                self.inner.to(),
            )
        } else {
            self.inner.from()
        };
        Interval::clamped(from, self.inner.to())
    }

    /// Outer indices present in column `inner_index` (empty outside the rectangle).
    pub fn column_range(&self, inner_index: i64) -> Interval {
        if !self.inner.contains(inner_index) {
            return Interval::empty_at(self.outer.from());
        }
        let to = if self.upper_triangle {
            max(
                min(self.outer.to(), inner_index - self.triangle_diff + 1),
                self.outer.from(),
            )
        } else {
            self.outer.to()
        };
        Interval::clamped(self.outer.from(), to)
    }

    /// Exact number of cells, saturating at `u64::MAX`.
    ///
    /// For the triangular case the count is a closed form: rows whose band
    /// starts at or before `inner.from` are full, the following rows shrink
    /// by one cell each (a Gauss sum), the rest are empty.
    pub fn size(&self) -> u64 {
        if !self.upper_triangle {
            return self.outer.size().saturating_mul(self.inner.size());
        }
        self.triangle_size().unwrap_or(u64::MAX)
    }

    /// Triangular cell count, `None` when it does not fit in a `u64`.
    fn triangle_size(&self) -> Option<u64> {
        let a = i128::from(self.outer.from());
        let b = i128::from(self.outer.to());
        let d = i128::from(self.triangle_diff);
        let inner_from = i128::from(self.inner.from());
        let inner_to = i128::from(self.inner.to());
        let inner_size = inner_to - inner_from;
        if inner_size == 0 || a >= b {
            return Some(0);
        }

        // Rows o <= inner_from - d hold the whole inner interval.
        let full_end = min(b, inner_from - d + 1);
        let full_rows = max(0, full_end - a);

        // Rows inner_from - d < o < inner_to - d hold inner_to - d - o cells.
        let partial_start = max(a, inner_from - d + 1);
        let partial_end = min(b, inner_to - d);
        let partial = if partial_end > partial_start {
            let n = partial_end - partial_start;
            let t = inner_to - d;
            // First plus last row length; one of `n` and `ends` is even.
            let ends = 2 * t - partial_start - partial_end + 1;
            if n % 2 == 0 {
                (n / 2).checked_mul(ends)?
            } else {
                n.checked_mul(ends / 2)?
            }
        } else {
            0
        };

        let cells = full_rows.checked_mul(inner_size)?.checked_add(partial)?;
        u64::try_from(cells).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Check whether every cell of `other` is a cell of this rectangle.
    pub fn contains_rectangle(&self, other: &Rectangle) -> bool {
        if other.is_empty() {
            return true;
        }
        other.outer.indices().all(|o| {
            let row = other.row_range(o);
            row.is_empty()
                || (self.outer.contains(o) && self.row_range(o).contains_range(&row))
        })
    }

    /// Cells common to both rectangles, expressed on the intersected bounds.
    ///
    /// The result keeps this rectangle's triangle restriction; intersecting two
    /// triangles with different offsets keeps the tighter one.
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let outer = self.outer.intersection(&other.outer)?;
        let inner = self.inner.intersection(&other.inner)?;
        let result = match (self.upper_triangle, other.upper_triangle) {
            (false, false) => Rectangle::new(outer, inner),
            (true, false) => Rectangle::upper_triangle(outer, inner, self.triangle_diff),
            (false, true) => Rectangle::upper_triangle(outer, inner, other.triangle_diff),
            (true, true) => Rectangle::upper_triangle(
                outer,
                inner,
                max(self.triangle_diff, other.triangle_diff),
            ),
        };
        (!result.is_empty()).then_some(result)
    }

    /// Split into an `outer_parts x inner_parts` grid of contiguous blocks,
    /// dropping blocks that hold no cell.
    pub fn split(&self, outer_parts: usize, inner_parts: usize) -> Result<Vec<Rectangle>> {
        if outer_parts == 0 || inner_parts == 0 {
            return Err(DistError::IllegalState(
                "cannot split a rectangle into zero blocks".to_string(),
            ));
        }
        let mut blocks = Vec::with_capacity(outer_parts * inner_parts);
        for outer in self.outer.split(outer_parts)? {
            for inner in self.inner.split(inner_parts)? {
                let block = Rectangle {
                    outer,
                    inner,
                    upper_triangle: self.upper_triangle,
                    triangle_diff: self.triangle_diff,
                };
                if !block.is_empty() {
                    blocks.push(block);
                }
            }
        }
        Ok(blocks)
    }

    /// Iterate every cell in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.outer
            .indices()
            .flat_map(move |o| self.row_range(o).indices().map(move |i| (o, i)))
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.upper_triangle {
            write!(
                f,
                "{} x {} (upper triangle, diff {})",
                self.outer, self.inner, self.triangle_diff
            )
        } else {
            write!(f, "{} x {}", self.outer, self.inner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(from: i64, to: i64) -> Interval {
        Interval::new(from, to).unwrap()
    }

    fn brute_force_size(rect: &Rectangle) -> u64 {
        let mut count = 0;
        for o in rect.outer().indices() {
            for i in rect.inner().indices() {
                if rect.contains(o, i) {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn test_full_rectangle_size() {
        let rect = Rectangle::new(iv(0, 4), iv(10, 13));
        assert_eq!(rect.size(), 12);
        assert_eq!(rect.cells().count(), 12);
        assert!(rect.contains(3, 12));
        assert!(!rect.contains(4, 12));
    }

    #[test]
    fn test_triangle_size_matches_enumeration() {
        for a in -3..4 {
            for len_o in 0..7 {
                for c in -3..4 {
                    for len_i in 0..7 {
                        for diff in -2..3 {
                            let rect =
                                Rectangle::upper_triangle(iv(a, a + len_o), iv(c, c + len_i), diff);
                            assert_eq!(rect.size(), brute_force_size(&rect), "{rect}");
                            assert_eq!(rect.cells().count() as u64, rect.size(), "{rect}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_unique_pairs_size() {
        // Unordered pairs i < j over 10 elements.
        let rect = Rectangle::upper_triangle(iv(0, 10), iv(0, 10), 1);
        assert_eq!(rect.size(), 45);
    }

    #[test]
    fn test_row_and_column_ranges() {
        let rect = Rectangle::upper_triangle(iv(0, 5), iv(0, 5), 1);
        assert_eq!(rect.row_range(0), iv(1, 5));
        assert_eq!(rect.row_range(3), iv(4, 5));
        assert!(rect.row_range(4).is_empty());
        assert_eq!(rect.column_range(3), iv(0, 3));
        assert!(rect.column_range(0).is_empty());
        assert!(rect.row_range(9).is_empty());
    }

    #[test]
    fn test_split_covers_all_cells() {
        let rect = Rectangle::upper_triangle(iv(0, 20), iv(0, 20), 0);
        let blocks = rect.split(3, 4).unwrap();
        let total: u64 = blocks.iter().map(Rectangle::size).sum();
        assert_eq!(total, rect.size());
        for block in &blocks {
            assert!(!block.is_empty());
            assert!(rect.contains_rectangle(block));
        }
        assert!(rect.split(0, 2).is_err());
    }

    #[test]
    fn test_intersection() {
        let a = Rectangle::new(iv(0, 10), iv(0, 10));
        let b = Rectangle::new(iv(5, 15), iv(8, 20));
        let common = a.intersection(&b).unwrap();
        assert_eq!(common, Rectangle::new(iv(5, 10), iv(8, 10)));
        assert!(a.intersection(&Rectangle::new(iv(10, 12), iv(0, 1))).is_none());

        let tri = Rectangle::upper_triangle(iv(0, 10), iv(0, 10), 0);
        let cut = tri.intersection(&Rectangle::new(iv(6, 10), iv(0, 3)));
        assert!(cut.is_none());
    }

    #[test]
    fn test_huge_sizes_saturate() {
        let wide = Rectangle::new(iv(i64::MIN, i64::MAX), iv(0, 3));
        assert_eq!(wide.size(), u64::MAX);
        assert!(!wide.is_empty());

        let n = 1i64 << 31;
        let fits = Rectangle::upper_triangle(iv(0, n), iv(0, n), 0);
        assert_eq!(fits.size(), (n as u64) * (n as u64 + 1) / 2);

        let all = iv(i64::MIN, i64::MAX);
        let too_big = Rectangle::upper_triangle(all, all, 0);
        assert_eq!(too_big.size(), u64::MAX);
    }
}
