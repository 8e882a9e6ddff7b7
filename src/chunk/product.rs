//! # Product
//!
//! Lazy pairwise combination of two ranged buffers. A product never
//! materializes the pairs; it walks the cells of a [`Rectangle`] and looks the
//! two operands up on demand. Splitting a product into contiguous square
//! blocks is how pairwise workloads are spread over worker threads.

use super::view::{RangedList, RangedSlice};
use crate::error::{DistError, Result};
use crate::range::Rectangle;
use rayon::prelude::*;

/// An element of a product: `((outer index, outer value), (inner index, inner value))`.
pub type Pair<'a, S, T> = ((i64, &'a S), (i64, &'a T));

#[derive(Debug)]
pub struct Product<'a, S, T> {
    first: RangedSlice<'a, S>,
    second: RangedSlice<'a, T>,
    rect: Rectangle,
}

impl<S, T> Clone for Product<'_, S, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, T> Copy for Product<'_, S, T> {}

impl<'a, S, T> Product<'a, S, T> {
    /// Every pair `(a, b)` with `a` from `first` and `b` from `second`.
    pub fn new(first: RangedSlice<'a, S>, second: RangedSlice<'a, T>) -> Self {
        let rect = Rectangle::new(first.range(), second.range());
        Self {
            first,
            second,
            rect,
        }
    }

    /// The pairs of `first x second` that fall inside `rect`.
    pub fn restricted(
        first: RangedSlice<'a, S>,
        second: RangedSlice<'a, T>,
        rect: Rectangle,
    ) -> Result<Self> {
        let full = Self::new(first, second);
        if !full.rect.contains_rectangle(&rect) {
            return Err(DistError::RectangleOutOfBounds {
                requested: rect,
                rect: full.rect,
            });
        }
        Ok(Self { rect, ..full })
    }

    pub fn rectangle(&self) -> Rectangle {
        self.rect
    }

    /// Number of pairs, computed without enumerating them.
    pub fn size(&self) -> u64 {
        self.rect.size()
    }

    /// Iterate the pairs in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = Pair<'a, S, T>> + '_ {
        let first = self.first;
        let second = self.second;
        self.rect.cells().filter_map(move |(o, i)| {
            let a = first.at(o).ok()?;
            let b = second.at(i).ok()?;
            Some(((o, a), (i, b)))
        })
    }

    /// Split into contiguous square blocks, dropping blocks with no pair.
    pub fn split(&self, outer_parts: usize, inner_parts: usize) -> Result<Vec<Product<'a, S, T>>> {
        Ok(self
            .rect
            .split(outer_parts, inner_parts)?
            .into_iter()
            .map(|rect| Product {
                first: self.first,
                second: self.second,
                rect,
            })
            .collect())
    }

    /// Visit every pair, spreading square blocks over the rayon pool.
    pub fn parallel_for_each<F>(&self, outer_parts: usize, inner_parts: usize, f: F) -> Result<()>
    where
        S: Sync,
        T: Sync,
        F: Fn(Pair<'a, S, T>) + Sync + Send,
    {
        let blocks = self.split(outer_parts.max(1), inner_parts.max(1))?;
        blocks
            .par_iter()
            .for_each(|block| block.iter().for_each(&f));
        Ok(())
    }

    /// Fold every block into its own accumulator; one accumulator per block.
    pub fn parallel_accumulate<A, I, F>(
        &self,
        outer_parts: usize,
        inner_parts: usize,
        init: I,
        fold: F,
    ) -> Result<Vec<A>>
    where
        S: Sync,
        T: Sync,
        A: Send,
        I: Fn() -> A + Sync + Send,
        F: Fn(&mut A, Pair<'a, S, T>) + Sync + Send,
    {
        let blocks = self.split(outer_parts.max(1), inner_parts.max(1))?;
        Ok(blocks
            .par_iter()
            .map(|block| {
                let mut acc = init();
                for pair in block.iter() {
                    fold(&mut acc, pair);
                }
                acc
            })
            .collect())
    }
}

impl<'a, T> Product<'a, T, T> {
    /// Every unordered pair `{a, b}` of distinct elements of `list`, visited
    /// once as `(a, b)` with `index(a) < index(b)`.
    pub fn unique_pairs(list: RangedSlice<'a, T>) -> Self {
        let range = list.range();
        Self {
            first: list,
            second: list,
            rect: Rectangle::upper_triangle(range, range, 1),
        }
    }
}
