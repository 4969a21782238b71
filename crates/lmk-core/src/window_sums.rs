//! Moving-window sums with a per-column cache.
//!
//! The accumulator keeps, for every column of a region, the sum of `K`
//! integer channels over a band of `height` rows, plus the running total of
//! `width` consecutive column sums. Sliding one column right drops the
//! leftmost column sum and adds the next one; sliding the band down one row
//! drops the old top row and adds the new bottom row in every column. After
//! any sequence of moves [`WindowSums::sums`] equals a fresh recomputation
//! over the current window.

use crate::error::{try_resize, LmkError, Result};

#[derive(Debug, Clone)]
pub struct WindowSums<const K: usize> {
    width: usize,
    height: usize,
    columns: Vec<[i64; K]>,
    top: usize,
    left: usize,
    sums: [i64; K],
}

fn add<const K: usize>(acc: &mut [i64; K], v: &[i64; K]) {
    for k in 0..K {
        acc[k] += v[k];
    }
}

fn sub<const K: usize>(acc: &mut [i64; K], v: &[i64; K]) {
    for k in 0..K {
        acc[k] -= v[k];
    }
}

impl<const K: usize> Default for WindowSums<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const K: usize> WindowSums<K> {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            columns: Vec::new(),
            top: 0,
            left: 0,
            sums: [0; K],
        }
    }

    /// Pre-size the column cache so later calls on regions up to
    /// `n_columns` wide do not allocate.
    pub fn reserve(&mut self, n_columns: usize) -> Result<()> {
        if n_columns > self.columns.capacity() {
            self.columns
                .try_reserve(n_columns - self.columns.len())
                .map_err(|_| LmkError::AllocationFailure(n_columns))?;
        }
        Ok(())
    }

    /// Configure a `width x height` window over a region `n_columns` wide
    /// and fill the column cache for the band starting at row `top`.
    ///
    /// `source(col, row)` returns the channel values of one cell in region
    /// coordinates.
    pub fn start_band<F>(
        &mut self,
        width: usize,
        height: usize,
        n_columns: usize,
        top: usize,
        source: F,
    ) -> Result<()>
    where
        F: Fn(usize, usize) -> [i64; K],
    {
        if width == 0 || height == 0 || width > n_columns {
            return Err(LmkError::InvalidParameter(format!(
                "window {width}x{height} does not fit {n_columns} columns"
            )));
        }
        self.width = width;
        self.height = height;
        self.top = top;
        try_resize(&mut self.columns, n_columns, [0; K])?;
        for (c, col) in self.columns.iter_mut().enumerate() {
            for r in top..top + height {
                add(col, &source(c, r));
            }
        }
        self.start_row(0);
        Ok(())
    }

    /// Slide the band one row down.
    pub fn advance_row<F>(&mut self, source: F)
    where
        F: Fn(usize, usize) -> [i64; K],
    {
        let old = self.top;
        let new = self.top + self.height;
        for (c, col) in self.columns.iter_mut().enumerate() {
            sub(col, &source(c, old));
            add(col, &source(c, new));
        }
        self.top += 1;
    }

    /// Reset the horizontal total to the window starting at column `left`.
    pub fn start_row(&mut self, left: usize) {
        self.left = left;
        self.sums = [0; K];
        for col in &self.columns[left..left + self.width] {
            add(&mut self.sums, col);
        }
    }

    /// Slide the window one column right.
    #[inline]
    pub fn advance_column(&mut self) {
        let (drop, take) = (self.left, self.left + self.width);
        let (old, new) = (self.columns[drop], self.columns[take]);
        sub(&mut self.sums, &old);
        add(&mut self.sums, &new);
        self.left += 1;
    }

    #[inline]
    pub fn sums(&self) -> [i64; K] {
        self.sums
    }

    pub fn top(&self) -> usize {
        self.top
    }

    pub fn left(&self) -> usize {
        self.left
    }

    /// Number of horizontal positions in the current region.
    pub fn positions(&self) -> usize {
        self.columns.len() + 1 - self.width
    }
}
