//! Borrowed and owned row-major rasters.
//!
//! A raster is a `(cols, rows, buffer)` triple; pixel `(col, row)` lives at
//! `row * cols + col`. Masks are byte rasters of the same shape where any
//! non-zero cell marks "no data".

use crate::error::{LmkError, Result};

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub left: usize,
    pub top: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(left: usize, top: usize, width: usize, height: usize) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// The whole `cols x rows` raster.
    pub fn full(cols: usize, rows: usize) -> Self {
        Self::new(0, 0, cols, rows)
    }

    pub fn right(&self) -> usize {
        self.left + self.width
    }

    pub fn bottom(&self) -> usize {
        self.top + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the window lies inside a `cols x rows` raster.
    pub fn fits(&self, cols: usize, rows: usize) -> bool {
        self.right() <= cols && self.bottom() <= rows
    }

    pub fn contains(&self, col: usize, row: usize) -> bool {
        col >= self.left && col < self.right() && row >= self.top && row < self.bottom()
    }
}

/// Borrowed view over a row-major buffer.
#[derive(Debug, Clone, Copy)]
pub struct RasterView<'a, T> {
    data: &'a [T],
    cols: usize,
    rows: usize,
}

impl<'a, T: Copy> RasterView<'a, T> {
    pub fn new(data: &'a [T], cols: usize, rows: usize) -> Result<Self> {
        if cols == 0 || rows == 0 {
            return Err(LmkError::InvalidParameter(format!(
                "raster must be non-empty, got {cols}x{rows}"
            )));
        }
        if data.len() != cols * rows {
            return Err(LmkError::InvalidParameter(format!(
                "raster buffer holds {} values, expected {}x{}",
                data.len(),
                cols,
                rows
            )));
        }
        Ok(Self { data, cols, rows })
    }

    /// Caller guarantees `data.len() == cols * rows`.
    pub(crate) fn from_parts(data: &'a [T], cols: usize, rows: usize) -> Self {
        debug_assert_eq!(data.len(), cols * rows);
        Self { data, cols, rows }
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn data(&self) -> &'a [T] {
        self.data
    }

    /// Value at integer `(col, row)`. Panics if out of range.
    #[inline]
    pub fn at(&self, col: usize, row: usize) -> T {
        self.data[row * self.cols + col]
    }

    /// Value at signed `(col, row)`, `None` outside the raster.
    #[inline]
    pub fn get(&self, col: isize, row: isize) -> Option<T> {
        if col < 0 || row < 0 || col as usize >= self.cols || row as usize >= self.rows {
            return None;
        }
        Some(self.at(col as usize, row as usize))
    }

    pub fn same_shape<U: Copy>(&self, other: &RasterView<'_, U>) -> bool {
        self.cols == other.cols && self.rows == other.rows
    }
}

impl RasterView<'_, u8> {
    /// Number of non-zero mask cells inside the window, clipped to the raster.
    pub fn count_set(&self, window: &Window) -> usize {
        let right = window.right().min(self.cols);
        let left = window.left.min(right);
        let bottom = window.bottom().min(self.rows);
        (window.top..bottom)
            .map(|r| {
                self.data[r * self.cols + left..r * self.cols + right]
                    .iter()
                    .filter(|&&v| v != 0)
                    .count()
            })
            .sum()
    }
}

/// Owned row-major raster.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T> {
    data: Vec<T>,
    cols: usize,
    rows: usize,
}

impl<T: Copy> Raster<T> {
    pub fn filled(cols: usize, rows: usize, value: T) -> Self {
        Self {
            data: vec![value; cols * rows],
            cols,
            rows,
        }
    }

    pub fn from_vec(data: Vec<T>, cols: usize, rows: usize) -> Result<Self> {
        RasterView::new(&data, cols, rows)?;
        Ok(Self { data, cols, rows })
    }

    pub fn view(&self) -> RasterView<'_, T> {
        RasterView::from_parts(&self.data, self.cols, self.rows)
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn at(&self, col: usize, row: usize) -> T {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, col: usize, row: usize, value: T) {
        self.data[row * self.cols + col] = value;
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}
