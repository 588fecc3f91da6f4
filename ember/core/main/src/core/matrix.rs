//! Bounds-validated row-major matrix views.
//!
//! A view is checked once when it is built: the backing slice must cover
//! `(rows - 1) * stride + cols` elements. After that, kernels index rows with
//! plain slicing and never recompute the bound per element.

use crate::api::error::{TensorError, TensorResult};

fn required_len(rows: usize, cols: usize, stride: usize) -> usize {
    if rows == 0 || cols == 0 {
        0
    } else {
        (rows - 1) * stride + cols
    }
}

fn check_layout(len: usize, rows: usize, cols: usize, stride: usize) -> TensorResult<usize> {
    if stride < cols {
        return Err(TensorError::InvalidOperation(format!(
            "row stride {} shorter than row length {}",
            stride, cols
        )));
    }
    let required = required_len(rows, cols, stride);
    if len < required {
        return Err(TensorError::ViewOutOfBounds { required, available: len });
    }
    Ok(required)
}

/// Immutable matrix view.
#[derive(Clone, Copy, Debug)]
pub struct MatRef<'a> {
    data: &'a [f32],
    rows: usize,
    cols: usize,
    stride: usize,
}

impl<'a> MatRef<'a> {
    /// Dense view: stride equals `cols`.
    pub fn new(data: &'a [f32], rows: usize, cols: usize) -> TensorResult<Self> {
        Self::strided(data, rows, cols, cols)
    }

    pub fn strided(data: &'a [f32], rows: usize, cols: usize, stride: usize) -> TensorResult<Self> {
        let required = check_layout(data.len(), rows, cols, stride)?;
        Ok(Self {
            data: &data[..required],
            rows,
            cols,
            stride,
        })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Backing slice, trimmed to the last element of the last row.
    #[inline]
    pub fn data(&self) -> &'a [f32] {
        self.data
    }

    #[inline]
    pub fn row(&self, i: usize) -> &'a [f32] {
        let start = i * self.stride;
        &self.data[start..start + self.cols]
    }

    /// Rows `start..end` as a view over the same buffer.
    pub fn sub_rows(&self, start: usize, end: usize) -> MatRef<'a> {
        assert!(start <= end && end <= self.rows, "row range out of bounds");
        let rows = end - start;
        let offset = (start * self.stride).min(self.data.len());
        let len = required_len(rows, self.cols, self.stride);
        MatRef {
            data: &self.data[offset..offset + len],
            rows,
            cols: self.cols,
            stride: self.stride,
        }
    }

    /// Columns `start..end` as a view over the same buffer.
    pub fn sub_cols(&self, start: usize, end: usize) -> MatRef<'a> {
        assert!(start <= end && end <= self.cols, "column range out of bounds");
        let cols = end - start;
        let len = required_len(self.rows, cols, self.stride);
        let offset = if len == 0 { 0 } else { start };
        MatRef {
            data: &self.data[offset..offset + len],
            rows: self.rows,
            cols,
            stride: self.stride,
        }
    }
}

/// Mutable matrix view.
#[derive(Debug)]
pub struct MatMut<'a> {
    data: &'a mut [f32],
    rows: usize,
    cols: usize,
    stride: usize,
}

impl<'a> MatMut<'a> {
    pub fn new(data: &'a mut [f32], rows: usize, cols: usize) -> TensorResult<Self> {
        Self::strided(data, rows, cols, cols)
    }

    pub fn strided(data: &'a mut [f32], rows: usize, cols: usize, stride: usize) -> TensorResult<Self> {
        let required = check_layout(data.len(), rows, cols, stride)?;
        Ok(Self {
            data: &mut data[..required],
            rows,
            cols,
            stride,
        })
    }

    /// Build from a chunk whose layout the caller already derived from a validated view.
    pub(crate) fn from_parts(data: &'a mut [f32], rows: usize, cols: usize, stride: usize) -> Self {
        let required = required_len(rows, cols, stride);
        debug_assert!(data.len() >= required);
        Self {
            data: &mut data[..required],
            rows,
            cols,
            stride,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        let start = i * self.stride;
        &self.data[start..start + self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        let start = i * self.stride;
        &mut self.data[start..start + self.cols]
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut *self.data
    }

    pub(crate) fn into_data(self) -> &'a mut [f32] {
        self.data
    }

    /// Shorter-lived mutable view of the same region.
    pub fn reborrow(&mut self) -> MatMut<'_> {
        MatMut {
            data: &mut *self.data,
            rows: self.rows,
            cols: self.cols,
            stride: self.stride,
        }
    }

    pub fn as_ref(&self) -> MatRef<'_> {
        MatRef {
            data: &*self.data,
            rows: self.rows,
            cols: self.cols,
            stride: self.stride,
        }
    }

    /// Zero every element of the view (padding between rows is untouched).
    pub fn fill_zero(&mut self) {
        for i in 0..self.rows {
            self.row_mut(i).fill(0.0);
        }
    }
}
