use ndarray::Array2;

use crate::io::fits::FitsHeader;

/// A single FITS image frame.
/// Pixel values are raw ADU as f32, row-major, shape = (height, width).
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Array2<f32>,
    /// Primary header of the source file; carried over on write.
    pub header: FitsHeader,
}

impl Frame {
    pub fn new(data: Array2<f32>, header: FitsHeader) -> Self {
        Self { data, header }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }
}
