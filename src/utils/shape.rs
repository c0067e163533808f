use crate::error::{Result, StnError};
use crate::utils::mat::Matrix;

/// Per-sample geometry of an image batch stored one sample per row in
/// (height, width, channel) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub const fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Row length of one flattened sample.
    pub const fn len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn pixels(&self) -> usize {
        self.height * self.width
    }

    /// Flat offset of `(row, col, channel)` inside one sample.
    #[inline]
    pub const fn offset(&self, row: usize, col: usize, channel: usize) -> usize {
        (row * self.width + col) * self.channels + channel
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    /// Fails with `ShapeMismatch` unless every row of `x` holds one sample.
    pub fn check(&self, what: &'static str, x: &Matrix) -> Result<()> {
        let (n, w) = x.shape();
        if w != self.len() {
            return Err(StnError::shape(
                what,
                &[n, self.channels, self.height, self.width],
                &[n, w],
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.channels, self.height, self.width)
    }
}
