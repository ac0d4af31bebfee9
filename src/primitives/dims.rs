use serde::{Deserialize, Serialize};

/// Tensor dimensions, N,C,H,W (N defaults to 1 for the common 3D C,H,W case).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dims {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl Dims {
    pub fn new(n: usize, c: usize, h: usize, w: usize) -> Self {
        Self { n, c, h, w }
    }

    pub fn chw(c: usize, h: usize, w: usize) -> Self {
        Self { n: 1, c, h, w }
    }

    pub fn element_count(&self) -> usize {
        self.n * self.c * self.h * self.w
    }

    pub fn with_channels(&self, c: usize) -> Self {
        Self { c, ..*self }
    }

    pub fn with_hw(&self, h: usize, w: usize) -> Self {
        Self { h, w, ..*self }
    }
}
