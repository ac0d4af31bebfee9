use serde::{Deserialize, Serialize};

use super::dims::Dims;
use super::layout::{DataType, Layout};

/// Shape, element type and layout of a tensor. Byte size is derived from
/// these three fields; `TensorDesc` never owns memory itself (see
/// [`super::tensor::Tensor`]).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub dims: Dims,
    pub data_type: DataType,
    pub layout: Layout,
}

impl TensorDesc {
    pub fn new(dims: Dims, data_type: DataType, layout: Layout) -> Self {
        let desc = Self {
            dims,
            data_type,
            layout,
        };
        desc.validate();
        desc
    }

    /// C is a multiple of the layout's block size for blocked layouts; H,W > 0.
    fn validate(&self) {
        assert!(self.dims.h > 0, "tensor height must be positive");
        assert!(self.dims.w > 0, "tensor width must be positive");
        if self.layout.is_blocked() {
            let block = self.layout.block_size();
            assert!(
                self.dims.c % block == 0,
                "channel count {} is not a multiple of block size {}",
                self.dims.c,
                block
            );
        }
    }

    /// Number of channel-blocks (1 for planar layouts).
    pub fn channel_block_count(&self) -> usize {
        self.dims.c / self.layout.block_size()
    }

    pub fn byte_size(&self) -> usize {
        self.dims.element_count() * self.data_type.byte_size()
    }

    pub fn with_dims(&self, dims: Dims) -> Self {
        Self { dims, ..*self }
    }

    /// Byte offset of element (n, c, h, w) within this tensor's memory,
    /// honoring planar vs. channel-blocked layout.
    pub fn element_byte_offset(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        let elem = self.data_type.byte_size();
        let block = self.layout.block_size();
        let index = if block == 1 {
            ((n * self.dims.c + c) * self.dims.h + h) * self.dims.w + w
        } else {
            let outer_c = c / block;
            let inner_c = c % block;
            let blocks = self.dims.c / block;
            (((n * blocks + outer_c) * self.dims.h + h) * self.dims.w + w) * block + inner_c
        };
        index * elem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_planar() {
        let desc = TensorDesc::new(Dims::chw(9, 16, 16), DataType::F32, Layout::Chw);
        assert_eq!(desc.byte_size(), 9 * 16 * 16 * 4);
    }

    #[test]
    #[should_panic]
    fn blocked_layout_requires_multiple_channels() {
        TensorDesc::new(Dims::chw(9, 16, 16), DataType::F32, Layout::Chw8c);
    }

    #[test]
    fn channel_block_count_blocked() {
        let desc = TensorDesc::new(Dims::chw(16, 8, 8), DataType::F16, Layout::Chw8c);
        assert_eq!(desc.channel_block_count(), 2);
    }

    #[test]
    fn blocked_layout_groups_channels() {
        let desc = TensorDesc::new(Dims::chw(16, 2, 2), DataType::F32, Layout::Chw8c);
        // channel 0 and channel 8 are in different outer groups but the same inner slot.
        let off_c0 = desc.element_byte_offset(0, 0, 0, 0);
        let off_c8 = desc.element_byte_offset(0, 8, 0, 0);
        assert_eq!(off_c8 - off_c0, 2 * 2 * 8 * 4);
    }

    #[test]
    fn planar_layout_is_row_major_chw() {
        let desc = TensorDesc::new(Dims::chw(3, 2, 2), DataType::F32, Layout::Chw);
        assert_eq!(desc.element_byte_offset(0, 1, 0, 0), (1 * 2 * 2) * 4);
    }
}
