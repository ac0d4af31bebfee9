use serde::{Deserialize, Serialize};

/// Element data type carried by a tensor, as a closed enum since this crate
/// needs type-aware NaN handling and clamping that differ between f32 and
/// f16.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    F32,
    F16,
}

impl DataType {
    pub fn byte_size(&self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F16 => 2,
        }
    }
}

/// Tensor memory layout. Planar (`Chw`) or channel-blocked, where the
/// channel axis is tiled into groups of 8 or 16 contiguous channels to match
/// the engine's preferred SIMD/subgroup width (the *tensor block size*).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    Chw,
    Chw8c,
    Chw16c,
}

impl Layout {
    pub fn block_size(&self) -> usize {
        match self {
            Layout::Chw => 1,
            Layout::Chw8c => 8,
            Layout::Chw16c => 16,
        }
    }

    pub fn is_blocked(&self) -> bool {
        !matches!(self, Layout::Chw)
    }

    pub fn for_block_size(block_size: usize) -> Self {
        match block_size {
            1 => Layout::Chw,
            8 => Layout::Chw8c,
            16 => Layout::Chw16c,
            other => panic!("unsupported tensor block size {other}"),
        }
    }
}
