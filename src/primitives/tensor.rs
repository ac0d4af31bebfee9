use std::sync::Arc;

use ndarray::ArcArray1;

use crate::engine::Buffer;

use super::tensor_desc::TensorDesc;

/// Where a `Tensor`'s bytes live.
///
/// The transient case is a byte-offset view over an external `Buffer` trait
/// object (the scratch arena, owned by the `Engine`/`Graph`), while the
/// private case keeps an owned, reference-counted byte array.
#[derive(Clone)]
pub enum TensorStorage {
    /// Lives on the scratch arena: a byte offset into a shared `Buffer`.
    Scratch { buffer: Arc<dyn Buffer>, byte_offset: usize },
    /// A private allocation (constants, weights, or materialized concat
    /// fallbacks) — not on the scratch arena, with its own lifetime.
    Private(ArcArray1<u8>),
}

impl std::fmt::Debug for TensorStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TensorStorage::Scratch { byte_offset, .. } => {
                f.debug_struct("Scratch").field("byte_offset", byte_offset).finish()
            }
            TensorStorage::Private(bytes) => {
                f.debug_struct("Private").field("len", &bytes.len()).finish()
            }
        }
    }
}

/// A `TensorDesc` bound to a memory region. Invariant: the tensor's byte
/// span must fit inside its buffer (checked in [`Tensor::new`]).
#[derive(Clone, Debug)]
pub struct Tensor {
    pub desc: TensorDesc,
    pub storage: TensorStorage,
}

impl Tensor {
    pub fn new(desc: TensorDesc, storage: TensorStorage) -> Self {
        if let TensorStorage::Scratch { buffer, byte_offset } = &storage {
            assert!(
                byte_offset + desc.byte_size() <= buffer.byte_size(),
                "tensor byte span [{}, {}) does not fit inside its buffer of size {}",
                byte_offset,
                byte_offset + desc.byte_size(),
                buffer.byte_size()
            );
        }
        Self { desc, storage }
    }

    pub fn private(desc: TensorDesc) -> Self {
        let bytes = ArcArray1::from_vec(vec![0u8; desc.byte_size()]);
        Self::new(desc, TensorStorage::Private(bytes))
    }

    pub fn byte_offset(&self) -> Option<usize> {
        match &self.storage {
            TensorStorage::Scratch { byte_offset, .. } => Some(*byte_offset),
            TensorStorage::Private(_) => None,
        }
    }

    /// Raw byte view of this tensor's memory.
    ///
    /// For the scratch case this dereferences the engine buffer's raw
    /// pointer (`Buffer::data`); ops are the compute backend's client and
    /// are expected to access tensor memory this way.
    pub fn as_bytes(&self) -> &[u8] {
        let size = self.desc.byte_size();
        match &self.storage {
            TensorStorage::Scratch { buffer, byte_offset } => unsafe {
                std::slice::from_raw_parts(buffer.data().add(*byte_offset), size)
            },
            TensorStorage::Private(bytes) => bytes.as_slice().expect("private tensor bytes must be contiguous"),
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let size = self.desc.byte_size();
        match &mut self.storage {
            TensorStorage::Scratch { buffer, byte_offset } => unsafe {
                std::slice::from_raw_parts_mut(buffer.data().add(*byte_offset), size)
            },
            TensorStorage::Private(bytes) => {
                bytes.as_slice_mut().expect("private tensor bytes must be contiguous")
            }
        }
    }

    pub fn get_f32(&self, n: usize, c: usize, h: usize, w: usize) -> f32 {
        let offset = self.desc.element_byte_offset(n, c, h, w);
        let elem = self.desc.data_type.byte_size();
        let bytes = &self.as_bytes()[offset..offset + elem];
        match self.desc.data_type {
            super::layout::DataType::F32 => f32::from_le_bytes(bytes.try_into().unwrap()),
            super::layout::DataType::F16 => {
                half::f16::from_le_bytes(bytes.try_into().unwrap()).to_f32()
            }
        }
    }

    pub fn set_f32(&mut self, n: usize, c: usize, h: usize, w: usize, value: f32) {
        let offset = self.desc.element_byte_offset(n, c, h, w);
        let data_type = self.desc.data_type;
        let bytes = self.as_bytes_mut();
        match data_type {
            super::layout::DataType::F32 => {
                bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            }
            super::layout::DataType::F16 => {
                let v = half::f16::from_f32(value);
                bytes[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
            }
        }
    }
}
