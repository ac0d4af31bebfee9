//! The compute backend abstraction consumed by the graph core.
//!
//! The backend itself (CPU vector kernels, GPU command submission) is
//! explicitly out of scope for this crate; only the narrow interface the
//! core calls through is defined here.

pub mod cpu;

use std::sync::Arc;

use crate::error::CoreResult;

/// Where a [`Buffer`]'s bytes live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Storage {
    Device,
    Host,
    Shared,
}

/// Host/device transfer synchronization mode for [`Buffer::read`]/[`Buffer::write`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMode {
    /// Suspends until the transfer completes.
    Sync,
    /// Returns immediately; completion is defined by the engine.
    Async,
}

/// Device/host memory region owned by the [`Engine`]. Allocation strategy,
/// pooling, and device-specific addressing are the engine's business; this
/// trait only defines the interface the core calls through.
pub trait Buffer: Send + Sync {
    fn data(&self) -> *mut u8;
    fn byte_size(&self) -> usize;
    fn storage(&self) -> Storage;

    fn read(&self, offset: usize, size: usize, host: &mut [u8], mode: SyncMode) -> CoreResult<()>;
    fn write(&self, offset: usize, size: usize, host: &[u8], mode: SyncMode) -> CoreResult<()>;

    /// Destroys contents; implementations notify any dependent `Tensor`
    /// views via their own bookkeeping (the graph re-binds tensors on
    /// `setScratch`, it never relies on a buffer surviving a `realloc`).
    /// Takes `&self`: buffers are shared via `Arc<dyn Buffer>`, so
    /// implementations use interior mutability (see `CpuBuffer`).
    fn realloc(&self, new_byte_size: usize) -> CoreResult<()>;
}

/// A 2D kernel-range fan-out primitive: `submit_kernel_2d` calls `kernel(row, col)`
/// for every (row, col) in `0..range.0 x 0..range.1`; ordering between calls
/// is the engine's business, but by the time `submit_kernel_2d` returns all
/// calls for a Sync-mode engine have completed.
pub type Kernel2D<'a> = dyn FnMut(usize, usize) + 'a;

/// The compute backend abstraction. Op implementations call through this
/// trait exclusively; the graph itself is backend-agnostic.
pub trait Engine: Send + Sync {
    /// Channel group size used by blocked layouts: 1, 8 or 16.
    fn tensor_block_size(&self) -> usize;

    fn new_buffer(&self, byte_size: usize, storage: Storage) -> CoreResult<Arc<dyn Buffer>>;

    fn submit_kernel_2d(&self, range: (usize, usize), kernel: &mut Kernel2D<'_>) -> CoreResult<()>;

    /// Additional workspace the engine needs for kernel execution, reserved
    /// ahead of the tensor arena in the scratch layout.
    fn scratch_byte_size(&self) -> usize;

    /// Drains any pending asynchronous work submitted via `submit_kernel_2d`.
    fn wait(&self) -> CoreResult<()>;
}
