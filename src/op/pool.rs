//! Pool: a standalone 2x2 max-pool, stride 2. Used when a
//! pool is not fused into the preceding `Conv` (see `Conv`'s `PostOp`).

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::primitives::{Dims, Tensor, TensorDesc};

use super::OpBehavior;

pub struct Pool {
    name: String,
    dst_desc: TensorDesc,
    dst: Option<Tensor>,
    src: Option<Tensor>,
}

impl Pool {
    pub fn new(name: impl Into<String>, src_desc: TensorDesc) -> Self {
        let dst_desc = TensorDesc::new(
            Dims::chw(src_desc.dims.c, src_desc.dims.h / 2, src_desc.dims.w / 2),
            src_desc.data_type,
            src_desc.layout,
        );
        Self {
            name: name.into(),
            dst_desc,
            dst: None,
            src: None,
        }
    }

    pub fn execute(&mut self, engine: &dyn Engine) -> CoreResult<()> {
        let src = self
            .src
            .as_ref()
            .ok_or_else(|| CoreError::Misconfiguration(format!("op '{}' has no bound source tensor", self.name)))?;
        let out_c = self.dst_desc.dims.c;
        let out_h = self.dst_desc.dims.h;
        let out_w = self.dst_desc.dims.w;

        let dst = self
            .dst
            .as_mut()
            .ok_or_else(|| CoreError::Misconfiguration(format!("op '{}' has no bound destination tensor", self.name)))?;

        engine.submit_kernel_2d((out_h, out_w), &mut |row, col| {
            for c in 0..out_c {
                let mut best = f32::NEG_INFINITY;
                for (dh, dw) in [(0usize, 0usize), (0, 1), (1, 0), (1, 1)] {
                    best = best.max(src.get_f32(0, c, row * 2 + dh, col * 2 + dw));
                }
                dst.set_f32(0, c, row, col, best);
            }
        })
    }
}

impl OpBehavior for Pool {
    fn name(&self) -> &str {
        &self.name
    }

    fn dst_desc(&self) -> TensorDesc {
        self.dst_desc
    }

    fn set_dst(&mut self, tensor: Tensor) {
        self.dst = Some(tensor);
    }

    fn dst(&self) -> Option<&Tensor> {
        self.dst.as_ref()
    }

    fn bind_sources(&mut self, mut sources: Vec<Tensor>) {
        assert_eq!(sources.len(), 1, "Pool takes exactly one source tensor");
        self.src = Some(sources.remove(0));
    }

    fn support(&self, _engine: &dyn Engine) -> bool {
        true
    }

    fn work_amount(&self) -> f64 {
        self.dst_desc.dims.element_count() as f64
    }

    fn finalize(&mut self, _engine: &dyn Engine) -> CoreResult<()> {
        Ok(())
    }
}
