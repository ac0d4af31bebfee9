//! Conv: a 3x3, stride-1, pad-1 convolution with bias and activation,
//! optionally fused with a following 2x2 max-pool.

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::primitives::{Dims, Tensor, TensorDesc};

use super::{Activation, OpBehavior, PostOp};

pub struct Conv {
    name: String,
    dst_desc: TensorDesc,
    dst: Option<Tensor>,
    src: Option<Tensor>,
    /// Weight tensor addressed as (oc, ic, kh, kw) via `Tensor::get_f32`.
    weight: Tensor,
    /// Bias tensor addressed as (0, oc, 0, 0).
    bias: Tensor,
    activation: Activation,
    post_op: PostOp,
}

impl Conv {
    pub const KERNEL: usize = 3;

    pub fn new(
        name: impl Into<String>,
        src_desc: TensorDesc,
        out_channels: usize,
        weight: Tensor,
        bias: Tensor,
        activation: Activation,
        post_op: PostOp,
    ) -> Self {
        assert_eq!(
            weight.desc.dims,
            Dims::new(out_channels, src_desc.dims.c, Self::KERNEL, Self::KERNEL),
            "conv weight shape must be (out_channels, in_channels, 3, 3)"
        );
        assert_eq!(bias.desc.dims, Dims::chw(out_channels, 1, 1), "conv bias shape must be (out_channels, 1, 1)");

        let (dst_h, dst_w) = match post_op {
            PostOp::Pool => (src_desc.dims.h / 2, src_desc.dims.w / 2),
            PostOp::None => (src_desc.dims.h, src_desc.dims.w),
        };
        let dst_desc = TensorDesc::new(
            Dims::chw(out_channels, dst_h, dst_w),
            src_desc.data_type,
            src_desc.layout,
        );

        Self {
            name: name.into(),
            dst_desc,
            dst: None,
            src: None,
            weight,
            bias,
            activation,
            post_op,
        }
    }

    pub fn execute(&mut self, engine: &dyn Engine) -> CoreResult<()> {
        let src = self
            .src
            .as_ref()
            .ok_or_else(|| CoreError::Misconfiguration(format!("op '{}' has no bound source tensor", self.name)))?;
        let weight = &self.weight;
        let bias = &self.bias;
        let activation = self.activation;
        let pool = matches!(self.post_op, PostOp::Pool);
        let in_c = src.desc.dims.c;
        let in_h = src.desc.dims.h;
        let in_w = src.desc.dims.w;
        let out_c = self.dst_desc.dims.c;
        let out_h = self.dst_desc.dims.h;
        let out_w = self.dst_desc.dims.w;

        let dst = self
            .dst
            .as_mut()
            .ok_or_else(|| CoreError::Misconfiguration(format!("op '{}' has no bound destination tensor", self.name)))?;

        engine.submit_kernel_2d((out_h, out_w), &mut |row, col| {
            for oc in 0..out_c {
                let value = if pool {
                    let mut best = f32::NEG_INFINITY;
                    for (dh, dw) in [(0usize, 0usize), (0, 1), (1, 0), (1, 1)] {
                        let h = row * 2 + dh;
                        let w = col * 2 + dw;
                        let v = conv_at(src, weight, bias, activation, oc, h, w, in_c, in_h, in_w);
                        best = best.max(v);
                    }
                    best
                } else {
                    conv_at(src, weight, bias, activation, oc, row, col, in_c, in_h, in_w)
                };
                dst.set_f32(0, oc, row, col, value);
            }
        })
    }
}

/// Computes one (oc, h, w) conv + bias + activation output, pad=1, stride=1.
/// Shared with `ConcatConv`, which runs the same math over a channel-wise
/// concatenated (possibly virtual) source tensor.
pub(crate) fn conv_at(
    src: &Tensor,
    weight: &Tensor,
    bias: &Tensor,
    activation: Activation,
    oc: usize,
    h: usize,
    w: usize,
    in_c: usize,
    in_h: usize,
    in_w: usize,
) -> f32 {
    let mut acc = bias.get_f32(0, oc, 0, 0);
    for ic in 0..in_c {
        for kh in 0..Conv::KERNEL {
            let sh = h as isize + kh as isize - 1;
            if sh < 0 || sh as usize >= in_h {
                continue;
            }
            for kw in 0..Conv::KERNEL {
                let sw = w as isize + kw as isize - 1;
                if sw < 0 || sw as usize >= in_w {
                    continue;
                }
                let x = src.get_f32(0, ic, sh as usize, sw as usize);
                let k = weight.get_f32(oc, ic, kh, kw);
                acc += x * k;
            }
        }
    }
    activation.apply(acc)
}

impl OpBehavior for Conv {
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
        assert_eq!(sources.len(), 1, "Conv takes exactly one source tensor");
        self.src = Some(sources.remove(0));
    }

    fn support(&self, _engine: &dyn Engine) -> bool {
        true
    }

    fn work_amount(&self) -> f64 {
        // Roughly proportional to the MAC count: dst elements times kernel
        // footprint times the input channel-block count.
        let kernel_footprint = (Self::KERNEL * Self::KERNEL) as f64;
        self.dst_desc.dims.element_count() as f64 * kernel_footprint
    }

    fn finalize(&mut self, _engine: &dyn Engine) -> CoreResult<()> {
        Ok(())
    }
}
