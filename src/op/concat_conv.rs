//! ConcatConv: channel-concatenates two source tensors, then runs the same
//! 3x3 conv as `Conv` over the combined channels, relying on the arena's
//! concat colocation rule to avoid a copy when possible.
//!
//! When the arena placed the two sources back-to-back in the same buffer
//! (the `ColocationConstraint` the `Graph` asked for when building this op),
//! concatenation is a zero-copy view: a `Tensor` spanning both byte ranges.
//! Otherwise — different buffers, non-adjacent offsets, or a blocked layout
//! where byte-adjacency doesn't imply channel-adjacency — the sources are
//! copied element-by-element into a materialized tensor (see the decision
//! recorded in DESIGN.md for the mixed-precision case).

use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::primitives::{DataType, Dims, Layout, Tensor, TensorDesc, TensorStorage};

use super::conv::conv_at;
use super::{Activation, Conv, OpBehavior};

pub struct ConcatConv {
    name: String,
    dst_desc: TensorDesc,
    dst: Option<Tensor>,
    src_a: Option<Tensor>,
    src_b: Option<Tensor>,
    /// Weight tensor addressed as (oc, ic, kh, kw) over the *combined*
    /// channel axis (channels of `src_a` followed by channels of `src_b`).
    weight: Tensor,
    bias: Tensor,
    activation: Activation,
}

impl ConcatConv {
    pub fn new(
        name: impl Into<String>,
        src_a_desc: TensorDesc,
        src_b_desc: TensorDesc,
        out_channels: usize,
        weight: Tensor,
        bias: Tensor,
        activation: Activation,
    ) -> Self {
        assert_eq!(src_a_desc.dims.h, src_b_desc.dims.h, "concat sources must share spatial dims");
        assert_eq!(src_a_desc.dims.w, src_b_desc.dims.w, "concat sources must share spatial dims");
        let combined_c = src_a_desc.dims.c + src_b_desc.dims.c;
        assert_eq!(
            weight.desc.dims,
            Dims::new(out_channels, combined_c, Conv::KERNEL, Conv::KERNEL),
            "concat-conv weight shape must be (out_channels, c_a + c_b, 3, 3)"
        );
        assert_eq!(bias.desc.dims, Dims::chw(out_channels, 1, 1));

        let dst_desc = TensorDesc::new(
            Dims::chw(out_channels, src_a_desc.dims.h, src_a_desc.dims.w),
            src_a_desc.data_type,
            src_a_desc.layout,
        );

        Self {
            name: name.into(),
            dst_desc,
            dst: None,
            src_a: None,
            src_b: None,
            weight,
            bias,
            activation,
        }
    }

    /// True when the last `execute` (or a dry check against currently bound
    /// sources) could use the zero-copy concat path. Exposed for tests and
    /// for callers that want to verify the arena actually honored the
    /// colocation request.
    pub fn has_zero_copy_sources(&self) -> bool {
        match (&self.src_a, &self.src_b) {
            (Some(a), Some(b)) => try_view_concat(a, b).is_some(),
            _ => false,
        }
    }

    pub fn execute(&mut self, engine: &dyn Engine) -> CoreResult<()> {
        let src_a = self
            .src_a
            .as_ref()
            .ok_or_else(|| CoreError::Misconfiguration(format!("op '{}' has no bound first source", self.name)))?;
        let src_b = self
            .src_b
            .as_ref()
            .ok_or_else(|| CoreError::Misconfiguration(format!("op '{}' has no bound second source", self.name)))?;

        let combined = try_view_concat(src_a, src_b).unwrap_or_else(|| {
            log::warn!("concat_conv '{}': sources not byte-adjacent, falling back to materialized concat", self.name);
            materialize_concat(src_a, src_b)
        });

        let weight = &self.weight;
        let bias = &self.bias;
        let activation = self.activation;
        let in_c = combined.desc.dims.c;
        let in_h = combined.desc.dims.h;
        let in_w = combined.desc.dims.w;
        let out_c = self.dst_desc.dims.c;
        let out_h = self.dst_desc.dims.h;
        let out_w = self.dst_desc.dims.w;

        let dst = self
            .dst
            .as_mut()
            .ok_or_else(|| CoreError::Misconfiguration(format!("op '{}' has no bound destination tensor", self.name)))?;

        engine.submit_kernel_2d((out_h, out_w), &mut |row, col| {
            for oc in 0..out_c {
                let value = conv_at(&combined, weight, bias, activation, oc, row, col, in_c, in_h, in_w);
                dst.set_f32(0, oc, row, col, value);
            }
        })
    }
}

/// Builds a zero-copy view tensor spanning `a`'s and `b`'s bytes, if they
/// are planar, same dtype, and back-to-back in the same buffer.
fn try_view_concat(a: &Tensor, b: &Tensor) -> Option<Tensor> {
    if a.desc.layout != Layout::Chw || b.desc.layout != Layout::Chw {
        return None;
    }
    if a.desc.data_type != b.desc.data_type {
        return None;
    }
    if a.desc.dims.h != b.desc.dims.h || a.desc.dims.w != b.desc.dims.w {
        return None;
    }
    let (buf_a, off_a) = match &a.storage {
        TensorStorage::Scratch { buffer, byte_offset } => (buffer.clone(), *byte_offset),
        TensorStorage::Private(_) => return None,
    };
    let (buf_b, off_b) = match &b.storage {
        TensorStorage::Scratch { buffer, byte_offset } => (buffer.clone(), *byte_offset),
        TensorStorage::Private(_) => return None,
    };
    if !Arc::ptr_eq(&buf_a, &buf_b) {
        return None;
    }
    if off_b != off_a + a.desc.byte_size() {
        return None;
    }

    let dims = Dims::chw(a.desc.dims.c + b.desc.dims.c, a.desc.dims.h, a.desc.dims.w);
    let desc = TensorDesc::new(dims, a.desc.data_type, Layout::Chw);
    Some(Tensor::new(desc, TensorStorage::Scratch { buffer: buf_a, byte_offset: off_a }))
}

/// Copies `a`'s and `b`'s channels into one private F32 tensor. Used
/// whenever the zero-copy view isn't possible, including the mixed
/// data-type case (values are promoted to f32 through the normal
/// `get_f32`/`set_f32` conversion).
fn materialize_concat(a: &Tensor, b: &Tensor) -> Tensor {
    let c_a = a.desc.dims.c;
    let c_b = b.desc.dims.c;
    let h = a.desc.dims.h;
    let w = a.desc.dims.w;
    let desc = TensorDesc::new(Dims::chw(c_a + c_b, h, w), DataType::F32, Layout::Chw);
    let mut combined = Tensor::private(desc);
    for y in 0..h {
        for x in 0..w {
            for c in 0..c_a {
                combined.set_f32(0, c, y, x, a.get_f32(0, c, y, x));
            }
            for c in 0..c_b {
                combined.set_f32(0, c_a + c, y, x, b.get_f32(0, c, y, x));
            }
        }
    }
    combined
}

impl OpBehavior for ConcatConv {
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
        assert_eq!(sources.len(), 2, "ConcatConv takes exactly two source tensors");
        self.src_b = Some(sources.remove(1));
        self.src_a = Some(sources.remove(0));
    }

    fn support(&self, _engine: &dyn Engine) -> bool {
        true
    }

    fn work_amount(&self) -> f64 {
        let kernel_footprint = (Conv::KERNEL * Conv::KERNEL) as f64;
        self.dst_desc.dims.element_count() as f64 * kernel_footprint
    }

    fn finalize(&mut self, _engine: &dyn Engine) -> CoreResult<()> {
        Ok(())
    }
}
