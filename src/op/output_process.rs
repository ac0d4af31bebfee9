//! OutputProcess: inverse reorder from the network's final tensor back into
//! an external output image.

use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::primitives::{DataType, Dims, Image, Layout, Tensor, TensorDesc};
use crate::transfer::TransferFunction;

use super::input_process::Tile;
use super::OpBehavior;

pub struct OutputProcess {
    name: String,
    src_desc: TensorDesc,
    src: Option<Tensor>,
    transfer: Arc<dyn TransferFunction>,
    hdr: bool,
    snorm: bool,
    tile: Tile,
}

impl OutputProcess {
    pub fn new(
        name: impl Into<String>,
        src_desc: TensorDesc,
        tile: Tile,
        transfer: Arc<dyn TransferFunction>,
        hdr: bool,
        snorm: bool,
    ) -> Self {
        assert!(src_desc.dims.c >= 3, "OutputProcess needs at least 3 source channels");
        assert!(
            tile.h_src_begin + tile.h <= src_desc.dims.h,
            "tile exceeds source tensor height"
        );
        assert!(
            tile.w_src_begin + tile.w <= src_desc.dims.w,
            "tile exceeds source tensor width"
        );
        Self {
            name: name.into(),
            src_desc,
            src: None,
            transfer,
            hdr,
            snorm,
            tile,
        }
    }

    pub fn execute(&mut self, _engine: &dyn Engine, image: &mut Image) -> CoreResult<()> {
        let src = self.src.as_ref().ok_or_else(|| {
            CoreError::Misconfiguration(format!("op '{}' has no bound source tensor", self.name))
        })?;

        let tile = self.tile;
        let scale = self.transfer.input_scale();
        let hdr = self.hdr;
        let snorm = self.snorm;
        let tf = self.transfer.as_ref();
        let out_channels = image.channels.min(3);

        for h in 0..tile.h {
            for w in 0..tile.w {
                let dst_h = tile.h_dst_begin + h;
                let dst_w = tile.w_dst_begin + w;
                if dst_h >= image.height || dst_w >= image.width {
                    continue;
                }
                let src_h = tile.h_src_begin + h;
                let src_w = tile.w_src_begin + w;

                let r = src.get_f32(0, 0, src_h, src_w);
                let g = src.get_f32(0, 1, src_h, src_w);
                let b = src.get_f32(0, 2, src_h, src_w);

                let mut v = tf.inverse([r, g, b]);
                v = v.map(|x| x / scale);
                if snorm {
                    v = v.map(|x| x * 2.0 - 1.0);
                }
                if !hdr {
                    v = v.map(|x| x.clamp(0.0, 1.0));
                }

                for c in 0..out_channels {
                    image.set_f32(dst_h, dst_w, c, v[c]);
                }
            }
        }

        Ok(())
    }
}

impl OpBehavior for OutputProcess {
    fn name(&self) -> &str {
        &self.name
    }

    /// OutputProcess consumes a tensor but produces no tensor of its own;
    /// the arena planner still calls `dst_desc`/`set_dst` uniformly across
    /// every op, so this reports a zero-channel, zero-size placeholder at
    /// this op's spatial shape.
    fn dst_desc(&self) -> TensorDesc {
        TensorDesc::new(Dims::chw(0, self.src_desc.dims.h, self.src_desc.dims.w), DataType::F32, Layout::Chw)
    }

    fn set_dst(&mut self, _tensor: Tensor) {}

    fn dst(&self) -> Option<&Tensor> {
        None
    }

    fn bind_sources(&mut self, mut sources: Vec<Tensor>) {
        assert_eq!(sources.len(), 1, "OutputProcess takes exactly one source tensor");
        self.src = Some(sources.remove(0));
    }

    fn support(&self, _engine: &dyn Engine) -> bool {
        true
    }

    fn work_amount(&self) -> f64 {
        (self.tile.h * self.tile.w) as f64
    }

    fn finalize(&mut self, _engine: &dyn Engine) -> CoreResult<()> {
        Ok(())
    }
}
