//! InputProcess: tile-aware reorder of up to three source images into a
//! padded, channel-ordered tensor.

use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::primitives::{Image, Layout, Tensor, TensorDesc};
use crate::transfer::TransferFunction;

use super::OpBehavior;

/// A rectangular source region plus its placement in the padded destination
/// tensor (GLOSSARY).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tile {
    pub h_src_begin: usize,
    pub w_src_begin: usize,
    pub h_dst_begin: usize,
    pub w_dst_begin: usize,
    pub h: usize,
    pub w: usize,
}

/// The (up to three) source images bound for one `run()` of an
/// `InputProcess`. Any of the three may be absent; absent channels are
/// zero-filled.
#[derive(Default)]
pub struct InputImages<'a> {
    pub color: Option<Image<'a>>,
    pub albedo: Option<Image<'a>>,
    pub normal: Option<Image<'a>>,
}

pub struct InputProcess {
    name: String,
    dst_desc: TensorDesc,
    dst: Option<Tensor>,
    transfer: Arc<dyn TransferFunction>,
    hdr: bool,
    snorm: bool,
    tile: Tile,
}

impl InputProcess {
    pub fn new(
        name: impl Into<String>,
        dst_desc: TensorDesc,
        tile: Tile,
        transfer: Arc<dyn TransferFunction>,
        hdr: bool,
        snorm: bool,
    ) -> Self {
        assert!(
            tile.h_dst_begin + tile.h <= dst_desc.dims.h,
            "tile exceeds destination height"
        );
        assert!(
            tile.w_dst_begin + tile.w <= dst_desc.dims.w,
            "tile exceeds destination width"
        );
        Self {
            name: name.into(),
            dst_desc,
            dst: None,
            transfer,
            hdr,
            snorm,
            tile,
        }
    }

    pub fn tile(&self) -> Tile {
        self.tile
    }

    pub fn execute(&mut self, _engine: &dyn Engine, images: Option<&InputImages>) -> CoreResult<()> {
        let dst = self.dst.as_mut().ok_or_else(|| {
            CoreError::Misconfiguration(format!("op '{}' has no bound destination tensor", self.name))
        })?;

        let c_total = dst.desc.dims.c;
        let h_total = dst.desc.dims.h;
        let w_total = dst.desc.dims.w;
        let tile = self.tile;

        let color_img = images.and_then(|i| i.color.as_ref());
        let albedo_img = images.and_then(|i| i.albedo.as_ref());
        let normal_img = images.and_then(|i| i.normal.as_ref());
        let color_present = color_img.is_some();

        let scale = self.transfer.input_scale();
        let hdr = self.hdr;
        let snorm = self.snorm;
        let tf = self.transfer.as_ref();

        for h_dst in 0..h_total {
            for w_dst in 0..w_total {
                let h = h_dst as isize - tile.h_dst_begin as isize;
                let w = w_dst as isize - tile.w_dst_begin as isize;
                let in_bounds =
                    h >= 0 && (h as usize) < tile.h && w >= 0 && (w as usize) < tile.w;

                if !in_bounds {
                    for c in 0..c_total {
                        dst.set_f32(0, c, h_dst, w_dst, 0.0);
                    }
                    continue;
                }

                let src_h = h as usize + tile.h_src_begin;
                let src_w = w as usize + tile.w_src_begin;

                let color_vals = color_img.map(|img| {
                    let (r, g, b) = read3(img, src_h, src_w);
                    process_color(scale, hdr, snorm, tf, r, g, b)
                });
                write_slot(dst, 0, c_total, color_vals, h_dst, w_dst);

                let albedo_vals = albedo_img.map(|img| {
                    let (r, g, b) = read3(img, src_h, src_w);
                    process_albedo(scale, color_present, tf, r, g, b)
                });
                write_slot(dst, 3, c_total, albedo_vals, h_dst, w_dst);

                let normal_vals = normal_img.map(|img| {
                    let (r, g, b) = read3(img, src_h, src_w);
                    process_normal(scale, color_present, r, g, b)
                });
                write_slot(dst, 6, c_total, normal_vals, h_dst, w_dst);

                for c in 9..c_total {
                    dst.set_f32(0, c, h_dst, w_dst, 0.0);
                }
            }
        }

        Ok(())
    }
}

fn read3(img: &Image, h: usize, w: usize) -> (f32, f32, f32) {
    let r = img.get_f32(h, w, 0);
    let g = if img.channels > 1 { img.get_f32(h, w, 1) } else { r };
    let b = if img.channels > 2 { img.get_f32(h, w, 2) } else { r };
    (r, g, b)
}

fn sanitize_nan(v: [f32; 3]) -> [f32; 3] {
    v.map(|x| if x.is_nan() { 0.0 } else { x })
}

fn process_color(
    scale: f32,
    hdr: bool,
    snorm: bool,
    tf: &dyn TransferFunction,
    r: f32,
    g: f32,
    b: f32,
) -> [f32; 3] {
    let mut v = sanitize_nan([r, g, b]);
    v = v.map(|x| x * scale);
    let lo = if snorm { -1.0 } else { 0.0 };
    let hi = if hdr { f32::INFINITY } else { 1.0 };
    v = v.map(|x| x.clamp(lo, hi));
    if snorm {
        v = v.map(|x| x * 0.5 + 0.5);
    }
    tf.forward(v)
}

fn process_albedo(scale: f32, color_present: bool, tf: &dyn TransferFunction, r: f32, g: f32, b: f32) -> [f32; 3] {
    let mut v = sanitize_nan([r, g, b]);
    if !color_present {
        v = v.map(|x| x * scale);
    }
    v = v.map(|x| x.clamp(0.0, 1.0));
    if !color_present {
        v = tf.forward(v);
    }
    v
}

fn process_normal(scale: f32, color_present: bool, r: f32, g: f32, b: f32) -> [f32; 3] {
    let mut v = sanitize_nan([r, g, b]);
    if !color_present {
        v = v.map(|x| x * scale);
    }
    v = v.map(|x| x.clamp(-1.0, 1.0));
    v.map(|x| x * 0.5 + 0.5)
}

fn write_slot(dst: &mut Tensor, base: usize, c_total: usize, vals: Option<[f32; 3]>, h: usize, w: usize) {
    for i in 0..3 {
        let c = base + i;
        if c >= c_total {
            break;
        }
        let v = vals.map(|v| v[i]).unwrap_or(0.0);
        dst.set_f32(0, c, h, w, v);
    }
}

impl OpBehavior for InputProcess {
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

    fn bind_sources(&mut self, sources: Vec<Tensor>) {
        assert!(sources.is_empty(), "InputProcess has no tensor sources");
    }

    fn support(&self, engine: &dyn Engine) -> bool {
        self.dst_desc.layout == Layout::Chw || self.dst_desc.layout.block_size() == engine.tensor_block_size()
    }

    fn work_amount(&self) -> f64 {
        self.dst_desc.dims.element_count() as f64
    }

    fn finalize(&mut self, _engine: &dyn Engine) -> CoreResult<()> {
        Ok(())
    }
}
