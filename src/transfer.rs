//! Transfer functions: forward/inverse tone curves with an input-scale
//! autoexposure factor.
//!
//! Small, generic free functions over elementwise numeric data; the
//! transforms run on a single pixel's 3-vector rather than a whole tile,
//! since they are called from inside `InputProcess`/`OutputProcess`, not as
//! standalone graph ops.

use crate::primitives::Image;

pub type Vec3 = [f32; 3];

/// Forward/inverse tone curve with an autoexposure-carrying input scale.
pub trait TransferFunction: Send + Sync {
    fn input_scale(&self) -> f32;
    fn forward(&self, v: Vec3) -> Vec3;
    fn inverse(&self, v: Vec3) -> Vec3;
}

fn map3(v: Vec3, f: impl Fn(f32) -> f32) -> Vec3 {
    [f(v[0]), f(v[1]), f(v[2])]
}

/// Identity tone curve.
#[derive(Clone, Copy, Debug)]
pub struct Linear {
    pub input_scale: f32,
}

impl Default for Linear {
    fn default() -> Self {
        Self { input_scale: 1.0 }
    }
}

impl TransferFunction for Linear {
    fn input_scale(&self) -> f32 {
        self.input_scale
    }
    fn forward(&self, v: Vec3) -> Vec3 {
        v
    }
    fn inverse(&self, v: Vec3) -> Vec3 {
        v
    }
}

/// The standard sRGB EOTF/OETF pair, with a configurable autoexposure scale.
#[derive(Clone, Copy, Debug)]
pub struct Srgb {
    pub input_scale: f32,
}

impl Default for Srgb {
    fn default() -> Self {
        Self { input_scale: 1.0 }
    }
}

impl Srgb {
    fn forward_scalar(x: f32) -> f32 {
        let x = x.max(0.0);
        if x <= 0.0031308 {
            12.92 * x
        } else {
            1.055 * x.powf(1.0 / 2.4) - 0.055
        }
    }

    fn inverse_scalar(x: f32) -> f32 {
        let x = x.max(0.0);
        if x <= 0.04045 {
            x / 12.92
        } else {
            ((x + 0.055) / 1.055).powf(2.4)
        }
    }
}

impl TransferFunction for Srgb {
    fn input_scale(&self) -> f32 {
        self.input_scale
    }
    fn forward(&self, v: Vec3) -> Vec3 {
        map3(v, Self::forward_scalar)
    }
    fn inverse(&self, v: Vec3) -> Vec3 {
        map3(v, Self::inverse_scalar)
    }
}

/// Perceptually-uniform tone curve for HDR, following a PU21-style
/// piecewise formulation: a linear segment near zero, then a power
/// segment, then a log segment for high luminance. Constants are named
/// associated consts rather than inline magic numbers.
#[derive(Clone, Copy, Debug)]
pub struct Pu {
    pub input_scale: f32,
}

impl Pu {
    const KNEE_LO: f32 = 0.003_424;
    const KNEE_HI: f32 = 7.775_09;
    const SLOPE_LO: f32 = 17.766_08;
    const POW_GAMMA: f32 = 0.315_69;
    const POW_SCALE: f32 = 6.733_31;
    const POW_OFFSET: f32 = -0.578_99;
    const LOG_SCALE: f32 = 0.296_96;
    const LOG_OFFSET: f32 = 4.342_44;
    const NORMALIZER: f32 = 31.850_65;

    fn forward_scalar(x: f32) -> f32 {
        let x = x.max(0.0);
        let y = if x < Self::KNEE_LO {
            Self::SLOPE_LO * x
        } else if x < Self::KNEE_HI {
            Self::POW_SCALE * x.powf(Self::POW_GAMMA) + Self::POW_OFFSET
        } else {
            Self::LOG_SCALE * x.ln() + Self::LOG_OFFSET
        };
        (y / Self::NORMALIZER).clamp(0.0, 1.0)
    }

    fn inverse_scalar(y: f32) -> f32 {
        let y = y.clamp(0.0, 1.0) * Self::NORMALIZER;
        let knee_lo_y = Self::SLOPE_LO * Self::KNEE_LO;
        let knee_hi_y = Self::POW_SCALE * Self::KNEE_HI.powf(Self::POW_GAMMA) + Self::POW_OFFSET;
        if y < knee_lo_y {
            y / Self::SLOPE_LO
        } else if y < knee_hi_y {
            ((y - Self::POW_OFFSET) / Self::POW_SCALE).powf(1.0 / Self::POW_GAMMA)
        } else {
            ((y - Self::LOG_OFFSET) / Self::LOG_SCALE).exp()
        }
    }
}

impl TransferFunction for Pu {
    fn input_scale(&self) -> f32 {
        self.input_scale
    }
    fn forward(&self, v: Vec3) -> Vec3 {
        map3(v, Self::forward_scalar)
    }
    fn inverse(&self, v: Vec3) -> Vec3 {
        map3(v, Self::inverse_scalar)
    }
}

/// Robust scene-linear autoexposure scale: the reciprocal of a high
/// percentile of finite, non-negative luminance samples. Autoexposure is
/// folded into a transfer function's `input_scale`; this helper computes a
/// scale a caller can plug in before building the graph — the graph itself
/// never computes it.
pub fn autoexposure(image: &Image) -> f32 {
    let mut luminances: Vec<f32> = Vec::with_capacity(image.height * image.width);
    for h in 0..image.height {
        for w in 0..image.width {
            let r = image.get_f32(h, w, 0);
            let g = if image.channels > 1 { image.get_f32(h, w, 1) } else { r };
            let b = if image.channels > 2 { image.get_f32(h, w, 2) } else { r };
            let lum = 0.212_6 * r + 0.715_2 * g + 0.072_2 * b;
            if lum.is_finite() && lum >= 0.0 {
                luminances.push(lum);
            }
        }
    }
    if luminances.is_empty() {
        return 1.0;
    }
    luminances.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((luminances.len() as f32) * 0.95) as usize;
    let idx = idx.min(luminances.len() - 1);
    let key_value = luminances[idx].max(1e-8);
    0.18 / key_value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() <= eps
    }

    #[test]
    fn srgb_round_trips() {
        let tf = Srgb::default();
        let v = [0.2, 0.5, 0.8];
        let back = tf.inverse(tf.forward(v));
        for i in 0..3 {
            assert!(approx_eq(v[i], back[i], 1e-4));
        }
    }

    #[test]
    fn pu_round_trips_across_knees() {
        let tf = Pu::default_for_test();
        for &x in &[0.0005f32, 0.01, 1.0, 50.0, 5000.0] {
            let y = tf.forward([x, x, x]);
            let back = tf.inverse(y);
            assert!(approx_eq(back[0], x, x.max(1.0) * 1e-2), "x={x} back={}", back[0]);
        }
    }

    impl Pu {
        fn default_for_test() -> Self {
            Self { input_scale: 1.0 }
        }
    }

    #[test]
    fn linear_is_identity() {
        let tf = Linear::default();
        let v = [0.1, -2.0, 3.5];
        assert_eq!(tf.forward(v), v);
        assert_eq!(tf.inverse(v), v);
    }
}
