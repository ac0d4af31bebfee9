/// Pixel element format of an external [`Image`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    F32,
    F16,
    U8Srgb,
}

impl PixelFormat {
    pub fn byte_size(&self) -> usize {
        match self {
            PixelFormat::F32 => 4,
            PixelFormat::F16 => 2,
            PixelFormat::U8Srgb => 1,
        }
    }
}

/// An external input/output pixel buffer. Not owned by the graph: the
/// caller is responsible for the backing memory's lifetime.
pub struct Image<'a> {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub format: PixelFormat,
    /// Distance in bytes between the start of consecutive rows.
    pub row_stride: usize,
    pub data: &'a mut [u8],
}

impl<'a> Image<'a> {
    pub fn new(
        height: usize,
        width: usize,
        channels: usize,
        format: PixelFormat,
        row_stride: usize,
        data: &'a mut [u8],
    ) -> Self {
        assert!(height > 0 && width > 0, "image dimensions must be positive");
        assert!(
            row_stride >= width * channels * format.byte_size(),
            "row stride too small for declared width/channels/format"
        );
        Self {
            height,
            width,
            channels,
            format,
            row_stride,
            data,
        }
    }

    /// Reads channel `c` of pixel (h, w) as f32, regardless of on-disk format.
    pub fn get_f32(&self, h: usize, w: usize, c: usize) -> f32 {
        let elem_size = self.format.byte_size();
        let offset = h * self.row_stride + (w * self.channels + c) * elem_size;
        match self.format {
            PixelFormat::F32 => f32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap()),
            PixelFormat::F16 => {
                half::f16::from_le_bytes(self.data[offset..offset + 2].try_into().unwrap()).to_f32()
            }
            PixelFormat::U8Srgb => self.data[offset] as f32 / 255.0,
        }
    }

    /// Writes channel `c` of pixel (h, w) from an f32 value, converting to
    /// the image's on-disk format.
    pub fn set_f32(&mut self, h: usize, w: usize, c: usize, value: f32) {
        let elem_size = self.format.byte_size();
        let offset = h * self.row_stride + (w * self.channels + c) * elem_size;
        match self.format {
            PixelFormat::F32 => {
                self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            }
            PixelFormat::F16 => {
                let v = half::f16::from_f32(value);
                self.data[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
            }
            PixelFormat::U8Srgb => {
                self.data[offset] = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
    }
}
