use std::sync::Arc;

/// Pixel formats the frame core understands.
///
/// `Unspecified` is the "no conversion requested" sentinel on pulls, never a
/// storable format. `Hardware` is an opaque device-resident payload: it has
/// no byte size and is never deep-copied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Unspecified,
    Rgb,
    Rgba,
    Yuv422,
    Yuv420p,
    Yuv422p16,
    Yuv420p10,
    Yuv444p10,
    Hardware,
}

/// Byte size of an image in `format` at `width` x `height`, or 0 for
/// formats without an addressable byte layout.
pub fn format_size(format: ImageFormat, width: i32, height: i32) -> usize {
    if width <= 0 || height <= 0 {
        return 0;
    }
    let (w, h) = (width as usize, height as usize);
    match format {
        ImageFormat::Unspecified | ImageFormat::Hardware => 0,
        ImageFormat::Rgb => w * h * 3,
        ImageFormat::Rgba => w * h * 4,
        ImageFormat::Yuv422 => w * h * 2,
        ImageFormat::Yuv420p => w * h + 2 * (w / 2) * (h / 2),
        ImageFormat::Yuv422p16 => (w * h + 2 * (w / 2) * h) * 2,
        ImageFormat::Yuv420p10 => (w * h + 2 * (w / 2) * (h / 2)) * 2,
        ImageFormat::Yuv444p10 => w * h * 3 * 2,
    }
}

/// A materialized image: payload bytes plus the parameters actually
/// achieved. The payload is shared by `Arc`; shallow clones alias it and
/// `Arc::ptr_eq` is the aliasing observable.
#[derive(Clone, Debug)]
pub struct Image {
    pub format: ImageFormat,
    pub width: i32,
    pub height: i32,
    pub data: Arc<Vec<u8>>,
}

impl Image {
    /// Zero-filled image of the given geometry.
    pub fn alloc(format: ImageFormat, width: i32, height: i32) -> Self {
        Self {
            format,
            width,
            height,
            data: Arc::new(vec![0u8; format_size(format, width, height)]),
        }
    }

    pub fn from_data(format: ImageFormat, width: i32, height: i32, data: Vec<u8>) -> Self {
        Self {
            format,
            width,
            height,
            data: Arc::new(data),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat fill with a single luma level, neutral chroma, opaque alpha.
    /// `full_range` selects full-swing white (255) over legal-range (235).
    pub fn fill_white(&mut self, full_range: bool) {
        let luma = if full_range { 255 } else { 235 };
        self.fill_luma(|_, _| luma);
    }

    /// Two-tone checkerboard. Cell width is scaled by the sample aspect
    /// ratio so cells display square on non-square-pixel targets.
    pub fn fill_checkerboard(&mut self, sample_aspect: f64) {
        let cell_h = (self.height / 16).max(1);
        let sar = if sample_aspect > 0.0 { sample_aspect } else { 1.0 };
        let cell_w = ((f64::from(cell_h) * sar).round() as i32).max(1);
        self.fill_luma(move |x, y| {
            if ((x / cell_w) + (y / cell_h)) % 2 == 0 {
                0x66
            } else {
                0x99
            }
        });
    }

    /// Write a per-pixel luma function into the payload, format-aware:
    /// packed formats replicate luma into color channels, planar YUV
    /// formats get a neutral chroma plane.
    fn fill_luma(&mut self, luma: impl Fn(i32, i32) -> u8) {
        let (w, h) = (self.width, self.height);
        if w <= 0 || h <= 0 {
            return;
        }
        let data = Arc::make_mut(&mut self.data);
        match self.format {
            ImageFormat::Unspecified | ImageFormat::Hardware => {}
            ImageFormat::Rgb => {
                for y in 0..h {
                    for x in 0..w {
                        let v = luma(x, y);
                        let i = ((y * w + x) * 3) as usize;
                        data[i..i + 3].fill(v);
                    }
                }
            }
            ImageFormat::Rgba => {
                for y in 0..h {
                    for x in 0..w {
                        let v = luma(x, y);
                        let i = ((y * w + x) * 4) as usize;
                        data[i..i + 3].fill(v);
                        data[i + 3] = 0xFF;
                    }
                }
            }
            ImageFormat::Yuv422 => {
                // Packed Y0 U Y1 V, chroma at odd bytes.
                for y in 0..h {
                    for x in 0..w {
                        let i = ((y * w + x) * 2) as usize;
                        data[i] = luma(x, y);
                        data[i + 1] = 128;
                    }
                }
            }
            ImageFormat::Yuv420p => {
                fill_planar(data, w, h, 1, &luma, 128, 0);
            }
            ImageFormat::Yuv422p16 => {
                fill_planar(data, w, h, 2, &luma, 128, 8);
            }
            ImageFormat::Yuv420p10 => {
                fill_planar(data, w, h, 2, &luma, 2, 2);
            }
            ImageFormat::Yuv444p10 => {
                fill_planar(data, w, h, 2, &luma, 2, 2);
            }
        }
    }
}

/// Fill a planar YUV layout: luma plane from the closure, everything after
/// it (the chroma planes) at their neutral midpoint. `shift` positions an
/// 8-bit level inside a wider sample; `chroma_hi` is the high byte of the
/// neutral chroma sample.
fn fill_planar(
    data: &mut [u8],
    w: i32,
    h: i32,
    bytes: usize,
    luma: &impl Fn(i32, i32) -> u8,
    chroma_hi: u8,
    shift: u32,
) {
    let (wu, hu) = (w as usize, h as usize);
    let luma_plane = wu * hu * bytes;
    for y in 0..h {
        for x in 0..w {
            let i = ((y * w + x) as usize) * bytes;
            let v = u16::from(luma(x, y)) << shift;
            if bytes == 2 {
                data[i] = (v & 0xFF) as u8;
                data[i + 1] = (v >> 8) as u8;
            } else {
                data[i] = v as u8;
            }
        }
    }
    for sample in data[luma_plane..].chunks_exact_mut(bytes) {
        if bytes == 2 {
            // Neutral chroma midpoint, little-endian.
            sample[0] = 0;
            sample[1] = chroma_hi;
        } else {
            sample[0] = chroma_hi;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_sizes() {
        assert_eq!(format_size(ImageFormat::Rgb, 720, 576), 720 * 576 * 3);
        assert_eq!(format_size(ImageFormat::Rgba, 720, 576), 720 * 576 * 4);
        assert_eq!(format_size(ImageFormat::Yuv422, 720, 576), 720 * 576 * 2);
        assert_eq!(
            format_size(ImageFormat::Yuv420p, 720, 576),
            720 * 576 * 3 / 2
        );
        assert_eq!(format_size(ImageFormat::Yuv444p10, 4, 4), 4 * 4 * 6);
        assert_eq!(format_size(ImageFormat::Hardware, 720, 576), 0);
        assert_eq!(format_size(ImageFormat::Rgb, 0, 576), 0);
        assert_eq!(format_size(ImageFormat::Rgb, 720, -1), 0);
    }

    #[test]
    fn white_fill_respects_range() {
        let mut legal = Image::alloc(ImageFormat::Rgb, 4, 4);
        legal.fill_white(false);
        assert!(legal.data.iter().all(|&b| b == 235));

        let mut full = Image::alloc(ImageFormat::Rgb, 4, 4);
        full.fill_white(true);
        assert!(full.data.iter().all(|&b| b == 255));
    }

    #[test]
    fn white_fill_yuv422_neutral_chroma() {
        let mut img = Image::alloc(ImageFormat::Yuv422, 4, 2);
        img.fill_white(false);
        for pair in img.data.chunks_exact(2) {
            assert_eq!(pair[0], 235);
            assert_eq!(pair[1], 128);
        }
    }

    #[test]
    fn checkerboard_has_two_levels() {
        let mut img = Image::alloc(ImageFormat::Rgb, 64, 64);
        img.fill_checkerboard(1.0);
        let mut seen: Vec<u8> = img.data.iter().copied().collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen, vec![0x66, 0x99]);
    }

    #[test]
    fn fill_copies_before_writing_shared_payload() {
        let mut a = Image::alloc(ImageFormat::Rgb, 4, 4);
        let b = a.clone();
        a.fill_white(true);
        assert!(b.data.iter().all(|&v| v == 0));
        assert!(!Arc::ptr_eq(&a.data, &b.data));
    }
}
