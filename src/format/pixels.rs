//! In-memory pixel buffers.
//!
//! Every decoder in the crate produces a [`Raster`]: interleaved samples
//! widened to `u16`, whatever the source bit depth. The histogram engine and
//! the pyramidal TIFF writer consume it.

use image::DynamicImage;

/// Interleaved pixel samples, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub channels: usize,

    /// Significant bits per sample (8 or 16)
    pub bits: u8,

    pub samples: Vec<u16>,
}

impl Raster {
    /// Zero-filled raster.
    pub fn new(width: u32, height: u32, channels: usize, bits: u8) -> Self {
        Self {
            width,
            height,
            channels,
            bits,
            samples: vec![0; width as usize * height as usize * channels],
        }
    }

    #[inline]
    pub fn n_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels
    }

    /// Values of one channel, in raster order.
    pub fn channel_values(&self, channel: usize) -> impl Iterator<Item = u16> + '_ {
        self.samples
            .iter()
            .skip(channel)
            .step_by(self.channels.max(1))
            .copied()
    }

    /// Convert a decoded image, keeping 8 or 16 bit depth.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let widen = |raw: Vec<u8>| raw.into_iter().map(u16::from).collect::<Vec<u16>>();

        let (channels, bits, samples) = match image {
            DynamicImage::ImageLuma8(buf) => (1, 8, widen(buf.into_raw())),
            DynamicImage::ImageLumaA8(buf) => (2, 8, widen(buf.into_raw())),
            DynamicImage::ImageRgb8(buf) => (3, 8, widen(buf.into_raw())),
            DynamicImage::ImageRgba8(buf) => (4, 8, widen(buf.into_raw())),
            DynamicImage::ImageLuma16(buf) => (1, 16, buf.into_raw()),
            DynamicImage::ImageLumaA16(buf) => (2, 16, buf.into_raw()),
            DynamicImage::ImageRgb16(buf) => (3, 16, buf.into_raw()),
            DynamicImage::ImageRgba16(buf) => (4, 16, buf.into_raw()),
            other if other.color().has_alpha() => (4, 16, other.to_rgba16().into_raw()),
            other => (3, 16, other.to_rgb16().into_raw()),
        };

        Self {
            width,
            height,
            channels,
            bits,
            samples,
        }
    }

    /// Copy `tile` with its top-left corner at (`x`, `y`), clipped to bounds.
    pub fn blit(&mut self, tile: &Raster, x: u32, y: u32) {
        if x >= self.width || y >= self.height || tile.channels != self.channels {
            return;
        }
        let copy_w = tile.width.min(self.width - x) as usize * self.channels;
        let rows = tile.height.min(self.height - y);

        for row in 0..rows {
            let src = tile.index(0, row);
            let dst = self.index(x, y + row);
            self.samples[dst..dst + copy_w].copy_from_slice(&tile.samples[src..src + copy_w]);
        }
    }

    /// Samples of the `tile_w` x `tile_h` block at (`x`, `y`), zero padded
    /// past the right and bottom edges.
    pub fn tile_samples(&self, x: u32, y: u32, tile_w: u32, tile_h: u32) -> Vec<u16> {
        let row_len = tile_w as usize * self.channels;
        let mut out = vec![0u16; row_len * tile_h as usize];
        if x >= self.width || y >= self.height {
            return out;
        }
        let copy_w = tile_w.min(self.width - x) as usize * self.channels;

        for row in 0..tile_h.min(self.height - y) {
            let src = self.index(x, y + row);
            let dst = row as usize * row_len;
            out[dst..dst + copy_w].copy_from_slice(&self.samples[src..src + copy_w]);
        }
        out
    }

    /// Halve both dimensions (floor) by averaging 2x2 blocks.
    pub fn halve(&self) -> Raster {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let mut out = Raster::new(width, height, self.channels, self.bits);

        for y in 0..height {
            let y0 = (2 * y).min(self.height - 1);
            let y1 = (2 * y + 1).min(self.height - 1);
            for x in 0..width {
                let x0 = (2 * x).min(self.width - 1);
                let x1 = (2 * x + 1).min(self.width - 1);
                let dst = out.index(x, y);
                for c in 0..self.channels {
                    let sum = self.samples[self.index(x0, y0) + c] as u32
                        + self.samples[self.index(x1, y0) + c] as u32
                        + self.samples[self.index(x0, y1) + c] as u32
                        + self.samples[self.index(x1, y1) + c] as u32;
                    out.samples[dst + c] = ((sum + 2) / 4) as u16;
                }
            }
        }
        out
    }

    /// Shrink by an integer box factor so the longest side is at most
    /// `max_length`. Returns a clone when it already fits.
    pub fn downscale_to_fit(&self, max_length: u32) -> Raster {
        let longest = self.width.max(self.height);
        if max_length == 0 || longest <= max_length {
            return self.clone();
        }

        let factor = longest.div_ceil(max_length);
        let width = (self.width / factor).max(1);
        let height = (self.height / factor).max(1);
        let mut out = Raster::new(width, height, self.channels, self.bits);
        let mut sums = vec![0u64; self.channels];

        for y in 0..height {
            for x in 0..width {
                sums.iter_mut().for_each(|s| *s = 0);
                let mut n = 0u64;
                for sy in (y * factor)..((y + 1) * factor).min(self.height) {
                    for sx in (x * factor)..((x + 1) * factor).min(self.width) {
                        let src = self.index(sx, sy);
                        for (c, sum) in sums.iter_mut().enumerate() {
                            *sum += self.samples[src + c] as u64;
                        }
                        n += 1;
                    }
                }
                let dst = out.index(x, y);
                for (c, sum) in sums.iter().enumerate() {
                    out.samples[dst + c] = ((sum + n / 2) / n.max(1)) as u16;
                }
            }
        }
        out
    }
}
