use std::path::Path;

use anyhow::{Context, Result};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

/// Pixel format of every frame, on the CPU and the GPU: 8-bit RGBA,
/// values stored as-is (the scene rasterizer already encodes sRGB).
pub const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Tightly packed RGBA8 image, row-major, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl CpuFrame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width as usize) * (height as usize) * 4],
        }
    }

    /// Wrap existing RGBA bytes. Returns `None` if the length does not match.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == (width as usize) * (height as usize) * 4).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn index(&self, x: u32, y: u32) -> usize {
        ((y as usize) * (self.width as usize) + x as usize) * 4
    }

    pub fn get(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.index(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    pub fn put(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.index(x, y);
        self.data[i..i + 4].copy_from_slice(&rgba);
    }

    /// Nearest-texel lookup with clamp-to-edge addressing, like the sampler
    /// bound to every GPU pass.
    pub fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0; 4];
        }
        let texel = |t: f32, n: u32| ((t * n as f32).floor().max(0.0) as u32).min(n - 1);
        let px = self.get(texel(uv[0], self.width), texel(uv[1], self.height));
        px.map(|c| c as f32 / 255.0)
    }

    /// FNV-1a over size and pixels. Cheap frame identity for comparisons.
    pub fn checksum(&self) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        let dims = [self.width.to_le_bytes(), self.height.to_le_bytes()];
        for byte in dims.iter().flatten().chain(self.data.iter()) {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        PngEncoder::new(std::io::BufWriter::new(file))
            .write_image(&self.data, self.width, self.height, ExtendedColorType::Rgba8)
            .with_context(|| format!("Failed to encode {}", path.display()))?;
        Ok(())
    }
}

/// Convert a shaded color to RGBA8, clamping to [0, 1].
pub fn to_rgba8(color: [f32; 4]) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

/// Row stride the GPU requires for texture/buffer copies.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_hits_pixel_centers() {
        let mut frame = CpuFrame::new(4, 2);
        frame.put(3, 1, [255, 0, 0, 255]);
        assert_eq!(frame.sample([3.5 / 4.0, 1.5 / 2.0]), [1.0, 0.0, 0.0, 1.0]);
        // clamp to edge
        assert_eq!(frame.sample([2.0, 2.0]), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(frame.sample([-1.0, -1.0]), [0.0; 4]);
    }

    #[test]
    fn checksum_tracks_content_and_size() {
        let a = CpuFrame::new(2, 2);
        let mut b = a.clone();
        assert_eq!(a.checksum(), b.checksum());
        b.put(0, 0, [1, 0, 0, 0]);
        assert_ne!(a.checksum(), b.checksum());
        assert_ne!(CpuFrame::new(4, 1).checksum(), CpuFrame::new(1, 4).checksum());
    }

    #[test]
    fn from_rgba_checks_length() {
        assert!(CpuFrame::from_rgba(2, 2, vec![0; 16]).is_some());
        assert!(CpuFrame::from_rgba(2, 2, vec![0; 15]).is_none());
    }

    #[test]
    fn rgba8_conversion_rounds_and_clamps() {
        assert_eq!(to_rgba8([1.5, -0.2, 0.5, 1.0]), [255, 0, 128, 255]);
    }

    #[test]
    fn rows_are_padded_for_copies() {
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
    }
}
