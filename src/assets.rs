// Image assets
//
// Decodes an image file into RGBA8 with a full CPU-generated mip chain and
// uploads it into a sampled device texture through a staging buffer.

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::path::Path;
use std::sync::Arc;

use crate::backend::{
    BufferDescription, BufferUsage, CommandList, DeviceBuffer, GraphicsDevice, PixelFormat, Texture,
    TextureDescription, TextureUsage,
};

/// Number of levels in a full mip chain down to 1x1.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Decoded image plus its mip chain, level 0 first.
pub struct ImageTexture {
    mips: Vec<RgbaImage>,
}

impl ImageTexture {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to load image {:?}", path))?
            .to_rgba8();
        log::info!(
            "Loaded image {:?} ({}x{})",
            path,
            image.width(),
            image.height()
        );
        Ok(Self::from_image(image))
    }

    pub fn from_image(image: RgbaImage) -> Self {
        let levels = mip_level_count(image.width(), image.height());
        let mut mips = Vec::with_capacity(levels as usize);
        mips.push(image);

        for _ in 1..levels {
            let Some(previous) = mips.last() else { break };
            let width = (previous.width() / 2).max(1);
            let height = (previous.height() / 2).max(1);
            let next = imageops::resize(previous, width, height, FilterType::Triangle);
            mips.push(next);
        }

        Self { mips }
    }

    pub fn width(&self) -> u32 {
        self.mips[0].width()
    }

    pub fn height(&self) -> u32 {
        self.mips[0].height()
    }

    pub fn mip_levels(&self) -> u32 {
        self.mips.len() as u32
    }

    pub fn format(&self) -> PixelFormat {
        PixelFormat::R8G8B8A8UNorm
    }

    pub fn mips(&self) -> &[RgbaImage] {
        &self.mips
    }

    /// Byte offset of every mip level inside one packed staging buffer, plus the total size.
    fn staging_layout(&self) -> (Vec<u64>, u64) {
        let mut offsets = Vec::with_capacity(self.mips.len());
        let mut total = 0u64;
        for mip in &self.mips {
            offsets.push(total);
            total += mip.as_raw().len() as u64;
        }
        (offsets, total)
    }

    /// Upload into a new sampled texture and wait for the copy to finish.
    pub fn create_device_texture(&self, device: &Arc<GraphicsDevice>) -> Result<Texture> {
        let texture = Texture::new(
            device,
            &TextureDescription::texture_2d(
                self.width(),
                self.height(),
                self.mip_levels(),
                1,
                self.format(),
                TextureUsage::SAMPLED,
            ),
        )?;

        let (offsets, total) = self.staging_layout();
        let staging = DeviceBuffer::new(device, &BufferDescription::new(total, BufferUsage::STAGING))?;
        for (mip, offset) in self.mips.iter().zip(&offsets) {
            device.update_buffer(&staging, *offset, mip.as_raw())?;
        }

        let mut cl = CommandList::new(device)?;
        cl.begin()?;
        for (level, offset) in offsets.iter().enumerate() {
            cl.copy_buffer_to_texture(&staging, *offset, &texture, level as u32, 0)?;
        }
        cl.end()?;
        device.submit_commands(&cl)?;
        device.wait_for_idle()?;

        log::debug!(
            "Uploaded {}x{} texture with {} mip levels",
            self.width(),
            self.height(),
            self.mip_levels()
        );

        Ok(texture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_count_reaches_one_texel() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(2, 2), 2);
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(512, 100), 10);
        assert_eq!(mip_level_count(300, 17), 9);
    }

    #[test]
    fn mip_chain_halves_each_level() {
        let image = RgbaImage::from_pixel(8, 4, image::Rgba([255, 0, 0, 255]));
        let texture = ImageTexture::from_image(image);

        let sizes: Vec<(u32, u32)> = texture.mips().iter().map(|m| m.dimensions()).collect();
        assert_eq!(sizes, vec![(8, 4), (4, 2), (2, 1), (1, 1)]);
        assert_eq!(texture.mip_levels(), 4);
    }

    #[test]
    fn solid_color_survives_downsampling() {
        let image = RgbaImage::from_pixel(16, 16, image::Rgba([10, 20, 30, 255]));
        let texture = ImageTexture::from_image(image);
        let last = texture.mips().last().unwrap();
        assert_eq!(last.get_pixel(0, 0), &image::Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn staging_layout_packs_levels() {
        let texture = ImageTexture::from_image(RgbaImage::new(4, 4));
        let (offsets, total) = texture.staging_layout();
        assert_eq!(offsets, vec![0, 64, 80]);
        assert_eq!(total, 84);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = match ImageTexture::from_path("no/such/image.png") {
            Ok(_) => panic!("loading a missing file succeeded"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("image.png"));
    }
}
