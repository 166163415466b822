// Textures and texture views
//
// Textures are device-local images. Each one tracks the layout all of its
// subresources are in, so the command list can transition them as a whole
// around copies.

use anyhow::{bail, Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;

use super::device::GraphicsDevice;
use super::types::{PixelFormat, TextureUsage};

const CUBE_FACES: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescription {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    /// Logical array layers. A cubemap layer is six Vulkan image layers.
    pub array_layers: u32,
    pub format: PixelFormat,
    pub usage: TextureUsage,
}

impl TextureDescription {
    pub fn texture_2d(
        width: u32,
        height: u32,
        mip_levels: u32,
        array_layers: u32,
        format: PixelFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            width,
            height,
            mip_levels,
            array_layers,
            format,
            usage,
        }
    }

    pub fn is_cubemap(&self) -> bool {
        self.usage.contains(TextureUsage::CUBEMAP)
    }

    pub fn vulkan_layer_count(&self) -> u32 {
        if self.is_cubemap() {
            self.array_layers * CUBE_FACES
        } else {
            self.array_layers
        }
    }

    /// Width and height of mip level `level`, never below one texel.
    pub fn mip_extent(&self, level: u32) -> (u32, u32) {
        (
            (self.width >> level).max(1),
            (self.height >> level).max(1),
        )
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("Texture dimensions must be non-zero ({}x{})", self.width, self.height);
        }
        if self.mip_levels == 0 || self.array_layers == 0 {
            bail!("Texture needs at least one mip level and one array layer");
        }
        let max_mips = 32 - self.width.max(self.height).leading_zeros();
        if self.mip_levels > max_mips {
            bail!(
                "{} mip levels requested but a {}x{} texture has at most {}",
                self.mip_levels,
                self.width,
                self.height,
                max_mips
            );
        }
        if self.is_cubemap() && self.width != self.height {
            bail!("Cubemap faces must be square ({}x{})", self.width, self.height);
        }
        Ok(())
    }

    pub(crate) fn image_create_info(&self) -> vk::ImageCreateInfo<'static> {
        let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        if self.usage.contains(TextureUsage::SAMPLED) {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }

        let flags = if self.is_cubemap() {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.format.to_vk())
            .extent(vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: 1,
            })
            .mip_levels(self.mip_levels)
            .array_layers(self.vulkan_layer_count())
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
    }

    /// Layout the texture rests in between commands.
    pub(crate) fn resting_layout(&self) -> vk::ImageLayout {
        if self.usage.contains(TextureUsage::SAMPLED) {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        } else {
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        }
    }
}

/// Access mask and pipeline stage that touch an image in `layout`.
pub(crate) fn layout_access(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        }
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

pub struct Texture {
    pub(crate) image: vk::Image,
    allocation: Option<Allocation>,
    description: TextureDescription,
    layout: Mutex<vk::ImageLayout>,
    device: Arc<GraphicsDevice>,
}

impl Texture {
    pub fn new(device: &Arc<GraphicsDevice>, description: &TextureDescription) -> Result<Self> {
        description.validate()?;

        let image_info = description.image_create_info();
        let image = unsafe { device.device.create_image(&image_info, None) }
            .with_context(|| format!("Failed to create {:?} texture", description.format))?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let allocation = match device.allocate("texture", requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            device.free(allocation);
            unsafe { device.device.destroy_image(image, None) };
            return Err(e).context("Failed to bind texture memory");
        }

        log::debug!(
            "Created texture: {}x{}, {} mips, {} layers, {:?}, {:?}",
            description.width,
            description.height,
            description.mip_levels,
            description.array_layers,
            description.format,
            description.usage
        );

        Ok(Self {
            image,
            allocation: Some(allocation),
            description: *description,
            layout: Mutex::new(vk::ImageLayout::UNDEFINED),
            device: device.clone(),
        })
    }

    pub fn description(&self) -> &TextureDescription {
        &self.description
    }

    pub fn width(&self) -> u32 {
        self.description.width
    }

    pub fn height(&self) -> u32 {
        self.description.height
    }

    pub(crate) fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: self.description.mip_levels,
            base_array_layer: 0,
            layer_count: self.description.vulkan_layer_count(),
        }
    }

    /// Record a barrier moving every subresource into `new_layout`.
    pub(crate) fn transition(&self, command_buffer: vk::CommandBuffer, new_layout: vk::ImageLayout) {
        let mut layout = self.layout.lock();
        if *layout == new_layout {
            return;
        }

        let (src_access, src_stage) = layout_access(*layout);
        let (dst_access, dst_stage) = layout_access(new_layout);

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(*layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.full_range())
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);

        unsafe {
            self.device.device.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }

        *layout = new_layout;
    }

    /// Return to the layout the texture rests in between commands.
    pub(crate) fn transition_to_resting(&self, command_buffer: vk::CommandBuffer) {
        self.transition(command_buffer, self.description.resting_layout());
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_image(self.image, None) };
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

/// Shader-visible view over every mip and layer of a texture.
pub struct TextureView {
    pub(crate) view: vk::ImageView,
    device: Arc<GraphicsDevice>,
}

impl TextureView {
    pub fn new(device: &Arc<GraphicsDevice>, texture: &Texture) -> Result<Self> {
        let desc = texture.description();
        if !desc.usage.contains(TextureUsage::SAMPLED) {
            bail!("Texture views need a texture created with TextureUsage::SAMPLED");
        }

        let view_type = match (desc.is_cubemap(), desc.array_layers > 1) {
            (true, false) => vk::ImageViewType::CUBE,
            (true, true) => vk::ImageViewType::CUBE_ARRAY,
            (false, false) => vk::ImageViewType::TYPE_2D,
            (false, true) => vk::ImageViewType::TYPE_2D_ARRAY,
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(texture.image)
            .view_type(view_type)
            .format(desc.format.to_vk())
            .subresource_range(texture.full_range());

        let view = unsafe { device.device.create_image_view(&view_info, None) }
            .context("Failed to create texture view")?;

        Ok(Self {
            view,
            device: device.clone(),
        })
    }
}

impl Drop for TextureView {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_image_view(self.view, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba(usage: TextureUsage) -> TextureDescription {
        TextureDescription::texture_2d(512, 512, 1, 1, PixelFormat::R8G8B8A8UNorm, usage)
    }

    #[test]
    fn cubemap_owns_six_faces_per_layer() {
        assert_eq!(rgba(TextureUsage::CUBEMAP).vulkan_layer_count(), 6);
        assert_eq!(rgba(TextureUsage::SAMPLED).vulkan_layer_count(), 1);

        let info = rgba(TextureUsage::CUBEMAP).image_create_info();
        assert!(info.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
        assert_eq!(info.array_layers, 6);
    }

    #[test]
    fn sampled_flag_controls_image_usage() {
        let sampled = rgba(TextureUsage::SAMPLED).image_create_info();
        assert!(sampled.usage.contains(vk::ImageUsageFlags::SAMPLED));

        let cube = rgba(TextureUsage::CUBEMAP).image_create_info();
        assert!(!cube.usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(cube.usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn mip_extent_halves_down_to_one() {
        let desc = TextureDescription::texture_2d(256, 64, 9, 1, PixelFormat::R8G8B8A8UNorm, TextureUsage::SAMPLED);
        assert_eq!(desc.mip_extent(0), (256, 64));
        assert_eq!(desc.mip_extent(1), (128, 32));
        assert_eq!(desc.mip_extent(7), (2, 1));
        assert_eq!(desc.mip_extent(8), (1, 1));
    }

    #[test]
    fn invalid_descriptions_rejected() {
        assert!(rgba(TextureUsage::SAMPLED).validate().is_ok());

        let too_many_mips =
            TextureDescription::texture_2d(4, 4, 4, 1, PixelFormat::R8G8B8A8UNorm, TextureUsage::SAMPLED);
        assert!(too_many_mips.validate().is_err());

        let non_square_cube =
            TextureDescription::texture_2d(8, 4, 1, 1, PixelFormat::R8G8B8A8UNorm, TextureUsage::CUBEMAP);
        assert!(non_square_cube.validate().is_err());

        let empty = TextureDescription::texture_2d(0, 4, 1, 1, PixelFormat::R8G8B8A8UNorm, TextureUsage::SAMPLED);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn shader_read_waits_on_fragment_stage() {
        let (access, stage) = layout_access(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(access, vk::AccessFlags::SHADER_READ);
        assert_eq!(stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }
}
