// Shared descriptor types
//
// Plain-data enums and flag sets used by the resource factory and the
// command list, plus their mapping onto Vulkan enums.

use anyhow::{bail, Result};
use ash::vk;
use std::ops::BitOr;

/// Pixel formats understood by the samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8G8B8A8UNorm,
    B8G8R8A8UNorm,
    R16UNorm,
    R16Float,
    R32Float,
    D32Float,
    D24UNormS8UInt,
}

impl PixelFormat {
    /// Vulkan format when used as a color or sampled image.
    pub fn to_vk(self) -> vk::Format {
        match self {
            PixelFormat::R8G8B8A8UNorm => vk::Format::R8G8B8A8_UNORM,
            PixelFormat::B8G8R8A8UNorm => vk::Format::B8G8R8A8_UNORM,
            PixelFormat::R16UNorm => vk::Format::R16_UNORM,
            PixelFormat::R16Float => vk::Format::R16_SFLOAT,
            PixelFormat::R32Float => vk::Format::R32_SFLOAT,
            PixelFormat::D32Float => vk::Format::D32_SFLOAT,
            PixelFormat::D24UNormS8UInt => vk::Format::D24_UNORM_S8_UINT,
        }
    }

    /// Vulkan format when used as a depth attachment.
    ///
    /// Single-channel color formats are accepted and mapped to the depth
    /// format of the same width (`R16UNorm` -> `D16_UNORM`).
    pub fn to_depth_vk(self) -> Result<vk::Format> {
        Ok(match self {
            PixelFormat::R16UNorm => vk::Format::D16_UNORM,
            PixelFormat::R32Float | PixelFormat::D32Float => vk::Format::D32_SFLOAT,
            PixelFormat::D24UNormS8UInt => vk::Format::D24_UNORM_S8_UINT,
            other => bail!("{:?} cannot be used as a depth format", other),
        })
    }

    pub fn size_in_bytes(self) -> u32 {
        match self {
            PixelFormat::R16UNorm | PixelFormat::R16Float => 2,
            PixelFormat::R8G8B8A8UNorm
            | PixelFormat::B8G8R8A8UNorm
            | PixelFormat::R32Float
            | PixelFormat::D32Float
            | PixelFormat::D24UNormS8UInt => 4,
        }
    }
}

/// Options fixed at device creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphicsDeviceOptions {
    /// Enable validation layers and route their output into `log`.
    pub debug: bool,
    /// Depth attachment format of the main swapchain. Ignored by headless devices.
    pub swapchain_depth_format: Option<PixelFormat>,
    /// Present with FIFO (vsync) instead of the lowest-latency mode available.
    pub sync_to_vertical_blank: bool,
}

impl GraphicsDeviceOptions {
    pub fn new(
        debug: bool,
        swapchain_depth_format: Option<PixelFormat>,
        sync_to_vertical_blank: bool,
    ) -> Self {
        Self {
            debug,
            swapchain_depth_format,
            sync_to_vertical_blank,
        }
    }
}

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            $($(#[$fmeta])* pub const $flag: Self = Self($bit);)+

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

flag_set! {
    /// How a texture may be used.
    TextureUsage {
        SAMPLED = 1 << 0,
        /// Six faces per array layer, viewable as a cube.
        CUBEMAP = 1 << 1,
    }
}

flag_set! {
    /// How a buffer may be bound.
    BufferUsage {
        VERTEX = 1 << 0,
        INDEX = 1 << 1,
        UNIFORM = 1 << 2,
        /// Host-written source of a buffer-to-texture copy.
        STAGING = 1 << 3,
    }
}

flag_set! {
    /// Shader stages a resource is visible to.
    ShaderStages {
        VERTEX = 1 << 0,
        FRAGMENT = 1 << 1,
    }
}

impl ShaderStages {
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        let mut flags = vk::ShaderStageFlags::empty();
        if self.contains(ShaderStages::VERTEX) {
            flags |= vk::ShaderStageFlags::VERTEX;
        }
        if self.contains(ShaderStages::FRAGMENT) {
            flags |= vk::ShaderStageFlags::FRAGMENT;
        }
        flags
    }
}

/// Kind of resource bound at a resource-layout slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    UniformBuffer,
    TextureReadOnly,
    Sampler,
}

impl ResourceKind {
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            ResourceKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            ResourceKind::TextureReadOnly => vk::DescriptorType::SAMPLED_IMAGE,
            ResourceKind::Sampler => vk::DescriptorType::SAMPLER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    UInt16,
    UInt32,
}

impl IndexFormat {
    pub fn to_vk(self) -> vk::IndexType {
        match self {
            IndexFormat::UInt16 => vk::IndexType::UINT16,
            IndexFormat::UInt32 => vk::IndexType::UINT32,
        }
    }
}

/// Linear RGBA color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RgbaFloat {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl RgbaFloat {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_map_by_width() {
        assert_eq!(
            PixelFormat::R16UNorm.to_depth_vk().unwrap(),
            vk::Format::D16_UNORM
        );
        assert_eq!(
            PixelFormat::R32Float.to_depth_vk().unwrap(),
            vk::Format::D32_SFLOAT
        );
        assert!(PixelFormat::R16Float.to_depth_vk().is_err());
        assert!(PixelFormat::R8G8B8A8UNorm.to_depth_vk().is_err());
    }

    #[test]
    fn copy_formats_share_texel_size() {
        // Region copies between these two are legal in Vulkan only because
        // both sit in the same 32-bit compatibility class.
        assert_eq!(
            PixelFormat::R8G8B8A8UNorm.size_in_bytes(),
            PixelFormat::B8G8R8A8UNorm.size_in_bytes()
        );
    }

    #[test]
    fn flag_sets_combine() {
        let usage = BufferUsage::VERTEX | BufferUsage::UNIFORM;
        assert!(usage.contains(BufferUsage::VERTEX));
        assert!(usage.contains(BufferUsage::UNIFORM));
        assert!(!usage.contains(BufferUsage::INDEX));
        assert!(BufferUsage::empty().is_empty());
    }

    #[test]
    fn shader_stages_to_vk() {
        let both = ShaderStages::VERTEX | ShaderStages::FRAGMENT;
        assert_eq!(
            both.to_vk(),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(ShaderStages::empty().to_vk(), vk::ShaderStageFlags::empty());
    }

    #[test]
    fn black_is_opaque() {
        assert_eq!(RgbaFloat::BLACK.to_array(), [0.0, 0.0, 0.0, 1.0]);
    }
}
