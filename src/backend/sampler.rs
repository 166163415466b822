// Samplers
//
// The device owns a fixed trio of samplers (point, linear, 4x anisotropic),
// created with the device and destroyed with it.

use anyhow::{Context, Result};
use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerFilter {
    Point,
    Linear,
    Anisotropic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDescription {
    pub filter: SamplerFilter,
    pub max_anisotropy: f32,
}

impl SamplerDescription {
    pub const POINT: Self = Self {
        filter: SamplerFilter::Point,
        max_anisotropy: 1.0,
    };
    pub const LINEAR: Self = Self {
        filter: SamplerFilter::Linear,
        max_anisotropy: 1.0,
    };
    pub const ANISO_4X: Self = Self {
        filter: SamplerFilter::Anisotropic,
        max_anisotropy: 4.0,
    };

    /// Anisotropy actually requested from the driver, or `None` when disabled.
    pub fn effective_anisotropy(&self, supported: bool, device_max: f32) -> Option<f32> {
        if self.filter != SamplerFilter::Anisotropic || !supported {
            return None;
        }
        Some(self.max_anisotropy.min(device_max).max(1.0))
    }
}

/// Device-owned sampler handle.
#[derive(Debug)]
pub struct Sampler {
    pub(crate) sampler: vk::Sampler,
    description: SamplerDescription,
}

impl Sampler {
    pub(crate) fn new(
        device: &ash::Device,
        description: SamplerDescription,
        anisotropy_supported: bool,
        max_anisotropy: f32,
    ) -> Result<Self> {
        let (filter, mipmap_mode) = match description.filter {
            SamplerFilter::Point => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
            SamplerFilter::Linear | SamplerFilter::Anisotropic => {
                (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR)
            }
        };
        let anisotropy = description.effective_anisotropy(anisotropy_supported, max_anisotropy);

        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .compare_enable(false)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);

        let sampler = unsafe { device.create_sampler(&create_info, None) }
            .with_context(|| format!("Failed to create {:?} sampler", description.filter))?;

        Ok(Self {
            sampler,
            description,
        })
    }

    pub fn description(&self) -> SamplerDescription {
        self.description
    }
}

/// The samplers every device exposes.
pub(crate) struct DeviceSamplers {
    pub point: Sampler,
    pub linear: Sampler,
    pub aniso4x: Sampler,
}

impl DeviceSamplers {
    pub fn new(device: &ash::Device, anisotropy_supported: bool, max_anisotropy: f32) -> Result<Self> {
        if !anisotropy_supported {
            log::warn!("Sampler anisotropy not supported, the 4x anisotropic sampler falls back to linear filtering");
        }
        let create = |description| Sampler::new(device, description, anisotropy_supported, max_anisotropy);
        let destroy = |samplers: &[&Sampler]| {
            for sampler in samplers {
                unsafe { device.destroy_sampler(sampler.sampler, None) };
            }
        };

        let point = create(SamplerDescription::POINT)?;
        let linear = match create(SamplerDescription::LINEAR) {
            Ok(sampler) => sampler,
            Err(e) => {
                destroy(&[&point]);
                return Err(e);
            }
        };
        let aniso4x = match create(SamplerDescription::ANISO_4X) {
            Ok(sampler) => sampler,
            Err(e) => {
                destroy(&[&point, &linear]);
                return Err(e);
            }
        };

        Ok(Self {
            point,
            linear,
            aniso4x,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_sampler(self.point.sampler, None);
            device.destroy_sampler(self.linear.sampler, None);
            device.destroy_sampler(self.aniso4x.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anisotropy_clamped_to_device_limit() {
        let desc = SamplerDescription::ANISO_4X;
        assert_eq!(desc.effective_anisotropy(true, 16.0), Some(4.0));
        assert_eq!(desc.effective_anisotropy(true, 2.0), Some(2.0));
        assert_eq!(desc.effective_anisotropy(false, 16.0), None);
    }

    #[test]
    fn non_anisotropic_filters_disable_anisotropy() {
        assert_eq!(SamplerDescription::LINEAR.effective_anisotropy(true, 16.0), None);
        assert_eq!(SamplerDescription::POINT.effective_anisotropy(true, 16.0), None);
    }
}
