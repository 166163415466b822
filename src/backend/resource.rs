// Resource layouts and resource sets
//
// A layout is a descriptor set layout whose binding indices follow the order
// of its elements. A set owns its own descriptor pool and one descriptor set
// written once at creation.

use anyhow::{bail, Context, Result};
use ash::vk;
use std::sync::Arc;

use super::buffer::DeviceBuffer;
use super::device::GraphicsDevice;
use super::sampler::Sampler;
use super::texture::TextureView;
use super::types::{BufferUsage, ResourceKind, ShaderStages};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLayoutElementDescription {
    pub name: String,
    pub kind: ResourceKind,
    pub stages: ShaderStages,
}

impl ResourceLayoutElementDescription {
    pub fn new(name: &str, kind: ResourceKind, stages: ShaderStages) -> Self {
        Self {
            name: name.to_string(),
            kind,
            stages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLayoutDescription {
    pub elements: Vec<ResourceLayoutElementDescription>,
}

impl ResourceLayoutDescription {
    pub fn new(elements: Vec<ResourceLayoutElementDescription>) -> Self {
        Self { elements }
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.elements.iter().map(|e| e.kind).collect()
    }
}

pub struct ResourceLayout {
    pub(crate) layout: vk::DescriptorSetLayout,
    description: ResourceLayoutDescription,
    device: Arc<GraphicsDevice>,
}

impl ResourceLayout {
    pub fn new(device: &Arc<GraphicsDevice>, description: &ResourceLayoutDescription) -> Result<Self> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = description
            .elements
            .iter()
            .enumerate()
            .map(|(i, element)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(i as u32)
                    .descriptor_type(element.kind.to_vk())
                    .descriptor_count(1)
                    .stage_flags(element.stages.to_vk())
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { device.device.create_descriptor_set_layout(&create_info, None) }
            .context("Failed to create resource layout")?;

        log::debug!(
            "Created resource layout: [{}]",
            description
                .elements
                .iter()
                .map(|e| e.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            layout,
            description: description.clone(),
            device: device.clone(),
        })
    }

    pub fn description(&self) -> &ResourceLayoutDescription {
        &self.description
    }
}

impl Drop for ResourceLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None)
        };
    }
}

/// Anything that can be bound into a resource set slot.
#[derive(Clone, Copy)]
pub enum BindableResource<'a> {
    Buffer(&'a DeviceBuffer),
    TextureView(&'a TextureView),
    Sampler(&'a Sampler),
}

/// Descriptor kind a buffer with `usage` can be bound as, if any.
pub(crate) fn buffer_binding_kind(usage: BufferUsage) -> Option<ResourceKind> {
    usage
        .contains(BufferUsage::UNIFORM)
        .then_some(ResourceKind::UniformBuffer)
}

impl BindableResource<'_> {
    /// What this resource binds as; `None` for a buffer that cannot be bound at all.
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            BindableResource::Buffer(buffer) => buffer_binding_kind(buffer.description().usage),
            BindableResource::TextureView(_) => Some(ResourceKind::TextureReadOnly),
            BindableResource::Sampler(_) => Some(ResourceKind::Sampler),
        }
    }
}

impl<'a> From<&'a DeviceBuffer> for BindableResource<'a> {
    fn from(buffer: &'a DeviceBuffer) -> Self {
        BindableResource::Buffer(buffer)
    }
}

impl<'a> From<&'a TextureView> for BindableResource<'a> {
    fn from(view: &'a TextureView) -> Self {
        BindableResource::TextureView(view)
    }
}

impl<'a> From<&'a Sampler> for BindableResource<'a> {
    fn from(sampler: &'a Sampler) -> Self {
        BindableResource::Sampler(sampler)
    }
}

/// Check that the bound resources line up one-to-one with the layout's slots.
pub(crate) fn check_bindings(layout: &[ResourceKind], bound: &[ResourceKind]) -> Result<()> {
    if layout.len() != bound.len() {
        bail!(
            "Resource set has {} resources but its layout declares {}",
            bound.len(),
            layout.len()
        );
    }
    for (slot, (expected, actual)) in layout.iter().zip(bound).enumerate() {
        if expected != actual {
            bail!(
                "Resource at slot {} is a {:?}, layout expects {:?}",
                slot,
                actual,
                expected
            );
        }
    }
    Ok(())
}

pub struct ResourceSetDescription<'a> {
    pub layout: &'a ResourceLayout,
    pub resources: Vec<BindableResource<'a>>,
}

impl<'a> ResourceSetDescription<'a> {
    pub fn new(layout: &'a ResourceLayout, resources: Vec<BindableResource<'a>>) -> Self {
        Self { layout, resources }
    }
}

pub struct ResourceSet {
    pub(crate) set: vk::DescriptorSet,
    pool: vk::DescriptorPool,
    device: Arc<GraphicsDevice>,
}

impl ResourceSet {
    pub fn new(device: &Arc<GraphicsDevice>, description: &ResourceSetDescription) -> Result<Self> {
        let kinds = description
            .resources
            .iter()
            .enumerate()
            .map(|(slot, resource)| {
                resource.kind().with_context(|| {
                    format!("Buffer at slot {} was not created with BufferUsage::UNIFORM", slot)
                })
            })
            .collect::<Result<Vec<ResourceKind>>>()?;
        check_bindings(&description.layout.description().kinds(), &kinds)?;

        // One pool per set, sized exactly for it
        let pool_sizes: Vec<vk::DescriptorPoolSize> = kinds
            .iter()
            .map(|kind| vk::DescriptorPoolSize {
                ty: kind.to_vk(),
                descriptor_count: 1,
            })
            .collect();

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        let layouts = [description.layout.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let set = match unsafe { device.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe { device.device.destroy_descriptor_pool(pool, None) };
                return Err(e).context("Failed to allocate resource set");
            }
        };

        // Infos must outlive the writes that point into them
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = description
            .resources
            .iter()
            .map(|resource| match resource {
                BindableResource::Buffer(buffer) => vk::DescriptorBufferInfo {
                    buffer: buffer.buffer,
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                },
                _ => vk::DescriptorBufferInfo::default(),
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = description
            .resources
            .iter()
            .map(|resource| match resource {
                BindableResource::TextureView(view) => vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: view.view,
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
                BindableResource::Sampler(sampler) => vk::DescriptorImageInfo {
                    sampler: sampler.sampler,
                    image_view: vk::ImageView::null(),
                    image_layout: vk::ImageLayout::UNDEFINED,
                },
                BindableResource::Buffer(_) => vk::DescriptorImageInfo::default(),
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet> = description
            .resources
            .iter()
            .enumerate()
            .map(|(i, resource)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(i as u32)
                    .descriptor_type(kinds[i].to_vk());
                match resource {
                    BindableResource::Buffer(_) => {
                        write.buffer_info(std::slice::from_ref(&buffer_infos[i]))
                    }
                    _ => write.image_info(std::slice::from_ref(&image_infos[i])),
                }
            })
            .collect();

        unsafe { device.device.update_descriptor_sets(&writes, &[]) };

        Ok(Self {
            set,
            pool,
            device: device.clone(),
        })
    }
}

impl Drop for ResourceSet {
    fn drop(&mut self) {
        // Destroying the pool frees the set
        unsafe { self.device.device.destroy_descriptor_pool(self.pool, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_bindings_accepted() {
        let kinds = [
            ResourceKind::UniformBuffer,
            ResourceKind::TextureReadOnly,
            ResourceKind::Sampler,
            ResourceKind::UniformBuffer,
        ];
        assert!(check_bindings(&kinds, &kinds).is_ok());
    }

    #[test]
    fn wrong_count_rejected() {
        let layout = [ResourceKind::UniformBuffer, ResourceKind::UniformBuffer];
        assert!(check_bindings(&layout, &[ResourceKind::UniformBuffer]).is_err());
    }

    #[test]
    fn swapped_kinds_rejected() {
        let layout = [ResourceKind::TextureReadOnly, ResourceKind::Sampler];
        let bound = [ResourceKind::Sampler, ResourceKind::TextureReadOnly];
        let err = check_bindings(&layout, &bound).unwrap_err();
        assert!(err.to_string().contains("slot 0"));
    }

    #[test]
    fn only_uniform_buffers_bind() {
        assert_eq!(buffer_binding_kind(BufferUsage::UNIFORM), Some(ResourceKind::UniformBuffer));
        assert_eq!(
            buffer_binding_kind(BufferUsage::VERTEX | BufferUsage::UNIFORM),
            Some(ResourceKind::UniformBuffer)
        );
        assert_eq!(buffer_binding_kind(BufferUsage::VERTEX), None);
        assert_eq!(buffer_binding_kind(BufferUsage::STAGING), None);
    }

    #[test]
    fn layout_kinds_follow_element_order() {
        let desc = ResourceLayoutDescription::new(vec![
            ResourceLayoutElementDescription::new("World", ResourceKind::UniformBuffer, ShaderStages::VERTEX),
            ResourceLayoutElementDescription::new("SurfaceSampler", ResourceKind::Sampler, ShaderStages::FRAGMENT),
        ]);
        assert_eq!(desc.kinds(), vec![ResourceKind::UniformBuffer, ResourceKind::Sampler]);
    }
}
