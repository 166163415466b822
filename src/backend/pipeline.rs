// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, depth/stencil, blending.

use anyhow::{bail, Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::GraphicsDevice;
use super::resource::ResourceLayout;
use super::shader::Shader;
use super::swapchain::OutputDescription;

/// Create the render pass every swapchain framebuffer renders through
pub fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
) -> Result<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_attachment_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let depth_attachment_ref = vk::AttachmentReference::default()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let mut attachments = vec![color_attachment];
    if let Some(depth_format) = depth_format {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE) // Don't need to store depth
                .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
    }

    let color_attachments = [color_attachment_ref];
    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments);
    if depth_format.is_some() {
        subpass = subpass.depth_stencil_attachment(&depth_attachment_ref);
    }

    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

    let subpasses = [subpass];
    let dependencies = [dependency];
    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None) }
        .context("Failed to create render pass")
}

// =============================================================================
// FIXED-FUNCTION STATE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendState {
    /// Source replaces destination.
    SingleOverride,
    /// Classic `src_alpha, 1 - src_alpha` blending.
    SingleAlpha,
}

impl BlendState {
    fn attachment(self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        match self {
            BlendState::SingleOverride => state.blend_enable(false),
            BlendState::SingleAlpha => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare: vk::CompareOp,
}

impl DepthStencilState {
    pub const DEPTH_ONLY_LESS_EQUAL: Self = Self {
        depth_test: true,
        depth_write: true,
        compare: vk::CompareOp::LESS_OR_EQUAL,
    };
    pub const DISABLED: Self = Self {
        depth_test: false,
        depth_write: false,
        compare: vk::CompareOp::ALWAYS,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceCullMode {
    Back,
    Front,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonFillMode {
    Solid,
    Wireframe,
}

/// Winding of front faces, as seen on screen with Y pointing up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontFace {
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterizerState {
    pub cull_mode: FaceCullMode,
    pub fill_mode: PolygonFillMode,
    pub front_face: FrontFace,
    pub depth_clip: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            cull_mode: FaceCullMode::Back,
            fill_mode: PolygonFillMode::Solid,
            front_face: FrontFace::Clockwise,
            depth_clip: true,
        }
    }
}

impl RasterizerState {
    fn to_vk(self) -> vk::PipelineRasterizationStateCreateInfo<'static> {
        let cull_mode = match self.cull_mode {
            FaceCullMode::Back => vk::CullModeFlags::BACK,
            FaceCullMode::Front => vk::CullModeFlags::FRONT,
            FaceCullMode::None => vk::CullModeFlags::NONE,
        };
        let polygon_mode = match self.fill_mode {
            PolygonFillMode::Solid => vk::PolygonMode::FILL,
            PolygonFillMode::Wireframe => vk::PolygonMode::LINE,
        };
        // Shaders flip clip-space Y, so on-screen winding matches Vulkan's directly
        let front_face = match self.front_face {
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        };

        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(!self.depth_clip)
            .rasterizer_discard_enable(false)
            .polygon_mode(polygon_mode)
            .line_width(1.0)
            .cull_mode(cull_mode)
            .front_face(front_face)
            .depth_bias_enable(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

impl PrimitiveTopology {
    fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        }
    }
}

// =============================================================================
// VERTEX LAYOUT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexElementSemantic {
    Position,
    TextureCoordinate,
    Normal,
    Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexElementFormat {
    Float2,
    Float3,
    Float4,
}

impl VertexElementFormat {
    pub fn size_in_bytes(self) -> u32 {
        match self {
            VertexElementFormat::Float2 => 8,
            VertexElementFormat::Float3 => 12,
            VertexElementFormat::Float4 => 16,
        }
    }

    fn to_vk(self) -> vk::Format {
        match self {
            VertexElementFormat::Float2 => vk::Format::R32G32_SFLOAT,
            VertexElementFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
            VertexElementFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexElementDescription {
    pub name: String,
    pub semantic: VertexElementSemantic,
    pub format: VertexElementFormat,
}

impl VertexElementDescription {
    pub fn new(name: &str, semantic: VertexElementSemantic, format: VertexElementFormat) -> Self {
        Self {
            name: name.to_string(),
            semantic,
            format,
        }
    }
}

/// Interleaved vertex layout; element `i` is read from shader location `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayoutDescription {
    pub stride: u32,
    pub elements: Vec<VertexElementDescription>,
}

impl VertexLayoutDescription {
    pub fn new(elements: Vec<VertexElementDescription>) -> Self {
        let stride = elements.iter().map(|e| e.format.size_in_bytes()).sum();
        Self { stride, elements }
    }

    fn attributes(&self, binding: u32) -> Vec<vk::VertexInputAttributeDescription> {
        let mut offset = 0;
        self.elements
            .iter()
            .enumerate()
            .map(|(location, element)| {
                let attribute = vk::VertexInputAttributeDescription::default()
                    .binding(binding)
                    .location(location as u32)
                    .format(element.format.to_vk())
                    .offset(offset);
                offset += element.format.size_in_bytes();
                attribute
            })
            .collect()
    }
}

pub struct ShaderSetDescription<'a> {
    pub vertex_layouts: Vec<VertexLayoutDescription>,
    pub shaders: Vec<&'a Shader>,
}

impl<'a> ShaderSetDescription<'a> {
    pub fn new(vertex_layouts: Vec<VertexLayoutDescription>, shaders: Vec<&'a Shader>) -> Self {
        Self {
            vertex_layouts,
            shaders,
        }
    }
}

pub struct GraphicsPipelineDescription<'a> {
    pub blend_state: BlendState,
    pub depth_stencil_state: DepthStencilState,
    pub rasterizer_state: RasterizerState,
    pub primitive_topology: PrimitiveTopology,
    pub shader_set: ShaderSetDescription<'a>,
    pub resource_layouts: Vec<&'a ResourceLayout>,
    pub outputs: OutputDescription,
}

pub struct Pipeline {
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    device: Arc<GraphicsDevice>,
}

impl Pipeline {
    /// Create a graphics pipeline with dynamic viewport and scissor
    pub fn new_graphics(device: &Arc<GraphicsDevice>, description: &GraphicsPipelineDescription) -> Result<Self> {
        if description.shader_set.shaders.is_empty() {
            bail!("Graphics pipeline needs at least one shader");
        }
        if description.depth_stencil_state.depth_test && !description.outputs.has_depth {
            bail!("Depth testing requested but the output has no depth attachment");
        }

        // Shader stages
        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = description
            .shader_set
            .shaders
            .iter()
            .map(|shader| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(shader.stage.to_vk())
                    .module(shader.module)
                    .name(&shader.entry_point)
            })
            .collect();

        // Vertex input: one binding per layout
        let bindings: Vec<vk::VertexInputBindingDescription> = description
            .shader_set
            .vertex_layouts
            .iter()
            .enumerate()
            .map(|(i, layout)| {
                vk::VertexInputBindingDescription::default()
                    .binding(i as u32)
                    .stride(layout.stride)
                    .input_rate(vk::VertexInputRate::VERTEX)
            })
            .collect();
        let attributes: Vec<vk::VertexInputAttributeDescription> = description
            .shader_set
            .vertex_layouts
            .iter()
            .enumerate()
            .flat_map(|(i, layout)| layout.attributes(i as u32))
            .collect();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        // Input assembly
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(description.primitive_topology.to_vk())
            .primitive_restart_enable(false);

        // Viewport and scissor are set while recording
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let rasterizer = description.rasterizer_state.to_vk();

        // Multisampling (disabled)
        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth = description.depth_stencil_state;
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(depth.depth_test)
            .depth_write_enable(depth.depth_write)
            .depth_compare_op(depth.compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [description.blend_state.attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        // Pipeline layout: set N is resource layout N
        let set_layouts: Vec<vk::DescriptorSetLayout> =
            description.resource_layouts.iter().map(|l| l.layout).collect();
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let pipeline_layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(pipeline_layout)
            .render_pass(description.outputs.render_pass)
            .subpass(0);

        let pipeline = match unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        } {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.device.destroy_pipeline_layout(pipeline_layout, None) };
                return Err(e).context("Failed to create graphics pipeline");
            }
        };

        log::debug!(
            "Created graphics pipeline: {} stages, {} resource layouts",
            shader_stages.len(),
            set_layouts.len()
        );

        Ok(Self {
            pipeline,
            layout: pipeline_layout,
            device: device.clone(),
        })
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
