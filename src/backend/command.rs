// Command lists
//
// A command list wraps one primary command buffer, its pool and a fence that
// tracks the last submission. Recording is bracketed by begin/end. The
// render pass of the bound framebuffer starts lazily at the first draw, so
// clears requested before it become the pass's clear values. Buffer updates
// go inline when Vulkan allows it and through a staging copy otherwise.

use anyhow::{bail, Context, Result};
use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

use super::buffer::{check_range, BufferDescription, DeviceBuffer};
use super::device::GraphicsDevice;
use super::pipeline::Pipeline;
use super::resource::ResourceSet;
use super::swapchain::Framebuffer;
use super::sync;
use super::texture::{Texture, TextureDescription};
use super::types::{BufferUsage, IndexFormat, RgbaFloat};

/// Largest write `vkCmdUpdateBuffer` accepts.
const MAX_INLINE_UPDATE: usize = 65536;

/// Where a command list is in its record/submit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordingState {
    Initial,
    Recording,
    Executable,
}

impl RecordingState {
    pub fn begin(self) -> Result<Self> {
        match self {
            RecordingState::Recording => bail!("begin() called on a command list that is already recording"),
            RecordingState::Initial | RecordingState::Executable => Ok(RecordingState::Recording),
        }
    }

    pub fn end(self) -> Result<Self> {
        match self {
            RecordingState::Recording => Ok(RecordingState::Executable),
            _ => bail!("end() called on a command list that is not recording"),
        }
    }

    pub fn ensure_recording(self) -> Result<()> {
        if self != RecordingState::Recording {
            bail!("Command recorded outside begin()/end()");
        }
        Ok(())
    }

    pub fn ensure_executable(self) -> Result<()> {
        match self {
            RecordingState::Executable => Ok(()),
            RecordingState::Recording => bail!("Cannot submit a command list that is still recording"),
            RecordingState::Initial => bail!("Cannot submit a command list that was never recorded"),
        }
    }
}

/// Texel region of a texture-to-texture copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CopyRegion {
    pub src_origin: [u32; 3],
    pub src_mip: u32,
    pub src_layer: u32,
    pub dst_origin: [u32; 3],
    pub dst_mip: u32,
    pub dst_layer: u32,
    pub extent: [u32; 3],
    pub layer_count: u32,
}

impl CopyRegion {
    /// Depth of the copy; zero is read as one slice.
    fn depth(&self) -> u32 {
        self.extent[2].max(1)
    }

    fn check_side(
        &self,
        side: &str,
        desc: &TextureDescription,
        origin: [u32; 3],
        mip: u32,
        layer: u32,
    ) -> Result<()> {
        if mip >= desc.mip_levels {
            bail!("{} mip level {} out of range ({} levels)", side, mip, desc.mip_levels);
        }
        let layers = desc.vulkan_layer_count();
        if layer.checked_add(self.layer_count).map_or(true, |end| end > layers) {
            bail!(
                "{} layers {}..{} out of range ({} layers)",
                side,
                layer,
                layer.saturating_add(self.layer_count),
                layers
            );
        }
        let (width, height) = desc.mip_extent(mip);
        let fits = |start: u32, len: u32, max: u32| start.checked_add(len).map_or(false, |end| end <= max);
        if !fits(origin[0], self.extent[0], width)
            || !fits(origin[1], self.extent[1], height)
            || !fits(origin[2], self.depth(), 1)
        {
            bail!(
                "{} region at {:?} of size {}x{}x{} exceeds mip {} extent {}x{}",
                side,
                origin,
                self.extent[0],
                self.extent[1],
                self.depth(),
                mip,
                width,
                height
            );
        }
        Ok(())
    }

    pub fn validate(&self, src: &TextureDescription, dst: &TextureDescription) -> Result<()> {
        if self.extent[0] == 0 || self.extent[1] == 0 || self.layer_count == 0 {
            bail!("Copy region is empty");
        }
        if src.format.size_in_bytes() != dst.format.size_in_bytes() {
            bail!(
                "Cannot copy between {:?} and {:?}: texel sizes differ",
                src.format,
                dst.format
            );
        }
        self.check_side("Source", src, self.src_origin, self.src_mip, self.src_layer)?;
        self.check_side("Destination", dst, self.dst_origin, self.dst_mip, self.dst_layer)
    }

    fn to_vk(self) -> vk::ImageCopy {
        let offset = |o: [u32; 3]| vk::Offset3D {
            x: o[0] as i32,
            y: o[1] as i32,
            z: o[2] as i32,
        };
        vk::ImageCopy {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: self.src_mip,
                base_array_layer: self.src_layer,
                layer_count: self.layer_count,
            },
            src_offset: offset(self.src_origin),
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: self.dst_mip,
                base_array_layer: self.dst_layer,
                layer_count: self.layer_count,
            },
            dst_offset: offset(self.dst_origin),
            extent: vk::Extent3D {
                width: self.extent[0],
                height: self.extent[1],
                depth: self.depth(),
            },
        }
    }
}

/// Check that two textures can be copied into each other whole.
pub(crate) fn check_whole_copy(src: &TextureDescription, dst: &TextureDescription) -> Result<()> {
    if (src.width, src.height) != (dst.width, dst.height) {
        bail!(
            "Texture sizes differ: {}x{} vs {}x{}",
            src.width,
            src.height,
            dst.width,
            dst.height
        );
    }
    if src.mip_levels != dst.mip_levels || src.vulkan_layer_count() != dst.vulkan_layer_count() {
        bail!("Textures differ in mip levels or array layers");
    }
    if src.format.size_in_bytes() != dst.format.size_in_bytes() {
        bail!(
            "Cannot copy between {:?} and {:?}: texel sizes differ",
            src.format,
            dst.format
        );
    }
    Ok(())
}

/// How a command-list buffer update is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdatePath {
    /// `vkCmdUpdateBuffer`: 4-byte aligned and at most 64 KiB
    Inline,
    /// Written into a staging buffer, then `vkCmdCopyBuffer`
    Staged,
}

pub(crate) fn plan_buffer_update(buffer_size: u64, offset: u64, len: usize) -> Result<UpdatePath> {
    check_range(buffer_size, offset, len as u64)?;
    if offset % 4 == 0 && len % 4 == 0 && len <= MAX_INLINE_UPDATE {
        Ok(UpdatePath::Inline)
    } else {
        Ok(UpdatePath::Staged)
    }
}

/// What a clear request turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClearAction {
    /// Becomes the clear value of the pass when it begins
    OnBegin,
    /// The pass is running; recorded now with `vkCmdClearAttachments`
    Immediate,
}

/// Render-pass bookkeeping for the current recording.
#[derive(Debug, Default)]
struct PassState {
    framebuffer: Option<Framebuffer>,
    active: bool,
    /// The bound framebuffer's pass has run at least once this recording.
    recorded: bool,
    clear_color: Option<[f32; 4]>,
    clear_depth: Option<f32>,
    pipeline_layout: Option<vk::PipelineLayout>,
    /// Buffer updates not yet made visible to shader reads.
    pending_transfers: bool,
}

impl PassState {
    /// Bind a new target. Any running pass must have been finished first.
    fn bind(&mut self, framebuffer: Framebuffer) {
        debug_assert!(!self.active);
        self.framebuffer = Some(framebuffer);
        self.recorded = false;
        self.clear_color = None;
        self.clear_depth = None;
    }

    fn framebuffer(&self) -> Result<Framebuffer> {
        self.framebuffer
            .context("No framebuffer bound; call set_framebuffer() first")
    }

    fn ensure_outside(&self, what: &str) -> Result<()> {
        if self.active {
            bail!("{} is not allowed after drawing has started into a framebuffer", what);
        }
        Ok(())
    }

    fn clear_color(&mut self, index: u32, color: [f32; 4]) -> Result<ClearAction> {
        self.framebuffer()?;
        if index != 0 {
            bail!("Color target {} does not exist; framebuffers have one color target", index);
        }
        if self.active {
            return Ok(ClearAction::Immediate);
        }
        self.clear_color = Some(color);
        Ok(ClearAction::OnBegin)
    }

    fn clear_depth(&mut self, depth: f32) -> Result<ClearAction> {
        if !self.framebuffer()?.has_depth {
            bail!("Framebuffer has no depth target to clear");
        }
        if self.active {
            return Ok(ClearAction::Immediate);
        }
        self.clear_depth = Some(depth);
        Ok(ClearAction::OnBegin)
    }

    /// Whether a draw has to begin the pass first.
    fn begin_for_draw(&self) -> Result<bool> {
        if self.pipeline_layout.is_none() {
            bail!("draw_indexed() needs a pipeline; call set_pipeline() first");
        }
        self.framebuffer()?;
        Ok(!self.active)
    }

    /// Whether `end()` has to run the pass so the bound target is cleared and
    /// reaches its final layout.
    fn begin_at_end(&self) -> bool {
        self.framebuffer.is_some() && !self.recorded
    }

    /// Clear values for the pass, black and depth 1.0 unless requested otherwise.
    fn clear_values(&self) -> Result<Vec<vk::ClearValue>> {
        let framebuffer = self.framebuffer()?;
        let mut values = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color.unwrap_or(RgbaFloat::BLACK.to_array()),
            },
        }];
        if framebuffer.has_depth {
            values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.clear_depth.unwrap_or(1.0),
                    stencil: 0,
                },
            });
        }
        Ok(values)
    }

    fn started(&mut self) {
        self.active = true;
        self.recorded = true;
    }

    /// Returns true when a pass was running and must be ended.
    fn finish(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }
}

pub struct CommandList {
    pool: vk::CommandPool,
    pub(crate) command_buffer: vk::CommandBuffer,
    pub(crate) fence: vk::Fence,
    state: RecordingState,
    pass: PassState,
    signal_semaphores: Vec<vk::Semaphore>,
    /// Staging buffers of unaligned updates, kept until the submission completes
    staging: Vec<DeviceBuffer>,
    device: Arc<GraphicsDevice>,
}

impl CommandList {
    pub fn new(device: &Arc<GraphicsDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.graphics_queue_family);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.device.destroy_command_pool(pool, None) };
                return Err(e).context("Failed to allocate command buffer");
            }
        };

        // Signalled so the first begin() does not block
        let fence = match sync::create_fence(&device.device, true) {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(pool, None) };
                return Err(e);
            }
        };

        Ok(Self {
            pool,
            command_buffer,
            fence,
            state: RecordingState::Initial,
            pass: PassState::default(),
            signal_semaphores: Vec::new(),
            staging: Vec::new(),
            device: device.clone(),
        })
    }

    pub(crate) fn ensure_executable(&self) -> Result<()> {
        self.state.ensure_executable()
    }

    pub(crate) fn signal_semaphores(&self) -> &[vk::Semaphore] {
        &self.signal_semaphores
    }

    /// Start recording. Blocks until the previous submission of this list has finished.
    pub fn begin(&mut self) -> Result<()> {
        let next = self.state.begin()?;

        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .context("Failed to wait for command list fence")?;
            self.device
                .device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .context("Failed to begin command buffer")?;
        }

        self.state = next;
        self.pass = PassState::default();
        self.signal_semaphores.clear();
        self.staging.clear();
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        let next = self.state.end()?;

        // A bound framebuffer is always rendered through once, so clears land
        // and swapchain images reach their presentable layout
        if self.pass.begin_at_end() {
            self.begin_render_pass()?;
        }
        self.end_render_pass();
        self.flush_transfers();

        unsafe { self.device.device.end_command_buffer(self.command_buffer) }
            .context("Failed to end command buffer")?;

        self.state = next;
        Ok(())
    }

    fn ensure_outside_pass(&self, what: &str) -> Result<()> {
        self.state.ensure_recording()?;
        self.pass.ensure_outside(what)
    }

    /// Make inline buffer updates visible to vertex input and shader reads.
    fn flush_transfers(&mut self) {
        if !self.pass.pending_transfers {
            return;
        }
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(
                vk::AccessFlags::VERTEX_ATTRIBUTE_READ
                    | vk::AccessFlags::INDEX_READ
                    | vk::AccessFlags::UNIFORM_READ,
            );
        unsafe {
            self.device.device.cmd_pipeline_barrier(
                self.command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::VERTEX_INPUT
                    | vk::PipelineStageFlags::VERTEX_SHADER
                    | vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
        self.pass.pending_transfers = false;
    }

    // =========================================================================
    // TRANSFERS
    // =========================================================================

    /// Write `data` into `buffer` at `offset`, ordered with the other commands in this list.
    pub fn update_buffer<T: Pod>(&mut self, buffer: &DeviceBuffer, offset: u64, data: &[T]) -> Result<()> {
        self.ensure_outside_pass("update_buffer")?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let path = plan_buffer_update(buffer.size(), offset, bytes.len())?;
        if bytes.is_empty() {
            return Ok(());
        }

        match path {
            UpdatePath::Inline => unsafe {
                self.device
                    .device
                    .cmd_update_buffer(self.command_buffer, buffer.buffer, offset, bytes);
            },
            UpdatePath::Staged => {
                let staging = DeviceBuffer::new(
                    &self.device,
                    &BufferDescription::new(bytes.len() as u64, BufferUsage::STAGING),
                )?;
                staging.write(0, bytes)?;

                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: offset,
                    size: bytes.len() as u64,
                };
                unsafe {
                    self.device
                        .device
                        .cmd_copy_buffer(self.command_buffer, staging.buffer, buffer.buffer, &[region]);
                }
                self.staging.push(staging);
            }
        }
        self.pass.pending_transfers = true;
        Ok(())
    }

    /// Copy every mip level and array layer of `source` into `destination`.
    pub fn copy_texture(&mut self, source: &Texture, destination: &Texture) -> Result<()> {
        self.ensure_outside_pass("copy_texture")?;
        let src = source.description();
        let dst = destination.description();
        check_whole_copy(src, dst)?;

        let regions: Vec<vk::ImageCopy> = (0..src.mip_levels)
            .map(|mip| {
                let (width, height) = src.mip_extent(mip);
                CopyRegion {
                    src_origin: [0; 3],
                    src_mip: mip,
                    src_layer: 0,
                    dst_origin: [0; 3],
                    dst_mip: mip,
                    dst_layer: 0,
                    extent: [width, height, 1],
                    layer_count: src.vulkan_layer_count(),
                }
                .to_vk()
            })
            .collect();

        self.record_image_copy(source, destination, &regions);
        Ok(())
    }

    /// Copy a region between two textures. A `depth` of zero copies one slice.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_texture_region(
        &mut self,
        source: &Texture,
        src_x: u32,
        src_y: u32,
        src_z: u32,
        src_mip_level: u32,
        src_base_array_layer: u32,
        destination: &Texture,
        dst_x: u32,
        dst_y: u32,
        dst_z: u32,
        dst_mip_level: u32,
        dst_base_array_layer: u32,
        width: u32,
        height: u32,
        depth: u32,
        layer_count: u32,
    ) -> Result<()> {
        self.ensure_outside_pass("copy_texture_region")?;

        let region = CopyRegion {
            src_origin: [src_x, src_y, src_z],
            src_mip: src_mip_level,
            src_layer: src_base_array_layer,
            dst_origin: [dst_x, dst_y, dst_z],
            dst_mip: dst_mip_level,
            dst_layer: dst_base_array_layer,
            extent: [width, height, depth],
            layer_count,
        };
        region.validate(source.description(), destination.description())?;

        self.record_image_copy(source, destination, &[region.to_vk()]);
        Ok(())
    }

    fn record_image_copy(&mut self, source: &Texture, destination: &Texture, regions: &[vk::ImageCopy]) {
        source.transition(self.command_buffer, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        destination.transition(self.command_buffer, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        unsafe {
            self.device.device.cmd_copy_image(
                self.command_buffer,
                source.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                destination.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }

        source.transition_to_resting(self.command_buffer);
        destination.transition_to_resting(self.command_buffer);
    }

    /// Copy tightly packed texels from `buffer` at `offset` into one whole mip level of one layer.
    pub fn copy_buffer_to_texture(
        &mut self,
        buffer: &DeviceBuffer,
        offset: u64,
        texture: &Texture,
        mip_level: u32,
        array_layer: u32,
    ) -> Result<()> {
        self.ensure_outside_pass("copy_buffer_to_texture")?;

        let desc = texture.description();
        if mip_level >= desc.mip_levels || array_layer >= desc.vulkan_layer_count() {
            bail!(
                "Mip {} / layer {} out of range for texture with {} mips and {} layers",
                mip_level,
                array_layer,
                desc.mip_levels,
                desc.vulkan_layer_count()
            );
        }
        let (width, height) = desc.mip_extent(mip_level);
        let size = width as u64 * height as u64 * desc.format.size_in_bytes() as u64;
        check_range(buffer.size(), offset, size)?;

        let region = vk::BufferImageCopy {
            buffer_offset: offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level,
                base_array_layer: array_layer,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
        };

        texture.transition(self.command_buffer, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        unsafe {
            self.device.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                buffer.buffer,
                texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        texture.transition_to_resting(self.command_buffer);
        Ok(())
    }

    // =========================================================================
    // RENDERING
    // =========================================================================

    /// Bind the framebuffer subsequent draws render into. Resets the scissor to cover it.
    pub fn set_framebuffer(&mut self, framebuffer: &Framebuffer) -> Result<()> {
        self.state.ensure_recording()?;
        self.end_render_pass();
        self.pass.bind(*framebuffer);

        if let Some(semaphore) = framebuffer.present_semaphore {
            if !self.signal_semaphores.contains(&semaphore) {
                self.signal_semaphores.push(semaphore);
            }
        }

        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: framebuffer.extent,
        };
        unsafe {
            self.device
                .device
                .cmd_set_scissor(self.command_buffer, 0, &[scissor]);
        }
        Ok(())
    }

    /// Cover the whole framebuffer with the viewport, depth range 0..1.
    pub fn set_full_viewports(&mut self) -> Result<()> {
        self.state.ensure_recording()?;
        let framebuffer = self.pass.framebuffer()?;

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: framebuffer.extent.width as f32,
            height: framebuffer.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.device
                .device
                .cmd_set_viewport(self.command_buffer, 0, &[viewport]);
        }
        Ok(())
    }

    pub fn clear_color_target(&mut self, index: u32, color: RgbaFloat) -> Result<()> {
        self.state.ensure_recording()?;
        if self.pass.clear_color(index, color.to_array())? == ClearAction::Immediate {
            let attachment = vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: color.to_array(),
                    },
                },
            };
            self.clear_attachment(attachment)?;
        }
        Ok(())
    }

    pub fn clear_depth_stencil(&mut self, depth: f32) -> Result<()> {
        self.state.ensure_recording()?;
        if self.pass.clear_depth(depth)? == ClearAction::Immediate {
            let attachment = vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
                },
            };
            self.clear_attachment(attachment)?;
        }
        Ok(())
    }

    fn clear_attachment(&self, attachment: vk::ClearAttachment) -> Result<()> {
        let rect = vk::ClearRect {
            rect: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.pass.framebuffer()?.extent,
            },
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe {
            self.device
                .device
                .cmd_clear_attachments(self.command_buffer, &[attachment], &[rect]);
        }
        Ok(())
    }

    fn begin_render_pass(&mut self) -> Result<()> {
        let framebuffer = self.pass.framebuffer()?;
        let clear_values = self.pass.clear_values()?;
        self.flush_transfers();

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(framebuffer.render_pass)
            .framebuffer(framebuffer.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: framebuffer.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.device.cmd_begin_render_pass(
                self.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
        self.pass.started();
        Ok(())
    }

    fn end_render_pass(&mut self) {
        if self.pass.finish() {
            unsafe { self.device.device.cmd_end_render_pass(self.command_buffer) };
        }
    }

    pub fn set_pipeline(&mut self, pipeline: &Pipeline) -> Result<()> {
        self.state.ensure_recording()?;
        unsafe {
            self.device.device.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.pipeline,
            );
        }
        self.pass.pipeline_layout = Some(pipeline.layout);
        Ok(())
    }

    pub fn set_vertex_buffer(&mut self, index: u32, buffer: &DeviceBuffer) -> Result<()> {
        self.state.ensure_recording()?;
        unsafe {
            self.device
                .device
                .cmd_bind_vertex_buffers(self.command_buffer, index, &[buffer.buffer], &[0]);
        }
        Ok(())
    }

    pub fn set_index_buffer(&mut self, buffer: &DeviceBuffer, format: IndexFormat) -> Result<()> {
        self.state.ensure_recording()?;
        unsafe {
            self.device
                .device
                .cmd_bind_index_buffer(self.command_buffer, buffer.buffer, 0, format.to_vk());
        }
        Ok(())
    }

    /// Bind `set` at slot `slot` of the current pipeline's layout.
    pub fn set_graphics_resource_set(&mut self, slot: u32, set: &ResourceSet) -> Result<()> {
        self.state.ensure_recording()?;
        let layout = self
            .pass
            .pipeline_layout
            .context("set_graphics_resource_set() needs a pipeline; call set_pipeline() first")?;

        unsafe {
            self.device.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                slot,
                &[set.set],
                &[],
            );
        }
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        index_start: u32,
        vertex_offset: i32,
        instance_start: u32,
    ) -> Result<()> {
        self.state.ensure_recording()?;
        if self.pass.begin_for_draw()? {
            self.begin_render_pass()?;
        }

        unsafe {
            self.device.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                instance_count,
                index_start,
                vertex_offset,
                instance_start,
            );
        }
        Ok(())
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        unsafe {
            // The last submission may still be executing
            if let Err(e) = self
                .device
                .device
                .wait_for_fences(&[self.fence], true, u64::MAX)
            {
                log::error!("Failed to wait for command list fence: {}", e);
            }
            self.device.device.destroy_fence(self.fence, None);
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::{PixelFormat, TextureUsage};

    fn texture(format: PixelFormat, usage: TextureUsage) -> TextureDescription {
        TextureDescription::texture_2d(512, 512, 1, 1, format, usage)
    }

    fn face_copy(layer: u32) -> CopyRegion {
        CopyRegion {
            src_origin: [0; 3],
            src_mip: 0,
            src_layer: 0,
            dst_origin: [0; 3],
            dst_mip: 0,
            dst_layer: layer,
            extent: [512, 512, 0],
            layer_count: 1,
        }
    }

    #[test]
    fn recording_cycle() {
        let state = RecordingState::Initial;
        assert!(state.ensure_recording().is_err());
        assert!(state.ensure_executable().is_err());

        let state = state.begin().unwrap();
        state.ensure_recording().unwrap();
        assert!(state.ensure_executable().is_err());

        let state = state.end().unwrap();
        state.ensure_executable().unwrap();

        // Re-recording an executed list is allowed
        assert_eq!(state.begin().unwrap(), RecordingState::Recording);
    }

    #[test]
    fn bracketing_violations_are_errors() {
        assert!(RecordingState::Recording.begin().is_err());
        assert!(RecordingState::Initial.end().is_err());
        assert!(RecordingState::Executable.end().is_err());
    }

    #[test]
    fn region_into_each_cube_face_is_valid() {
        let src = texture(PixelFormat::B8G8R8A8UNorm, TextureUsage::SAMPLED);
        let dst = texture(PixelFormat::R8G8B8A8UNorm, TextureUsage::CUBEMAP);
        for face in 0..6 {
            face_copy(face).validate(&src, &dst).unwrap();
        }
        assert!(face_copy(6).validate(&src, &dst).is_err());
    }

    #[test]
    fn zero_depth_copies_one_slice() {
        assert_eq!(face_copy(0).to_vk().extent.depth, 1);
    }

    #[test]
    fn region_past_mip_extent_rejected() {
        let src = texture(PixelFormat::R8G8B8A8UNorm, TextureUsage::SAMPLED);
        let dst = texture(PixelFormat::R8G8B8A8UNorm, TextureUsage::SAMPLED);

        let mut region = face_copy(0);
        region.dst_origin = [1, 0, 0];
        assert!(region.validate(&src, &dst).is_err());

        let mut region = face_copy(0);
        region.src_mip = 1;
        assert!(region.validate(&src, &dst).is_err());

        let mut region = face_copy(0);
        region.extent = [512, 512, 2];
        assert!(region.validate(&src, &dst).is_err());
    }

    #[test]
    fn incompatible_texel_sizes_rejected() {
        let src = texture(PixelFormat::R16UNorm, TextureUsage::SAMPLED);
        let dst = texture(PixelFormat::R8G8B8A8UNorm, TextureUsage::SAMPLED);
        assert!(face_copy(0).validate(&src, &dst).is_err());
        assert!(check_whole_copy(&src, &dst).is_err());
    }

    #[test]
    fn whole_copy_requires_matching_shape() {
        let a = texture(PixelFormat::R8G8B8A8UNorm, TextureUsage::SAMPLED);
        assert!(check_whole_copy(&a, &a).is_ok());

        let smaller = TextureDescription::texture_2d(256, 256, 1, 1, PixelFormat::R8G8B8A8UNorm, TextureUsage::SAMPLED);
        assert!(check_whole_copy(&a, &smaller).is_err());

        let cube = texture(PixelFormat::R8G8B8A8UNorm, TextureUsage::CUBEMAP);
        assert!(check_whole_copy(&a, &cube).is_err());
    }

    #[test]
    fn aligned_updates_go_inline() {
        assert_eq!(plan_buffer_update(64, 0, 64).unwrap(), UpdatePath::Inline);
        assert_eq!(plan_buffer_update(16, 12, 4).unwrap(), UpdatePath::Inline);
        assert_eq!(plan_buffer_update(1 << 20, 0, MAX_INLINE_UPDATE).unwrap(), UpdatePath::Inline);
    }

    #[test]
    fn unaligned_or_large_updates_are_staged() {
        // Three u16 indices
        assert_eq!(plan_buffer_update(64, 0, 6).unwrap(), UpdatePath::Staged);
        assert_eq!(plan_buffer_update(64, 2, 4).unwrap(), UpdatePath::Staged);
        assert_eq!(
            plan_buffer_update(1 << 20, 0, MAX_INLINE_UPDATE + 4).unwrap(),
            UpdatePath::Staged
        );
    }

    #[test]
    fn updates_past_the_end_are_rejected() {
        assert!(plan_buffer_update(64, 32, 64).is_err());
        assert!(plan_buffer_update(6, 2, 6).is_err());
        assert!(plan_buffer_update(64, u64::MAX, 4).is_err());
    }

    fn target(has_depth: bool) -> Framebuffer {
        Framebuffer {
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            extent: vk::Extent2D { width: 960, height: 540 },
            has_depth,
            present_semaphore: None,
        }
    }

    fn with_pipeline(mut pass: PassState) -> PassState {
        pass.pipeline_layout = Some(vk::PipelineLayout::null());
        pass
    }

    #[test]
    fn clears_before_the_first_draw_become_clear_values() {
        let mut pass = PassState::default();
        pass.bind(target(true));

        assert_eq!(pass.clear_color(0, [0.2, 0.4, 0.6, 1.0]).unwrap(), ClearAction::OnBegin);
        assert_eq!(pass.clear_depth(0.5).unwrap(), ClearAction::OnBegin);

        let values = pass.clear_values().unwrap();
        assert_eq!(values.len(), 2);
        unsafe {
            assert_eq!(values[0].color.float32, [0.2, 0.4, 0.6, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 0.5);
        }
    }

    #[test]
    fn clear_values_default_to_black_and_far_depth() {
        let mut pass = PassState::default();
        pass.bind(target(true));
        let values = pass.clear_values().unwrap();
        unsafe {
            assert_eq!(values[0].color.float32, RgbaFloat::BLACK.to_array());
            assert_eq!(values[1].depth_stencil.depth, 1.0);
        }

        pass.bind(target(false));
        assert_eq!(pass.clear_values().unwrap().len(), 1);
    }

    #[test]
    fn clears_inside_a_running_pass_are_immediate() {
        let mut pass = with_pipeline(PassState::default());
        pass.bind(target(true));
        assert!(pass.begin_for_draw().unwrap());
        pass.started();

        assert_eq!(pass.clear_color(0, [1.0; 4]).unwrap(), ClearAction::Immediate);
        assert_eq!(pass.clear_depth(0.0).unwrap(), ClearAction::Immediate);
        // The stored clear values are left alone
        assert_eq!(pass.clear_color, None);
        assert_eq!(pass.clear_depth, None);
    }

    #[test]
    fn invalid_clears_are_rejected() {
        let mut pass = PassState::default();
        assert!(pass.clear_color(0, [0.0; 4]).is_err());
        assert!(pass.clear_depth(1.0).is_err());

        pass.bind(target(false));
        assert!(pass.clear_color(1, [0.0; 4]).is_err());
        assert!(pass.clear_depth(1.0).is_err());
    }

    #[test]
    fn pass_starts_lazily_at_the_first_draw() {
        let mut pass = PassState::default();
        pass.bind(target(true));
        // No pipeline yet
        assert!(pass.begin_for_draw().is_err());

        let mut pass = with_pipeline(pass);
        assert!(pass.begin_for_draw().unwrap());
        pass.started();
        assert!(!pass.begin_for_draw().unwrap());

        // Drawing without a target fails even with a pipeline
        assert!(with_pipeline(PassState::default()).begin_for_draw().is_err());
    }

    #[test]
    fn transfers_rejected_once_drawing_started() {
        let mut pass = with_pipeline(PassState::default());
        pass.bind(target(true));
        pass.ensure_outside("update_buffer").unwrap();

        pass.started();
        let err = pass.ensure_outside("update_buffer").unwrap_err();
        assert!(err.to_string().contains("update_buffer"));

        assert!(pass.finish());
        pass.ensure_outside("update_buffer").unwrap();
        assert!(!pass.finish());
    }

    #[test]
    fn end_runs_a_bound_pass_exactly_once() {
        let mut pass = PassState::default();
        assert!(!pass.begin_at_end());

        pass.bind(target(false));
        assert!(pass.begin_at_end());

        pass.started();
        pass.finish();
        assert!(!pass.begin_at_end());

        // Rebinding starts a fresh target that has not been rendered yet
        pass.bind(target(false));
        assert!(pass.begin_at_end());
    }
}
