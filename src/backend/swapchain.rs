// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen, the
// optional depth attachment shared by every image, and one framebuffer per
// image. Recreated in place when the window is resized or the surface goes
// out of date.

use anyhow::{bail, Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::device::GraphicsDevice;
use super::pipeline::create_render_pass;
use super::sync::{self, PresentSync};

/// Render target a command list draws into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framebuffer {
    pub(crate) render_pass: vk::RenderPass,
    pub(crate) framebuffer: vk::Framebuffer,
    pub(crate) extent: vk::Extent2D,
    pub(crate) has_depth: bool,
    /// Signalled when rendering into this framebuffer completes; presentation waits on it.
    pub(crate) present_semaphore: Option<vk::Semaphore>,
}

impl Framebuffer {
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn output_description(&self) -> OutputDescription {
        OutputDescription {
            render_pass: self.render_pass,
            has_depth: self.has_depth,
        }
    }
}

/// What a pipeline renders into; pipelines are only valid for matching outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDescription {
    pub(crate) render_pass: vk::RenderPass,
    pub has_depth: bool,
}

struct DepthAttachment {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
}

/// Pick the surface format: prefer BGRA8 UNORM so shader output is written unconverted.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// FIFO when synced to vertical blank; otherwise the lowest-latency mode available.
fn choose_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO; // FIFO is always supported
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    image_views: Vec<vk::ImageView>,
    depth: Option<DepthAttachment>,
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    depth_format: Option<vk::Format>,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    image_index: u32,
    needs_recreate: bool,
    sync: PresentSync,
    device: Arc<GraphicsDevice>,
}

impl Swapchain {
    /// Takes ownership of `surface`; it is destroyed with the swapchain, or here on failure.
    pub(crate) fn new(
        device: Arc<GraphicsDevice>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let surface_loader = ash::khr::surface::Instance::new(device.entry(), &device.instance);
        let loader = ash::khr::swapchain::Device::new(&device.instance, &device.device);

        let (format, present_mode, depth_format) = match Self::query_surface(&device, &surface_loader, surface) {
            Ok(choice) => choice,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        // From here on Drop cleans up whatever was created
        let mut swapchain = Self {
            swapchain: vk::SwapchainKHR::null(),
            loader,
            surface,
            surface_loader,
            image_views: Vec::new(),
            depth: None,
            framebuffers: Vec::new(),
            render_pass: vk::RenderPass::null(),
            format: format.format,
            color_space: format.color_space,
            depth_format,
            extent: vk::Extent2D { width, height },
            present_mode,
            image_index: 0,
            needs_recreate: false,
            sync: PresentSync::default(),
            device,
        };

        swapchain.render_pass = create_render_pass(&swapchain.device.device, swapchain.format, depth_format)?;
        swapchain.sync.create_fence(&swapchain.device.device)?;
        swapchain.create_chain(width, height)?;
        swapchain.acquire_next_image()?;
        Ok(swapchain)
    }

    fn query_surface(
        device: &GraphicsDevice,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::SurfaceFormatKHR, vk::PresentModeKHR, Option<vk::Format>)> {
        // Query supported formats and present modes
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, surface)
        }
        .context("Failed to query surface formats")?;
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(device.physical_device, surface)
        }
        .context("Failed to query present modes")?;

        let format = choose_surface_format(&formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(&present_modes, device.options().sync_to_vertical_blank);
        log::info!("Surface format: {:?}, present mode: {:?}", format.format, present_mode);

        let depth_format = device
            .options()
            .swapchain_depth_format
            .map(|f| f.to_depth_vk())
            .transpose()?;

        Ok((format, present_mode, depth_format))
    }

    fn create_chain(&mut self, width: u32, height: u32) -> Result<()> {
        let device = self.device.clone();

        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, self.surface)
        }
        .context("Failed to query surface capabilities")?;

        let extent = choose_extent(&caps, width, height);

        // Triple buffering when the surface allows it
        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 && image_count > caps.max_image_count {
            image_count = caps.max_image_count;
        }

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.format)
            .image_color_space(self.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        self.swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }

        let images = unsafe { self.loader.get_swapchain_images(self.swapchain) }
            .context("Failed to get swapchain images")?;
        log::info!(
            "Created swapchain with {} images ({}x{})",
            images.len(),
            extent.width,
            extent.height
        );

        self.extent = extent;
        self.sync.ensure_image_count(&device.device, images.len())?;

        // Create image views
        for &image in &images {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { device.device.create_image_view(&create_info, None) }
                .context("Failed to create image view")?;
            self.image_views.push(view);
        }

        if let Some(depth_format) = self.depth_format {
            self.depth = Some(self.create_depth_attachment(depth_format)?);
        }

        // Framebuffers for each swapchain image (with depth attachment when present)
        for &view in &self.image_views {
            let mut attachments = vec![view];
            if let Some(depth) = &self.depth {
                attachments.push(depth.view);
            }
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
                .context("Failed to create framebuffer")?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    fn create_depth_attachment(&self, format: vk::Format) -> Result<DepthAttachment> {
        let device = &self.device;

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .context("Failed to create depth image")?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let allocation = device.allocate("swapchain depth", requirements, MemoryLocation::GpuOnly, false)?;

        unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .context("Failed to bind depth image memory")?;
        }

        let aspect_mask = if format == vk::Format::D24_UNORM_S8_UINT {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { device.device.create_image_view(&view_info, None) }
            .context("Failed to create depth image view")?;

        Ok(DepthAttachment {
            image,
            view,
            allocation: Some(allocation),
        })
    }

    /// Destroy everything that depends on the swapchain's images and extent.
    fn destroy_chain_resources(&mut self) {
        let device = &self.device.device;
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if let Some(mut depth) = self.depth.take() {
                device.destroy_image_view(depth.view, None);
                device.destroy_image(depth.image, None);
                if let Some(allocation) = depth.allocation.take() {
                    self.device.free(allocation);
                }
            }
        }
    }

    fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        self.device.wait_for_idle()?;
        self.destroy_chain_resources();
        self.create_chain(width, height)?;
        self.needs_recreate = false;
        Ok(())
    }

    /// Recreate the chain for a new window size and acquire a fresh image.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            bail!("Cannot resize swapchain to {}x{}", width, height);
        }
        log::debug!("Resizing swapchain to {}x{}", width, height);
        self.recreate(width, height)?;
        self.acquire_next_image()
    }

    /// Acquire the next presentable image, recreating the chain if the surface went stale.
    pub(crate) fn acquire_next_image(&mut self) -> Result<()> {
        const MAX_ATTEMPTS: u32 = 3;

        for _ in 0..MAX_ATTEMPTS {
            if self.needs_recreate {
                self.recreate(self.extent.width, self.extent.height)?;
            }

            let result = unsafe {
                self.loader.acquire_next_image(
                    self.swapchain,
                    u64::MAX,
                    vk::Semaphore::null(),
                    self.sync.image_acquired,
                )
            };

            match result {
                Ok((index, suboptimal)) => {
                    sync::wait_and_reset(&self.device.device, self.sync.image_acquired)?;
                    self.image_index = index;
                    self.needs_recreate = suboptimal;
                    return Ok(());
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    log::debug!("Swapchain out of date, recreating");
                    self.needs_recreate = true;
                }
                Err(e) => return Err(e).context("Failed to acquire swapchain image"),
            }
        }

        bail!("Swapchain stayed out of date after {} attempts", MAX_ATTEMPTS)
    }

    /// Present the current image once every semaphore in `wait_semaphores` is signalled.
    pub(crate) fn present(&mut self, queue: vk::Queue, wait_semaphores: &[vk::Semaphore]) -> Result<()> {
        let swapchains = [self.swapchain];
        let image_indices = [self.image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => {
                self.needs_recreate |= suboptimal;
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.needs_recreate = true;
                Ok(())
            }
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }

    /// Framebuffer of the currently acquired image. Rendering into it signals that
    /// image's own render-finished semaphore.
    pub fn framebuffer(&self) -> Framebuffer {
        Framebuffer {
            render_pass: self.render_pass,
            framebuffer: self.framebuffers[self.image_index as usize],
            extent: self.extent,
            has_depth: self.depth.is_some(),
            present_semaphore: self.sync.render_finished(self.image_index),
        }
    }

    pub fn output_description(&self) -> OutputDescription {
        OutputDescription {
            render_pass: self.render_pass,
            has_depth: self.depth_format.is_some(),
        }
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_for_idle() {
            log::error!("Failed to wait for idle before destroying swapchain: {}", e);
        }
        self.destroy_chain_resources();
        unsafe {
            self.device.device.destroy_render_pass(self.render_pass, None);
            self.loader.destroy_swapchain(self.swapchain, None);
            self.sync.destroy(&self.device.device);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
