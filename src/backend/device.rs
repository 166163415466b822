// Graphics Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Surface creation for windowed devices
// - Physical device selection (prefer discrete GPU)
// - Logical device + queue creation
// - Memory allocator and built-in samplers
// - Submission, idle waits and presentation

use anyhow::{bail, Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr};
use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::buffer::DeviceBuffer;
use super::command::CommandList;
use super::sampler::{DeviceSamplers, Sampler};
use super::swapchain::Swapchain;
use super::types::GraphicsDeviceOptions;

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Window the device should be able to present to.
#[derive(Clone, Copy)]
struct SurfaceTarget {
    display: RawDisplayHandle,
    window: RawWindowHandle,
}

/// Handles created so far by `GraphicsDevice::create`. Dropping it destroys
/// them in reverse order; `release` hands ownership over instead.
#[derive(Default)]
struct PartialDevice {
    instance: Option<ash::Instance>,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface: Option<(ash::khr::surface::Instance, vk::SurfaceKHR)>,
    device: Option<ash::Device>,
}

impl PartialDevice {
    fn release(&mut self) {
        self.device = None;
        self.surface = None;
        self.debug_utils = None;
        self.instance = None;
    }
}

impl Drop for PartialDevice {
    fn drop(&mut self) {
        unsafe {
            if let Some(device) = self.device.take() {
                device.destroy_device(None);
            }
            if let Some((loader, surface)) = self.surface.take() {
                loader.destroy_surface(surface, None);
            }
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            if let Some(instance) = self.instance.take() {
                log::debug!("Device creation failed, destroying partially created instance");
                instance.destroy_instance(None);
            }
        }
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct GraphicsDevice {
    // Vulkan handles (order matters for drop!)
    allocator: ManuallyDrop<Mutex<Allocator>>,
    samplers: DeviceSamplers,
    pub(crate) device: ash::Device,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) instance: ash::Instance,
    entry: ash::Entry,

    // Queue handles
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) graphics_queue_family: u32,
    queue_lock: Mutex<()>,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,

    /// Semaphores signalled by submissions that rendered into a swapchain
    /// image; the next present waits on them.
    pending_present_waits: Mutex<Vec<vk::Semaphore>>,

    pub(crate) properties: vk::PhysicalDeviceProperties,
    options: GraphicsDeviceOptions,
}

impl GraphicsDevice {
    /// Create a headless device: no surface, no swapchain.
    pub fn create_vulkan(options: &GraphicsDeviceOptions) -> Result<Arc<Self>> {
        let (device, _) = Self::create(options, None)?;
        Ok(device)
    }

    /// Create a device able to present to `window`, along with its main swapchain.
    pub fn create_vulkan_with_window<W>(
        options: &GraphicsDeviceOptions,
        window: &W,
        width: u32,
        height: u32,
    ) -> Result<(Arc<Self>, Swapchain)>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let target = SurfaceTarget {
            display: window
                .display_handle()
                .context("Failed to get display handle")?
                .as_raw(),
            window: window
                .window_handle()
                .context("Failed to get window handle")?
                .as_raw(),
        };

        let (device, surface) = Self::create(options, Some(target))?;
        let surface = surface.context("Windowed device created without a surface")?;
        let swapchain = Swapchain::new(device.clone(), surface, width, height)?;
        Ok((device, swapchain))
    }

    fn create(
        options: &GraphicsDeviceOptions,
        target: Option<SurfaceTarget>,
    ) -> Result<(Arc<Self>, Option<vk::SurfaceKHR>)> {
        log::info!(
            "Creating Vulkan device (debug: {}, vsync: {}, windowed: {})",
            options.debug,
            options.sync_to_vertical_blank,
            target.is_some()
        );

        // Step 1: Load Vulkan library
        let entry = unsafe { ash::Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Everything created below is destroyed again if a later step fails
        let mut partial = PartialDevice::default();

        // Step 2: Create instance
        let validation = options.debug && Self::validation_layer_available(&entry);
        if options.debug && !validation {
            log::warn!("Validation layers requested but not available");
        }
        let instance = Self::create_instance(&entry, validation, target)?;
        partial.instance = Some(instance.clone());

        // Step 3: Setup debug messenger if validation enabled
        if validation {
            partial.debug_utils = Some(Self::setup_debug_messenger(&entry, &instance)?);
        }

        // Step 4: Create surface (windowed devices only)
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        if let Some(target) = target {
            let surface = unsafe {
                ash_window::create_surface(&entry, &instance, target.display, target.window, None)
            }
            .context("Failed to create window surface")?;
            partial.surface = Some((surface_loader.clone(), surface));
        }
        let surface = partial.surface.as_ref().map(|(_, surface)| *surface);

        // Step 5: Pick physical device (GPU)
        let (physical_device, graphics_queue_family) =
            Self::pick_physical_device(&instance, surface.map(|s| (&surface_loader, s)))?;

        // Step 6: Create logical device
        let features = unsafe { instance.get_physical_device_features(physical_device) };
        let anisotropy_supported = features.sampler_anisotropy == vk::TRUE;
        let (device, graphics_queue) = Self::create_logical_device(
            &instance,
            physical_device,
            graphics_queue_family,
            anisotropy_supported,
            surface.is_some(),
        )?;
        partial.device = Some(device.clone());

        // Step 7: Cache device properties
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // Step 8: Create memory allocator (dropped before the device on failure)
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create memory allocator")?;

        // Step 9: Built-in samplers
        let samplers = DeviceSamplers::new(
            &device,
            anisotropy_supported,
            properties.limits.max_sampler_anisotropy,
        )?;

        let debug_utils = partial.debug_utils.take();
        partial.release();

        let device = Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            samplers,
            device,
            physical_device,
            instance,
            entry,
            graphics_queue,
            graphics_queue_family,
            queue_lock: Mutex::new(()),
            debug_utils,
            pending_present_waits: Mutex::new(Vec::new()),
            properties,
            options: *options,
        });

        Ok((device, surface))
    }

    fn validation_layer_available(entry: &ash::Entry) -> bool {
        let Ok(layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
            return false;
        };
        layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER_NAME)
    }

    fn create_instance(
        entry: &ash::Entry,
        enable_validation: bool,
        target: Option<SurfaceTarget>,
    ) -> Result<ash::Instance> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"vk-samples")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"vk-samples")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        // Surface extensions for the window's platform
        let mut extensions: Vec<*const c_char> = match target {
            Some(target) => ash_window::enumerate_required_extensions(target.display)
                .context("Failed to query required surface extensions")?
                .to_vec(),
            None => Vec::new(),
        };

        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        #[allow(unused_mut)]
        let mut flags = vk::InstanceCreateFlags::empty();
        #[cfg(target_os = "macos")]
        {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
            flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        // Validation layers
        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .flags(flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")
    }

    fn setup_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            bail!("No Vulkan-capable GPU found");
        }

        // Score each device
        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let queue_families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };

            // Graphics queue that can also present, when presenting is needed
            let graphics_family = queue_families.iter().enumerate().find_map(|(i, family)| {
                let index = i as u32;
                if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                    return None;
                }
                match surface {
                    Some((loader, surface)) => unsafe {
                        loader
                            .get_physical_device_surface_support(device, index, surface)
                            .unwrap_or(false)
                    }
                    .then_some(index),
                    None => Some(index),
                }
            });

            if let Some(graphics_family) = graphics_family {
                // Score device (prefer discrete GPU)
                let score = match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                    _ => 1,
                };

                log::debug!(
                    "Found GPU: {} (type: {:?}, score: {})",
                    unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy(),
                    props.device_type,
                    score
                );

                if score > best_score {
                    best_score = score;
                    best_device = Some((device, graphics_family));
                }
            }
        }

        best_device.context("No suitable GPU found")
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
        anisotropy_supported: bool,
        windowed: bool,
    ) -> Result<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities);

        // Required device extensions
        let extensions = if windowed {
            vec![ash::khr::swapchain::NAME.as_ptr()]
        } else {
            vec![]
        };

        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(anisotropy_supported);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        Ok((device, graphics_queue))
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn options(&self) -> &GraphicsDeviceOptions {
        &self.options
    }

    pub(crate) fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn point_sampler(&self) -> &Sampler {
        &self.samplers.point
    }

    pub fn linear_sampler(&self) -> &Sampler {
        &self.samplers.linear
    }

    pub fn aniso4x_sampler(&self) -> &Sampler {
        &self.samplers.aniso4x
    }

    // =========================================================================
    // MEMORY
    // =========================================================================

    pub(crate) fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        self.allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for {}", name))
    }

    pub(crate) fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::error!("Failed to free allocation: {}", e);
        }
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    /// Submit a finished command list. Its fence is signalled when the GPU is done.
    pub fn submit_commands(&self, command_list: &CommandList) -> Result<()> {
        command_list.ensure_executable()?;

        let command_buffers = [command_list.command_buffer];

        // The list may still be in flight from an earlier submission
        super::sync::wait_and_reset(&self.device, command_list.fence)?;

        let mut pending = self.pending_present_waits.lock();
        let semaphores = super::sync::chain_present_semaphores(&pending, command_list.signal_semaphores());
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; semaphores.wait.len()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&semaphores.wait)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&semaphores.signal);

        {
            let _queue = self.queue_lock.lock();
            unsafe {
                self.device
                    .queue_submit(self.graphics_queue, &[submit_info], command_list.fence)
                    .context("Failed to submit command list")?;
            }
        }

        for semaphore in semaphores.signal {
            if !pending.contains(&semaphore) {
                pending.push(semaphore);
            }
        }
        Ok(())
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_for_idle(&self) -> Result<()> {
        let _queue = self.queue_lock.lock();
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }

    /// Write `data` into a host-visible buffer immediately, outside any command list.
    pub fn update_buffer<T: Pod>(&self, buffer: &DeviceBuffer, offset: u64, data: &[T]) -> Result<()> {
        buffer.write(offset, bytemuck::cast_slice(data))
    }

    /// Present the swapchain's current image and acquire the next one.
    pub fn swap_buffers(&self, swapchain: &mut Swapchain) -> Result<()> {
        let waits: Vec<vk::Semaphore> = std::mem::take(&mut *self.pending_present_waits.lock());
        {
            let _queue = self.queue_lock.lock();
            swapchain.present(self.graphics_queue, &waits)?;
        }
        swapchain.acquire_next_image()
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        log::info!("Destroying graphics device...");

        // Wait for device to finish
        let _ = unsafe { self.device.device_wait_idle() };

        // Cleanup in reverse order
        unsafe {
            self.samplers.destroy(&self.device);

            // The allocator releases its memory blocks through the device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
