// =============================================================================
// SAMPLE HOST - winit event loop driving a SampleApplication
// =============================================================================
//
// The host owns the window, the device and its main swapchain. It creates
// them when the event loop resumes, hands them to the sample once for
// resource creation, then calls the sample's draw routine every frame with
// the elapsed time since the previous frame.

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

use crate::backend::{GraphicsDevice, GraphicsDeviceOptions, PixelFormat, Swapchain};
use crate::config::Config;

/// Everything a sample needs to create resources and draw a frame.
///
/// Field order matters for Drop: the swapchain goes before the window it presents to.
pub struct SampleContext {
    pub swapchain: Swapchain,
    pub device: Arc<GraphicsDevice>,
    pub window: Arc<Window>,
    asset_root: PathBuf,
}

impl SampleContext {
    /// Current window width in physical pixels.
    pub fn width(&self) -> u32 {
        self.window.inner_size().width
    }

    /// Current window height in physical pixels.
    pub fn height(&self) -> u32 {
        self.window.inner_size().height
    }

    pub fn asset_path(&self, relative: &str) -> PathBuf {
        self.asset_root.join(relative)
    }
}

/// An interactive sample: one-time setup, then one draw per frame.
pub trait SampleApplication {
    fn name(&self) -> &str;

    /// Device configuration: validation in debug builds (when the config allows
    /// it), 16-bit depth, vsync.
    fn device_options(&self, config: &Config) -> GraphicsDeviceOptions {
        GraphicsDeviceOptions::new(
            config.validation_enabled(cfg!(debug_assertions)),
            Some(PixelFormat::R16UNorm),
            true,
        )
    }

    fn create_resources(&mut self, ctx: &mut SampleContext) -> Result<()>;

    fn draw(&mut self, ctx: &mut SampleContext, delta_seconds: f32) -> Result<()>;
}

/// Run `sample` until its window closes. Returns the first fatal error, if any.
pub fn run<S: SampleApplication>(sample: S, config: Config) -> Result<()> {
    let event_loop = EventLoop::new()?;
    let mut host = Host::new(sample, config);
    event_loop.run_app(&mut host)?;

    match host.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// IMPORTANT: Field order matters for Drop! The sample's GPU resources are
/// released before the context that owns the device and window.
struct Host<S: SampleApplication> {
    sample: S,
    context: Option<SampleContext>,
    config: Config,
    error: Option<anyhow::Error>,

    is_fullscreen: bool,
    is_minimized: bool,
    needs_resize: bool,

    last_frame_time: Instant,
    last_fps_update: Instant,
    frame_count: u32,
}

impl<S: SampleApplication> Host<S> {
    fn new(sample: S, config: Config) -> Self {
        let now = Instant::now();
        Self {
            sample,
            context: None,
            is_fullscreen: config.window.fullscreen,
            config,
            error: None,
            is_minimized: false,
            needs_resize: false,
            last_frame_time: now,
            last_fps_update: now,
            frame_count: 0,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, what: &str, error: anyhow::Error) {
        log::error!("{} failed: {:#}", what, error);
        if self.error.is_none() {
            self.error = Some(error.context(format!("{} failed", what)));
        }
        event_loop.exit();
    }

    fn init(&mut self, window: Arc<Window>) -> Result<()> {
        let size = window.inner_size();
        let options = self.sample.device_options(&self.config);
        let (device, swapchain) =
            GraphicsDevice::create_vulkan_with_window(&options, window.as_ref(), size.width, size.height)?;

        let mut context = SampleContext {
            swapchain,
            device,
            window,
            asset_root: self.config.assets.root.clone(),
        };

        log::info!("Creating resources for {}", self.sample.name());
        self.sample.create_resources(&mut context)?;
        self.context = Some(context);
        self.last_frame_time = Instant::now();
        Ok(())
    }

    /// Draw one frame. Returns false when nothing was drawn.
    fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }
        let Some(context) = self.context.as_mut() else {
            return Ok(false);
        };

        if self.needs_resize {
            let size = context.window.inner_size();
            if size.width == 0 || size.height == 0 {
                return Ok(false);
            }
            context.swapchain.resize(size.width, size.height)?;
            self.needs_resize = false;
        }

        let now = Instant::now();
        let delta_seconds = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        self.sample.draw(context, delta_seconds)?;
        Ok(true)
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(context) = &self.context {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                // Enter fullscreen (use current monitor)
                context.window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                context.window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.needs_resize = true;
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(context) = &self.context {
                context.window.set_title(&format!(
                    "{} - {} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    self.sample.name(),
                    fps,
                    1000.0 / fps.max(f32::EPSILON)
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

impl<S: SampleApplication> ApplicationHandler for Host<S> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.context.is_some() {
            return;
        }

        // Create window with settings from config
        let mut window_attributes = WindowAttributes::default()
            .with_title(format!("{} - {}", self.config.window.title, self.sample.name()))
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, "Window creation", anyhow!(e));
                return;
            }
        };

        if let Err(e) = self.init(window) {
            self.fail(event_loop, "Sample initialization", e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => self.fail(event_loop, "Frame", e),
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws while the sample is running.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(context) = &self.context {
            context.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(context) = &self.context {
            if let Err(e) = context.device.wait_for_idle() {
                log::error!("Failed to wait for device idle on exit: {:#}", e);
            }
        }
    }
}
