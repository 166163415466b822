// Textured cube
//
// A cube spinning about Y and X, sampled from a mipmapped brick texture
// through the device's 4x anisotropic sampler, fading in from black over the
// first three seconds.

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use std::sync::Arc;

use crate::animation::AnimationState;
use crate::assets::ImageTexture;
use crate::backend::{
    BindableResource, BlendState, BufferDescription, BufferUsage, CommandList, DepthStencilState,
    DeviceBuffer, GraphicsDevice, GraphicsPipelineDescription, IndexFormat, Pipeline,
    PrimitiveTopology, RasterizerState, ResourceKind, ResourceLayout, ResourceLayoutDescription,
    ResourceLayoutElementDescription, ResourceSet, ResourceSetDescription, RgbaFloat,
    ShaderSetDescription, ShaderStage, ShaderStages, Texture, TextureView,
};
use crate::host::{SampleApplication, SampleContext};
use crate::load_shader;
use crate::mesh::{cube_indices, cube_vertices, VertexPositionTexture};

pub const TEXTURE_PATH: &str = "textures/spnza_bricks_a_diff.png";

const MATRIX_SIZE: u64 = 64;
const OPACITY_SIZE: u64 = 16;

const FIELD_OF_VIEW: f32 = 1.0;
const NEAR_PLANE: f32 = 0.5;
const FAR_PLANE: f32 = 100.0;
const CAMERA_DISTANCE: f32 = 2.5;

const FADE_DURATION: f32 = 3.0;

pub fn projection_matrix(width: u32, height: u32) -> Mat4 {
    let aspect = width as f32 / height.max(1) as f32;
    Mat4::perspective_rh(FIELD_OF_VIEW, aspect, NEAR_PLANE, FAR_PLANE)
}

pub fn view_matrix() -> Mat4 {
    Mat4::look_at_rh(Vec3::Z * CAMERA_DISTANCE, Vec3::ZERO, Vec3::Y)
}

/// Rotation about Y and about X, in radians, after `ticks` milliseconds.
pub fn rotation_angles(ticks: f32) -> (f32, f32) {
    (ticks / 1000.0, ticks / 3000.0)
}

/// Rotate about Y first, then about X.
pub fn world_matrix(ticks: f32) -> Mat4 {
    let (y, x) = rotation_angles(ticks);
    Mat4::from_rotation_x(x) * Mat4::from_rotation_y(y)
}

/// Per-frame CPU state: elapsed milliseconds and the fade-in animation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    pub ticks: f32,
    pub animation: AnimationState,
}

impl Default for FrameState {
    fn default() -> Self {
        Self {
            ticks: 0.0,
            animation: AnimationState::new(0.0, 1.0, FADE_DURATION),
        }
    }
}

impl FrameState {
    /// Advance by one frame and return the opacity to draw with.
    pub fn advance(&mut self, delta_seconds: f32) -> f32 {
        self.ticks += delta_seconds * 1000.0;
        self.animation.advance(delta_seconds)
    }

    pub fn world_matrix(&self) -> Mat4 {
        world_matrix(self.ticks)
    }
}

/// GPU resources; the command list is declared first so it is dropped,
/// and waits for its last submission, before anything it references.
struct CubeResources {
    cl: CommandList,
    world_texture_set: ResourceSet,
    proj_view_set: ResourceSet,
    pipeline: Pipeline,
    _world_texture_layout: ResourceLayout,
    _proj_view_layout: ResourceLayout,
    opacity_buffer: DeviceBuffer,
    _surface_texture_view: TextureView,
    _surface_texture: Texture,
    index_buffer: DeviceBuffer,
    vertex_buffer: DeviceBuffer,
    world_buffer: DeviceBuffer,
    view_buffer: DeviceBuffer,
    projection_buffer: DeviceBuffer,
}

#[derive(Default)]
pub struct TexturedCube {
    state: FrameState,
    resources: Option<CubeResources>,
}

impl TexturedCube {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_state(&self) -> &FrameState {
        &self.state
    }
}

fn uniform_buffer(device: &Arc<GraphicsDevice>, size: u64) -> Result<DeviceBuffer> {
    DeviceBuffer::new(device, &BufferDescription::new(size, BufferUsage::UNIFORM))
}

impl SampleApplication for TexturedCube {
    fn name(&self) -> &str {
        "Textured Cube"
    }

    fn create_resources(&mut self, ctx: &mut SampleContext) -> Result<()> {
        let device = ctx.device.clone();

        let mut cl = CommandList::new(&device)?;
        cl.begin()?;

        let projection_buffer = uniform_buffer(&device, MATRIX_SIZE)?;
        let view_buffer = uniform_buffer(&device, MATRIX_SIZE)?;
        let world_buffer = uniform_buffer(&device, MATRIX_SIZE)?;

        let vertices = cube_vertices();
        let vertex_buffer = DeviceBuffer::new(
            &device,
            &BufferDescription::new(
                (VertexPositionTexture::SIZE_IN_BYTES * vertices.len()) as u64,
                BufferUsage::VERTEX,
            ),
        )?;
        cl.update_buffer(&vertex_buffer, 0, &vertices)?;

        let indices = cube_indices();
        let index_buffer = DeviceBuffer::new(
            &device,
            &BufferDescription::new(std::mem::size_of_val(&indices) as u64, BufferUsage::INDEX),
        )?;
        cl.update_buffer(&index_buffer, 0, &indices)?;

        let image = ImageTexture::from_path(ctx.asset_path(TEXTURE_PATH))?;
        let surface_texture = image.create_device_texture(&device)?;
        let surface_texture_view = TextureView::new(&device, &surface_texture)?;

        cl.end()?;
        device.submit_commands(&cl)?;
        device.wait_for_idle()?;

        let vertex_shader = load_shader!(&device, ShaderStage::Vertex, "../../shaders/cube.wgsl", "VS")?;
        let fragment_shader = load_shader!(&device, ShaderStage::Fragment, "../../shaders/cube.wgsl", "FS")?;

        let proj_view_layout = ResourceLayout::new(
            &device,
            &ResourceLayoutDescription::new(vec![
                ResourceLayoutElementDescription::new("Projection", ResourceKind::UniformBuffer, ShaderStages::VERTEX),
                ResourceLayoutElementDescription::new("View", ResourceKind::UniformBuffer, ShaderStages::VERTEX),
            ]),
        )?;

        let world_texture_layout = ResourceLayout::new(
            &device,
            &ResourceLayoutDescription::new(vec![
                ResourceLayoutElementDescription::new("World", ResourceKind::UniformBuffer, ShaderStages::VERTEX),
                ResourceLayoutElementDescription::new(
                    "SurfaceTexture",
                    ResourceKind::TextureReadOnly,
                    ShaderStages::FRAGMENT,
                ),
                ResourceLayoutElementDescription::new("SurfaceSampler", ResourceKind::Sampler, ShaderStages::FRAGMENT),
                ResourceLayoutElementDescription::new("Opacity", ResourceKind::UniformBuffer, ShaderStages::FRAGMENT),
            ]),
        )?;

        let pipeline = Pipeline::new_graphics(
            &device,
            &GraphicsPipelineDescription {
                blend_state: BlendState::SingleOverride,
                depth_stencil_state: DepthStencilState::DEPTH_ONLY_LESS_EQUAL,
                rasterizer_state: RasterizerState::default(),
                primitive_topology: PrimitiveTopology::TriangleList,
                shader_set: ShaderSetDescription::new(
                    vec![VertexPositionTexture::layout()],
                    vec![&vertex_shader, &fragment_shader],
                ),
                resource_layouts: vec![&proj_view_layout, &world_texture_layout],
                outputs: ctx.swapchain.output_description(),
            },
        )?;

        let proj_view_set = ResourceSet::new(
            &device,
            &ResourceSetDescription::new(
                &proj_view_layout,
                vec![(&projection_buffer).into(), (&view_buffer).into()],
            ),
        )?;

        let opacity_buffer = uniform_buffer(&device, OPACITY_SIZE)?;

        let world_texture_set = ResourceSet::new(
            &device,
            &ResourceSetDescription::new(
                &world_texture_layout,
                vec![
                    BindableResource::Buffer(&world_buffer),
                    BindableResource::TextureView(&surface_texture_view),
                    BindableResource::Sampler(device.aniso4x_sampler()),
                    BindableResource::Buffer(&opacity_buffer),
                ],
            ),
        )?;

        self.state = FrameState::default();
        self.resources = Some(CubeResources {
            cl,
            world_texture_set,
            proj_view_set,
            pipeline,
            _world_texture_layout: world_texture_layout,
            _proj_view_layout: proj_view_layout,
            opacity_buffer,
            _surface_texture_view: surface_texture_view,
            _surface_texture: surface_texture,
            index_buffer,
            vertex_buffer,
            world_buffer,
            view_buffer,
            projection_buffer,
        });

        log::info!("Textured cube ready");
        Ok(())
    }

    fn draw(&mut self, ctx: &mut SampleContext, delta_seconds: f32) -> Result<()> {
        let opacity = self.state.advance(delta_seconds);
        let world = self.state.world_matrix();
        let res = self
            .resources
            .as_mut()
            .context("draw() called before create_resources()")?;
        let cl = &mut res.cl;

        cl.begin()?;

        // The previous frame has finished with the buffer once begin() returns
        ctx.device.update_buffer(&res.opacity_buffer, 0, &[opacity])?;

        cl.update_buffer(&res.projection_buffer, 0, &[projection_matrix(ctx.width(), ctx.height())])?;
        cl.update_buffer(&res.view_buffer, 0, &[view_matrix()])?;
        cl.update_buffer(&res.world_buffer, 0, &[world])?;

        cl.set_framebuffer(&ctx.swapchain.framebuffer())?;
        cl.set_full_viewports()?;
        cl.clear_color_target(0, RgbaFloat::BLACK)?;
        cl.clear_depth_stencil(1.0)?;
        cl.set_pipeline(&res.pipeline)?;
        cl.set_vertex_buffer(0, &res.vertex_buffer)?;
        cl.set_index_buffer(&res.index_buffer, IndexFormat::UInt16)?;
        cl.set_graphics_resource_set(0, &res.proj_view_set)?;
        cl.set_graphics_resource_set(1, &res.world_texture_set)?;
        cl.draw_indexed(36, 1, 0, 0, 0)?;

        cl.end()?;
        ctx.device.submit_commands(cl)?;
        ctx.device.swap_buffers(&mut ctx.swapchain)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn approx(a: Mat4, b: Mat4) -> bool {
        a.abs_diff_eq(b, 1e-5)
    }

    #[test]
    fn rotation_rates() {
        assert_eq!(rotation_angles(0.0), (0.0, 0.0));
        assert_eq!(rotation_angles(3000.0), (3.0, 1.0));
    }

    #[test]
    fn world_rotates_about_y_before_x() {
        let ticks = 1500.0;
        let expected = Mat4::from_rotation_x(0.5) * Mat4::from_rotation_y(1.5);
        assert!(approx(world_matrix(ticks), expected));

        // A point on the X axis is first swung by the Y rotation
        let p = world_matrix(ticks) * Vec4::new(1.0, 0.0, 0.0, 1.0);
        let after_y = Mat4::from_rotation_y(1.5) * Vec4::new(1.0, 0.0, 0.0, 1.0);
        let after_x = Mat4::from_rotation_x(0.5) * after_y;
        assert!(p.abs_diff_eq(after_x, 1e-5));
    }

    #[test]
    fn camera_looks_down_negative_z_from_distance() {
        let eye_in_view = view_matrix() * Vec4::new(0.0, 0.0, 2.5, 1.0);
        assert!(eye_in_view.abs_diff_eq(Vec4::new(0.0, 0.0, 0.0, 1.0), 1e-5));

        let origin_in_view = view_matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((origin_in_view.z + 2.5).abs() < 1e-5);
    }

    #[test]
    fn projection_maps_near_and_far_to_unit_depth() {
        let proj = projection_matrix(960, 540);
        let near = proj * Vec4::new(0.0, 0.0, -0.5, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn projection_survives_zero_height() {
        let proj = projection_matrix(960, 0);
        assert!(proj.is_finite());
    }

    #[test]
    fn opacity_fades_in_over_three_seconds() {
        let mut state = FrameState::default();
        assert_eq!(state.advance(0.0), 0.0);
        assert!((state.advance(1.5) - 0.5).abs() < 1e-6);
        assert_eq!(state.advance(10.0), 1.0);
    }

    #[test]
    fn three_one_second_frames_finish_the_fade() {
        let mut state = FrameState::default();
        let mut opacity = 0.0;
        for _ in 0..3 {
            opacity = state.advance(1.0);
        }
        assert_eq!(state.ticks, 3000.0);
        assert_eq!(state.animation.progress(), 1.0);
        assert_eq!(opacity, 1.0);
        assert_eq!(rotation_angles(state.ticks), (3.0, 1.0));
    }
}
