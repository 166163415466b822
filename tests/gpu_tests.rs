//! GPU integration tests: resource creation, copies and command-list rules
//! on a real headless device. Each test returns early when Vulkan is missing.

mod common;

use common::headless_device;
use vk_samples::assets::ImageTexture;
use vk_samples::backend::{
    BindableResource, BufferDescription, BufferUsage, CommandList, DeviceBuffer, PixelFormat,
    ResourceKind, ResourceLayout, ResourceLayoutDescription, ResourceLayoutElementDescription,
    ResourceSet, ResourceSetDescription, Shader, ShaderDescription, ShaderStage, ShaderStages,
    Texture, TextureDescription, TextureUsage, TextureView,
};
use vk_samples::samples::{copy_texture, cubemap_copy};

fn rgba_texture(usage: TextureUsage) -> TextureDescription {
    TextureDescription::texture_2d(64, 64, 1, 1, PixelFormat::R8G8B8A8UNorm, usage)
}

// ============================================================================
// Samples
// ============================================================================

#[test]
fn copy_texture_sample_completes() {
    let Some(device) = headless_device() else { return };
    copy_texture::run_on(&device).unwrap();
}

#[test]
fn cubemap_copy_sample_completes() {
    let Some(device) = headless_device() else { return };
    cubemap_copy::run_on(&device).unwrap();
}

#[test]
fn copy_samples_can_share_a_device() {
    let Some(device) = headless_device() else { return };
    copy_texture::run_on(&device).unwrap();
    cubemap_copy::run_on(&device).unwrap();
    device.wait_for_idle().unwrap();
}

// ============================================================================
// Command list rules
// ============================================================================

#[test]
fn submitting_while_recording_fails() {
    let Some(device) = headless_device() else { return };
    let mut cl = CommandList::new(&device).unwrap();

    assert!(device.submit_commands(&cl).is_err());
    cl.begin().unwrap();
    assert!(cl.begin().is_err());
    assert!(device.submit_commands(&cl).is_err());
    cl.end().unwrap();
    assert!(cl.end().is_err());
    device.submit_commands(&cl).unwrap();
    device.wait_for_idle().unwrap();
}

#[test]
fn command_list_is_reusable_after_submission() {
    let Some(device) = headless_device() else { return };
    let src = Texture::new(&device, &rgba_texture(TextureUsage::SAMPLED)).unwrap();
    let dst = Texture::new(&device, &rgba_texture(TextureUsage::SAMPLED)).unwrap();
    let mut cl = CommandList::new(&device).unwrap();

    for _ in 0..3 {
        cl.begin().unwrap();
        cl.copy_texture(&src, &dst).unwrap();
        cl.end().unwrap();
        device.submit_commands(&cl).unwrap();
    }
    device.wait_for_idle().unwrap();
}

#[test]
fn recording_outside_begin_fails() {
    let Some(device) = headless_device() else { return };
    let src = Texture::new(&device, &rgba_texture(TextureUsage::SAMPLED)).unwrap();
    let dst = Texture::new(&device, &rgba_texture(TextureUsage::SAMPLED)).unwrap();
    let mut cl = CommandList::new(&device).unwrap();

    assert!(cl.copy_texture(&src, &dst).is_err());
}

#[test]
fn mismatched_copies_are_rejected() {
    let Some(device) = headless_device() else { return };
    let small = Texture::new(&device, &rgba_texture(TextureUsage::SAMPLED)).unwrap();
    let cube = Texture::new(&device, &rgba_texture(TextureUsage::CUBEMAP)).unwrap();
    let big = Texture::new(
        &device,
        &TextureDescription::texture_2d(128, 128, 1, 1, PixelFormat::R8G8B8A8UNorm, TextureUsage::SAMPLED),
    )
    .unwrap();

    let mut cl = CommandList::new(&device).unwrap();
    cl.begin().unwrap();
    assert!(cl.copy_texture(&small, &big).is_err());
    assert!(cl.copy_texture(&small, &cube).is_err());

    // Past the sixth face
    assert!(cl
        .copy_texture_region(&small, 0, 0, 0, 0, 0, &cube, 0, 0, 0, 0, 6, 64, 64, 0, 1)
        .is_err());
    // Larger than the destination
    assert!(cl
        .copy_texture_region(&big, 0, 0, 0, 0, 0, &cube, 0, 0, 0, 0, 0, 128, 128, 0, 1)
        .is_err());
    // Last face is fine
    cl.copy_texture_region(&small, 0, 0, 0, 0, 0, &cube, 0, 0, 0, 0, 5, 64, 64, 0, 1)
        .unwrap();

    cl.end().unwrap();
    device.submit_commands(&cl).unwrap();
    device.wait_for_idle().unwrap();
}

// ============================================================================
// Resources
// ============================================================================

#[test]
fn buffer_updates_are_range_checked() {
    let Some(device) = headless_device() else { return };
    let buffer = DeviceBuffer::new(&device, &BufferDescription::new(16, BufferUsage::UNIFORM)).unwrap();

    device.update_buffer(&buffer, 0, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    device.update_buffer(&buffer, 12, &[0.5f32]).unwrap();
    assert!(device.update_buffer(&buffer, 8, &[0.0f32; 4]).is_err());

    let mut cl = CommandList::new(&device).unwrap();
    cl.begin().unwrap();
    cl.update_buffer(&buffer, 0, &[1u32, 2, 3, 4]).unwrap();
    cl.update_buffer(&buffer, 2, &[1u32]).unwrap();
    assert!(cl.update_buffer(&buffer, 0, &[0u32; 5]).is_err());
    assert!(cl.update_buffer(&buffer, 14, &[0u32]).is_err());
    cl.end().unwrap();
    device.submit_commands(&cl).unwrap();
    device.wait_for_idle().unwrap();
}

#[test]
fn unaligned_index_updates_are_recorded() {
    let Some(device) = headless_device() else { return };
    let indices = DeviceBuffer::new(&device, &BufferDescription::new(6, BufferUsage::INDEX)).unwrap();
    let mut cl = CommandList::new(&device).unwrap();

    // Twice, so the staging buffers of the first recording are released on the second
    for _ in 0..2 {
        cl.begin().unwrap();
        cl.update_buffer(&indices, 0, &[0u16, 1, 2]).unwrap();
        cl.update_buffer(&indices, 2, &[7u16]).unwrap();
        cl.end().unwrap();
        device.submit_commands(&cl).unwrap();
    }
    device.wait_for_idle().unwrap();
}

#[test]
fn zero_sized_buffer_is_rejected() {
    let Some(device) = headless_device() else { return };
    assert!(DeviceBuffer::new(&device, &BufferDescription::new(0, BufferUsage::VERTEX)).is_err());
}

#[test]
fn image_uploads_with_full_mip_chain() {
    let Some(device) = headless_device() else { return };
    let image = image::RgbaImage::from_fn(32, 16, |x, y| image::Rgba([(x * 8) as u8, (y * 16) as u8, 0, 255]));
    let asset = ImageTexture::from_image(image);

    let texture = asset.create_device_texture(&device).unwrap();
    assert_eq!(texture.description().mip_levels, 6);
    assert_eq!(texture.width(), 32);
    TextureView::new(&device, &texture).unwrap();
}

#[test]
fn views_need_sampled_textures() {
    let Some(device) = headless_device() else { return };
    let cube = Texture::new(&device, &rgba_texture(TextureUsage::CUBEMAP)).unwrap();
    assert!(TextureView::new(&device, &cube).is_err());

    let sampled_cube = Texture::new(&device, &rgba_texture(TextureUsage::CUBEMAP | TextureUsage::SAMPLED)).unwrap();
    TextureView::new(&device, &sampled_cube).unwrap();
}

#[test]
fn resource_sets_must_match_their_layout() {
    let Some(device) = headless_device() else { return };
    let layout = ResourceLayout::new(
        &device,
        &ResourceLayoutDescription::new(vec![
            ResourceLayoutElementDescription::new("World", ResourceKind::UniformBuffer, ShaderStages::VERTEX),
            ResourceLayoutElementDescription::new("SurfaceSampler", ResourceKind::Sampler, ShaderStages::FRAGMENT),
        ]),
    )
    .unwrap();
    let buffer = DeviceBuffer::new(&device, &BufferDescription::new(64, BufferUsage::UNIFORM)).unwrap();

    ResourceSet::new(
        &device,
        &ResourceSetDescription::new(
            &layout,
            vec![BindableResource::Buffer(&buffer), BindableResource::Sampler(device.aniso4x_sampler())],
        ),
    )
    .unwrap();

    assert!(ResourceSet::new(
        &device,
        &ResourceSetDescription::new(
            &layout,
            vec![BindableResource::Sampler(device.linear_sampler()), BindableResource::Buffer(&buffer)],
        ),
    )
    .is_err());

    assert!(ResourceSet::new(
        &device,
        &ResourceSetDescription::new(&layout, vec![BindableResource::Buffer(&buffer)]),
    )
    .is_err());

    // A vertex buffer cannot stand in for a uniform buffer
    let vertices = DeviceBuffer::new(&device, &BufferDescription::new(64, BufferUsage::VERTEX)).unwrap();
    let err = match ResourceSet::new(
        &device,
        &ResourceSetDescription::new(
            &layout,
            vec![BindableResource::Buffer(&vertices), BindableResource::Sampler(device.linear_sampler())],
        ),
    ) {
        Ok(_) => panic!("vertex buffer bound as a uniform buffer"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("slot 0"));
}

#[test]
fn cube_shaders_create_modules() {
    let Some(device) = headless_device() else { return };
    let source = include_str!("../shaders/cube.wgsl");

    let vs = Shader::from_wgsl(&device, &ShaderDescription::new(ShaderStage::Vertex, source, "VS")).unwrap();
    let fs = Shader::from_wgsl(&device, &ShaderDescription::new(ShaderStage::Fragment, source, "FS")).unwrap();
    assert_eq!(vs.stage(), ShaderStage::Vertex);
    assert_eq!(fs.stage(), ShaderStage::Fragment);
}

#[test]
fn device_exposes_three_samplers() {
    let Some(device) = headless_device() else { return };
    use vk_samples::backend::SamplerFilter;

    assert_eq!(device.point_sampler().description().filter, SamplerFilter::Point);
    assert_eq!(device.linear_sampler().description().filter, SamplerFilter::Linear);
    assert_eq!(device.aniso4x_sampler().description().filter, SamplerFilter::Anisotropic);
}
