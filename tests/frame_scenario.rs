//! Frame-loop arithmetic of the textured cube, driven without a window.

use vk_samples::mesh::{cube_indices, cube_vertices};
use vk_samples::samples::textured_cube::{rotation_angles, FrameState, TexturedCube};

#[test]
fn three_one_second_frames() {
    let mut state = FrameState::default();
    let opacities: Vec<f32> = (0..3).map(|_| state.advance(1.0)).collect();

    assert_eq!(state.ticks, 3000.0);
    assert_eq!(state.animation.progress(), 1.0);
    assert_eq!(state.animation.value(), 1.0);
    assert!((opacities[0] - 1.0 / 3.0).abs() < 1e-6);
    assert!((opacities[1] - 2.0 / 3.0).abs() < 1e-6);
    assert_eq!(opacities[2], 1.0);

    let (about_y, about_x) = rotation_angles(state.ticks);
    assert_eq!(about_y, 3.0);
    assert_eq!(about_x, 1.0);
}

#[test]
fn fresh_sample_starts_at_rest() {
    let cube = TexturedCube::new();
    assert_eq!(cube.frame_state().ticks, 0.0);
    assert_eq!(cube.frame_state().animation.value(), 0.0);
}

#[test]
fn draw_call_covers_whole_mesh() {
    // draw_indexed(36, ..) must consume exactly the uploaded index buffer
    assert_eq!(cube_indices().len(), 36);
    assert_eq!(cube_vertices().len(), 24);
}
