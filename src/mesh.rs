// Cube mesh
//
// 24 vertices (four per face so every face gets its own texture
// coordinates) and 36 16-bit indices. Faces are unit quads centred on the
// origin, wound clockwise when seen from outside with Y up.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::backend::{
    VertexElementDescription, VertexElementFormat, VertexElementSemantic, VertexLayoutDescription,
};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VertexPositionTexture {
    pub position: Vec3,
    pub tex_coords: Vec2,
}

impl VertexPositionTexture {
    pub const SIZE_IN_BYTES: usize = 20;

    pub const fn new(position: Vec3, tex_coords: Vec2) -> Self {
        Self {
            position,
            tex_coords,
        }
    }

    /// `Position: Float3` at location 0, `TexCoords: Float2` at location 1.
    pub fn layout() -> VertexLayoutDescription {
        VertexLayoutDescription::new(vec![
            VertexElementDescription::new(
                "Position",
                VertexElementSemantic::Position,
                VertexElementFormat::Float3,
            ),
            VertexElementDescription::new(
                "TexCoords",
                VertexElementSemantic::TextureCoordinate,
                VertexElementFormat::Float2,
            ),
        ])
    }
}

const fn v(x: f32, y: f32, z: f32, u: f32, t: f32) -> VertexPositionTexture {
    VertexPositionTexture::new(Vec3::new(x, y, z), Vec2::new(u, t))
}

pub fn cube_vertices() -> [VertexPositionTexture; 24] {
    [
        // Top
        v(-0.5, 0.5, -0.5, 0.0, 0.0),
        v(0.5, 0.5, -0.5, 1.0, 0.0),
        v(0.5, 0.5, 0.5, 1.0, 1.0),
        v(-0.5, 0.5, 0.5, 0.0, 1.0),
        // Bottom
        v(-0.5, -0.5, 0.5, 0.0, 0.0),
        v(0.5, -0.5, 0.5, 1.0, 0.0),
        v(0.5, -0.5, -0.5, 1.0, 1.0),
        v(-0.5, -0.5, -0.5, 0.0, 1.0),
        // Left
        v(-0.5, 0.5, -0.5, 0.0, 0.0),
        v(-0.5, 0.5, 0.5, 1.0, 0.0),
        v(-0.5, -0.5, 0.5, 1.0, 1.0),
        v(-0.5, -0.5, -0.5, 0.0, 1.0),
        // Right
        v(0.5, 0.5, 0.5, 0.0, 0.0),
        v(0.5, 0.5, -0.5, 1.0, 0.0),
        v(0.5, -0.5, -0.5, 1.0, 1.0),
        v(0.5, -0.5, 0.5, 0.0, 1.0),
        // Back
        v(0.5, 0.5, -0.5, 0.0, 0.0),
        v(-0.5, 0.5, -0.5, 1.0, 0.0),
        v(-0.5, -0.5, -0.5, 1.0, 1.0),
        v(0.5, -0.5, -0.5, 0.0, 1.0),
        // Front
        v(-0.5, 0.5, 0.5, 0.0, 0.0),
        v(0.5, 0.5, 0.5, 1.0, 0.0),
        v(0.5, -0.5, 0.5, 1.0, 1.0),
        v(-0.5, -0.5, 0.5, 0.0, 1.0),
    ]
}

pub fn cube_indices() -> [u16; 36] {
    let mut indices = [0u16; 36];
    for face in 0..6u16 {
        let base = face * 4;
        let quad = [base, base + 1, base + 2, base, base + 2, base + 3];
        let start = face as usize * 6;
        indices[start..start + 6].copy_from_slice(&quad);
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(
            std::mem::size_of::<VertexPositionTexture>(),
            VertexPositionTexture::SIZE_IN_BYTES
        );
        assert_eq!(VertexPositionTexture::layout().stride as usize, VertexPositionTexture::SIZE_IN_BYTES);
    }

    #[test]
    fn cube_has_twelve_triangles() {
        assert_eq!(cube_vertices().len(), 24);
        let indices = cube_indices();
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| i < 24));
        assert_eq!(&indices[..6], &[0, 1, 2, 0, 2, 3]);
        assert_eq!(&indices[30..], &[20, 21, 22, 20, 22, 23]);
    }

    #[test]
    fn faces_are_unit_quads_around_origin() {
        let vertices = cube_vertices();
        for face in vertices.chunks(4) {
            let min = face.iter().fold(Vec3::splat(f32::MAX), |m, v| m.min(v.position));
            let max = face.iter().fold(Vec3::splat(f32::MIN), |m, v| m.max(v.position));
            let size = max - min;

            // Flat along exactly one axis, side 1.0 along the other two
            let flat_axes = size.to_array().iter().filter(|&&s| s == 0.0).count();
            assert_eq!(flat_axes, 1);
            assert!(size.to_array().iter().all(|&s| s == 0.0 || s == 1.0));

            // Sits on the cube surface
            let centre = (min + max) * 0.5;
            assert_eq!(centre.abs().max_element(), 0.5);
            assert_eq!(centre.length(), 0.5);
        }
    }

    #[test]
    fn front_faces_wind_clockwise_from_outside() {
        let vertices = cube_vertices();
        let indices = cube_indices();
        for triangle in indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| vertices[triangle[i] as usize].position);
            // Clockwise seen from outside means the right-handed normal points inward
            let normal = (b - a).cross(c - a);
            let centre = (a + b + c) / 3.0;
            assert!(normal.dot(centre) < 0.0, "triangle {:?} is wound counter-clockwise", triangle);
        }
    }

    #[test]
    fn every_face_covers_full_texture() {
        for face in cube_vertices().chunks(4) {
            let uvs: Vec<Vec2> = face.iter().map(|v| v.tex_coords).collect();
            assert_eq!(uvs, vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)]);
        }
    }
}
