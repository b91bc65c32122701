// Geometry - the vertex record and the hard-coded quad
//
// The vertex layout handed to the pipeline is derived from this struct's
// memory layout, so the two can never drift apart.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::mem::{offset_of, size_of};

use crate::backend::pipeline::VertexLayout;

/// Interleaved vertex: 2D clip-space position followed by an RGB color.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec2,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(x: f32, y: f32, color: [f32; 3]) -> Self {
        Self {
            position: Vec2::new(x, y),
            color: Vec3::new(color[0], color[1], color[2]),
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(Vertex, position) as u32)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Vertex, color) as u32)
                .build(),
        ]
    }

    pub fn layout() -> VertexLayout {
        VertexLayout {
            binding: Self::binding_description(),
            attributes: Self::attribute_descriptions().to_vec(),
        }
    }
}

const RED: [f32; 3] = [1.0, 0.0, 0.0];
const GREEN: [f32; 3] = [0.0, 1.0, 0.0];
const BLUE: [f32; 3] = [0.0, 0.0, 1.0];
const WHITE: [f32; 3] = [1.0, 1.0, 1.0];

/// Four corners of the quad, wound clockwise in Vulkan clip space.
pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new(-1.0, -1.0, RED),
    Vertex::new(0.5, -0.5, GREEN),
    Vertex::new(1.0, 1.0, BLUE),
    Vertex::new(-0.5, 0.5, WHITE),
];

/// Two triangles sharing the 0-2 diagonal.
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];
