//! Vertex stage: every vertex of every mesh into viewport and eye space.

use std::sync::Arc;

use nalgebra::{vector, Vector3};

use super::buffer::{FrameUniforms, TransformedVertex};
use super::util::divide_w;
use crate::device::{host_mut, Device};
use crate::error::DeviceError;
use crate::scene::{GeometryStore, Mesh};

/// Transforms vertex `index` of `mesh`.
///
/// Viewport x and y both run against their NDC axis, `0.5 * w * (1 - x)`; the
/// rasterizer's mirrored addressing turns that back into a bottom-left origin.
pub fn transform_vertex(mesh: &Mesh, index: usize, uniforms: &FrameUniforms, width: u32, height: u32) -> TransformedVertex {
    let model_position = mesh.positions[index].to_homogeneous();

    let ndc = divide_w(uniforms.mvp * model_position);
    let position = vector![
        0.5 * width as f32 * (1.0 - ndc.x),
        0.5 * height as f32 * (1.0 - ndc.y),
        ndc.z,
        ndc.w
    ];
    let eye_position = divide_w(uniforms.mv * model_position).xyz();
    let eye_normal = (uniforms.mv_normal * mesh.normals[index])
        .try_normalize(f32::EPSILON)
        .unwrap_or_else(Vector3::zeros);

    return TransformedVertex {
        position,
        eye_position,
        eye_normal,
        uv: mesh.uvs[index],
        texture: mesh.texture,
    };
}

/// Launches one work item per vertex, mesh after mesh, into the vertex arena.
pub fn run(
    device: &Device,
    store: &Arc<GeometryStore>,
    vertices: &mut Arc<Vec<TransformedVertex>>,
    uniforms: &FrameUniforms,
    width: u32,
    height: u32,
) -> Result<(), DeviceError> {
    let vertices = host_mut(vertices, "transformed vertices")?;
    for (mesh_index, mesh) in store.meshes().iter().enumerate() {
        let range = mesh.vertex_base..mesh.vertex_base + mesh.vertex_count();
        let store = Arc::clone(store);
        let uniforms = *uniforms;
        device.map_into("vertex_transform", &mut vertices[range], move |i| {
            transform_vertex(&store.meshes()[mesh_index], i, &uniforms, width, height)
        })?;
    }
    return Ok(());
}
