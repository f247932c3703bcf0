//! Primitive assembly: gathers transformed vertices through each mesh's index
//! buffer into one flat primitive array.
//!
//! Meshes are laid out back to back, mesh `m` owning the slots starting at its
//! `primitive_base`, so work items of different meshes never share a slot.

use std::sync::Arc;

use super::buffer::{Primitive, TransformedVertex};
use crate::device::{host_mut, Device};
use crate::error::DeviceError;
use crate::scene::{GeometryStore, Mesh, Topology};

/// Primitive slot and corner that index position `i` of a triangle list fills.
pub fn triangle_slot(index_position: usize) -> (usize, usize) {
    return (index_position / 3, index_position % 3);
}

/// Gathers the three corners of local primitive `primitive` of `mesh`.
pub fn assemble_triangle(mesh: &Mesh, vertices: &[TransformedVertex], primitive: usize) -> Primitive {
    let mut assembled = Primitive {
        topology: Topology::Triangle,
        ..Default::default()
    };
    for corner in 0..3 {
        let index_position = 3 * primitive + corner;
        debug_assert_eq!(triangle_slot(index_position), (primitive, corner));
        let vertex = mesh.vertex_base + mesh.indices[index_position] as usize;
        assembled.vertices[corner] = vertices[vertex];
    }
    return assembled;
}

/// Fills the primitive arena, one work item per triangle of each mesh.
pub fn run(
    device: &Device,
    store: &Arc<GeometryStore>,
    vertices: &Arc<Vec<TransformedVertex>>,
    primitives: &mut Arc<Vec<Primitive>>,
) -> Result<(), DeviceError> {
    let primitives = host_mut(primitives, "primitives")?;
    for (mesh_index, mesh) in store.meshes().iter().enumerate() {
        // Points and lines are never stored, only triangles reach this stage.
        if mesh.topology != Topology::Triangle {
            continue;
        }
        let range = mesh.primitive_base..mesh.primitive_base + mesh.primitive_count();
        let store = Arc::clone(store);
        let vertices = Arc::clone(vertices);
        device.map_into("primitive_assembly", &mut primitives[range], move |i| {
            assemble_triangle(&store.meshes()[mesh_index], &vertices, i)
        })?;
    }
    return Ok(());
}
