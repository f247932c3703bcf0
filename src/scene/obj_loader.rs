//! Wavefront OBJ scene source, one textured triangle mesh per file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use nalgebra::{vector, Point3, Vector3};
use obj::{Obj, TexturedVertex};

use super::{GeometryStore, MeshData, Texture, Topology};
use crate::error::LoadError;

/// Loads an OBJ model and, if given, the diffuse image drawn on it.
pub fn load_obj(path: impl AsRef<Path>, diffuse: Option<&Path>) -> Result<GeometryStore, LoadError> {
    let path = path.as_ref();
    let texture = match diffuse {
        Some(image_path) => Some(Texture::from_image(&image::open(image_path)?.to_rgb8())),
        None => None,
    };
    let store = from_obj(BufReader::new(File::open(path)?), texture)?;
    log::info!(
        "loaded {}: {} vertices, {} primitives",
        path.display(),
        store.vertex_count(),
        store.primitive_count()
    );
    return Ok(store);
}

/// Reads an OBJ model whose faces carry positions, uvs and normals.
pub fn from_obj<R: BufRead>(reader: R, texture: Option<Texture>) -> Result<GeometryStore, LoadError> {
    let model: Obj<TexturedVertex, u32> = obj::load_obj(reader)?;

    let mut store = GeometryStore::new();
    let texture = texture.map(|texture| store.add_texture(texture));
    let data = MeshData {
        topology: Topology::Triangle,
        indices: model.indices.clone(),
        positions: model.vertices.iter().map(|v| Point3::from(v.position)).collect(),
        normals: model
            .vertices
            .iter()
            .map(|v| Vector3::from(v.normal).try_normalize(f32::EPSILON).unwrap_or_else(Vector3::z))
            .collect(),
        // OBJ puts v = 0 at the bottom of the image, textures here start at the top.
        uvs: model.vertices.iter().map(|v| vector![v.texture[0], 1.0 - v.texture[1]]).collect(),
        texture,
    };
    store.push_mesh(0, 0, data);
    return Ok(store);
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::point;

    const QUAD: &str = "\
v -1.0 -1.0 0.0
v 1.0 -1.0 0.0
v 1.0 1.0 0.0
v -1.0 1.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 1.0 1.0
vt 0.0 1.0
vn 0.0 0.0 2.0
f 1/1/1 2/2/1 3/3/1
f 1/1/1 3/3/1 4/4/1
";

    #[test]
    fn quad_becomes_two_triangles() {
        let store = from_obj(QUAD.as_bytes(), None).unwrap();
        assert_eq!(store.meshes().len(), 1);
        assert_eq!(store.primitive_count(), 2);
        let mesh = &store.meshes()[0];
        assert!(mesh.positions.contains(&point![1.0, 1.0, 0.0]));
        assert!(mesh.normals.iter().all(|n| (n - Vector3::z()).norm() < 1e-6));
        assert!(mesh.texture.is_none());
    }

    #[test]
    fn uvs_are_flipped_to_top_origin() {
        let store = from_obj(QUAD.as_bytes(), None).unwrap();
        let mesh = &store.meshes()[0];
        let corner = mesh.positions.iter().position(|p| *p == point![-1.0, -1.0, 0.0]).unwrap();
        assert_eq!(mesh.uvs[corner], vector![0.0, 1.0]);
    }

    #[test]
    fn diffuse_texture_is_attached() {
        let texture = Texture::from_rgb8(1, 1, vec![10, 20, 30]).unwrap();
        let store = from_obj(QUAD.as_bytes(), Some(texture)).unwrap();
        let id = store.meshes()[0].texture.unwrap();
        assert_eq!(store.texture(id).unwrap().width, 1);
        assert_eq!(store.textures().len(), 1);
    }

    #[test]
    fn malformed_model_is_an_error() {
        let result = from_obj("v 1.0 abc 2.0\n".as_bytes(), None);
        assert!(result.is_err());
    }
}
