//! glTF 2.0 scene source.
//!
//! Attributes go through the accessor reader of the `gltf` crate, so
//! interleaved, sparse and normalized data all end up as tightly packed f32
//! arrays. Node transforms are composed parent to child and baked into
//! positions and normals.

use std::collections::HashMap;
use std::path::Path;

use gltf::accessor::{DataType, Dimensions};
use gltf::mesh::Mode;
use gltf::Semantic;
use nalgebra::{Matrix3, Matrix4, Point3, Vector2, Vector3};

use super::{GeometryStore, MeshData, Texture, TextureId, Topology};
use crate::error::LoadError;

/// Imports a `.gltf` or `.glb` file and builds its geometry.
pub fn load_gltf(path: impl AsRef<Path>) -> Result<GeometryStore, LoadError> {
    let path = path.as_ref();
    let (document, buffers, images) = gltf::import(path)?;
    let store = from_gltf(&document, &buffers, &images);
    log::info!(
        "loaded {}: {} meshes, {} vertices, {} primitives, {} skipped",
        path.display(),
        store.meshes().len(),
        store.vertex_count(),
        store.primitive_count(),
        store.diagnostics().len()
    );
    return Ok(store);
}

/// Builds geometry from an already parsed document and its resolved data.
pub fn from_gltf(
    document: &gltf::Document,
    buffers: &[gltf::buffer::Data],
    images: &[gltf::image::Data],
) -> GeometryStore {
    let mut loader = Loader {
        buffers,
        images,
        store: GeometryStore::new(),
        uploaded: HashMap::new(),
    };

    let roots: Vec<gltf::Node> = match document.default_scene().or_else(|| document.scenes().next()) {
        Some(scene) => scene.nodes().collect(),
        None => {
            // No scene listed, every node nobody claims as a child is a root.
            let children: Vec<usize> = document
                .nodes()
                .flat_map(|node| node.children().map(|child| child.index()).collect::<Vec<_>>())
                .collect();
            document.nodes().filter(|node| !children.contains(&node.index())).collect()
        }
    };
    for node in roots {
        loader.visit(&node, &Matrix4::identity());
    }

    return loader.store;
}

struct Loader<'a> {
    buffers: &'a [gltf::buffer::Data],
    images: &'a [gltf::image::Data],
    store: GeometryStore,
    // glTF image index to uploaded texture.
    uploaded: HashMap<usize, Option<TextureId>>,
}

impl<'a> Loader<'a> {
    fn visit(&mut self, node: &gltf::Node, parent: &Matrix4<f32>) {
        let world = parent * Matrix4::from(node.transform().matrix());
        if let Some(mesh) = node.mesh() {
            for primitive in mesh.primitives() {
                let (mesh_index, primitive_index) = (mesh.index(), primitive.index());
                match self.read_primitive(&primitive, mesh_index, &world) {
                    Ok(data) => {
                        self.store.push_mesh(mesh_index, primitive_index, data);
                    }
                    Err(error) => self.store.skip(error),
                }
            }
        }
        for child in node.children() {
            self.visit(&child, &world);
        }
    }

    fn read_primitive(
        &mut self,
        primitive: &gltf::Primitive,
        mesh: usize,
        world: &Matrix4<f32>,
    ) -> Result<MeshData, LoadError> {
        let at = Site { mesh, primitive: primitive.index() };
        let topology = match primitive.mode() {
            Mode::Points => Topology::Point,
            Mode::Lines | Mode::LineLoop | Mode::LineStrip => Topology::Line,
            Mode::Triangles => Topology::Triangle,
            Mode::TriangleStrip | Mode::TriangleFan => {
                return Err(at.error_layout("triangle strip/fan"));
            }
        };

        let position_accessor = primitive
            .get(&Semantic::Positions)
            .ok_or(at.error_missing("POSITION"))?;
        let index_accessor = primitive.indices().ok_or(at.error_missing("indices"))?;

        let normal_accessor = primitive.get(&Semantic::Normals);
        let uv_accessor = primitive.get(&Semantic::TexCoords(0));
        at.check_layout(&position_accessor, "POSITION", &[DataType::F32], Dimensions::Vec3)?;
        if let Some(accessor) = &normal_accessor {
            at.check_layout(accessor, "NORMAL", &[DataType::F32], Dimensions::Vec3)?;
        }
        if let Some(accessor) = &uv_accessor {
            at.check_layout(accessor, "TEXCOORD_0", &[DataType::F32, DataType::U8, DataType::U16], Dimensions::Vec2)?;
        }
        at.check_layout(&index_accessor, "indices", &[DataType::U8, DataType::U16, DataType::U32], Dimensions::Scalar)?;

        // The reader yields nothing when an accessor reaches past its buffer.
        let buffers = self.buffers;
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]));
        let positions: Vec<[f32; 3]> = reader.read_positions().ok_or(at.error_bounds("POSITION"))?.collect();
        let normals: Vec<[f32; 3]> = match normal_accessor {
            Some(_) => reader.read_normals().ok_or(at.error_bounds("NORMAL"))?.collect(),
            None => vec![[0.0, 0.0, 1.0]; positions.len()],
        };
        let uvs: Vec<[f32; 2]> = match uv_accessor {
            Some(_) => reader.read_tex_coords(0).ok_or(at.error_bounds("TEXCOORD_0"))?.into_f32().collect(),
            None => vec![[0.0, 0.0]; positions.len()],
        };
        let indices: Vec<u32> = reader.read_indices().ok_or(at.error_bounds("indices"))?.into_u32().collect();

        // Normals follow the inverse transpose of the node's linear part.
        let normal_matrix = world
            .fixed_slice::<3, 3>(0, 0)
            .into_owned()
            .try_inverse()
            .map(|m| m.transpose())
            .unwrap_or_else(Matrix3::identity);

        let texture = primitive
            .material()
            .pbr_metallic_roughness()
            .base_color_texture()
            .and_then(|info| self.upload_image(info.texture().source().index()));

        return Ok(MeshData {
            topology,
            indices,
            positions: positions
                .iter()
                .map(|p| {
                    let local = Point3::from(*p);
                    Point3::from_homogeneous(world * local.to_homogeneous()).unwrap_or(local)
                })
                .collect(),
            normals: normals
                .iter()
                .map(|n| {
                    let normal = normal_matrix * Vector3::from(*n);
                    normal.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::z)
                })
                .collect(),
            uvs: uvs.iter().map(|uv| Vector2::from(*uv)).collect(),
            texture,
        });
    }

    /// Uploads a glTF image once, later primitives share the texture.
    fn upload_image(&mut self, image_index: usize) -> Option<TextureId> {
        if let Some(uploaded) = self.uploaded.get(&image_index) {
            return *uploaded;
        }
        let texture = self.images.get(image_index).and_then(|image| match image.format {
            gltf::image::Format::R8G8B8 => Texture::from_rgb8(image.width, image.height, image.pixels.clone()),
            gltf::image::Format::R8G8B8A8 => Texture::from_rgba8(image.width, image.height, &image.pixels),
            format => {
                log::warn!("image {}: unsupported format {:?}, drawing untextured", image_index, format);
                None
            }
        });
        let id = texture.map(|texture| self.store.add_texture(texture));
        self.uploaded.insert(image_index, id);
        return id;
    }
}

/// Mesh and primitive index, used to label errors.
struct Site {
    mesh: usize,
    primitive: usize,
}

impl Site {
    fn error_missing(&self, what: &'static str) -> LoadError {
        return LoadError::MissingAccessor { mesh: self.mesh, primitive: self.primitive, what };
    }

    fn error_layout(&self, what: &'static str) -> LoadError {
        return LoadError::UnsupportedLayout { mesh: self.mesh, primitive: self.primitive, what };
    }

    fn error_bounds(&self, what: &'static str) -> LoadError {
        return LoadError::AccessorOutOfBounds { mesh: self.mesh, primitive: self.primitive, what };
    }

    /// Rejects component types and shapes the reader cannot decode into the
    /// store's attributes, accessors with no elements and overlapping strides.
    fn check_layout(
        &self,
        accessor: &gltf::Accessor,
        what: &'static str,
        data_types: &[DataType],
        dimensions: Dimensions,
    ) -> Result<(), LoadError> {
        if accessor.count() == 0 || !data_types.contains(&accessor.data_type()) || accessor.dimensions() != dimensions {
            return Err(self.error_layout(what));
        }
        if accessor.view().and_then(|view| view.stride()).map_or(false, |stride| stride < accessor.size()) {
            return Err(self.error_layout(what));
        }
        return Ok(());
    }
}
