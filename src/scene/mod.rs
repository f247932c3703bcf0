//! Load-time geometry: per-mesh vertex attributes, indices and diffuse
//! textures, built once from a scene source and read-only afterwards.

mod gltf_loader;
mod obj_loader;

pub use gltf_loader::{from_gltf, load_gltf};
pub use obj_loader::{from_obj, load_obj};

use nalgebra::{point, vector, Point3, Vector2, Vector3};

use crate::error::LoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    Point,
    Line,
    #[default]
    Triangle,
}

impl Topology {
    pub fn vertices_per_primitive(self) -> usize {
        return match self {
            Topology::Point => 1,
            Topology::Line => 2,
            Topology::Triangle => 3,
        };
    }
}

/// Handle of a texture owned by the [`GeometryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub usize);

/// Diffuse texture, tightly packed rgb8, row 0 is the top of the image.
#[derive(Debug, Clone)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pixels: Vec<u8>,
}

impl Texture {
    pub const COMPONENTS: usize = 3;

    /// Wraps rgb8 pixel data, `None` if its size does not match the dimensions.
    pub fn from_rgb8(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != Self::COMPONENTS * (width as usize) * (height as usize) {
            return None;
        }
        return Some(Self { width, height, pixels });
    }

    /// Drops the alpha channel of rgba8 pixel data.
    pub fn from_rgba8(width: u32, height: u32, pixels: &[u8]) -> Option<Self> {
        if pixels.len() != 4 * (width as usize) * (height as usize) {
            return None;
        }
        let rgb = pixels
            .chunks_exact(4)
            .flat_map(|rgba| [rgba[0], rgba[1], rgba[2]])
            .collect();
        return Self::from_rgb8(width, height, rgb);
    }

    pub fn from_image(image: &image::RgbImage) -> Self {
        return Self {
            width: image.width(),
            height: image.height(),
            pixels: image.as_raw().clone(),
        };
    }

    /// Texel color in [0, 1], black outside of the image.
    pub fn texel(&self, x: i64, y: i64) -> Vector3<f32> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return Vector3::zeros();
        }
        let index = Self::COMPONENTS * (x as usize + y as usize * self.width as usize);
        return vector![
            self.pixels[index] as f32 / 255.0,
            self.pixels[index + 1] as f32 / 255.0,
            self.pixels[index + 2] as f32 / 255.0
        ];
    }
}

/// Host-side attributes of one mesh primitive before validation.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub topology: Topology,
    pub indices: Vec<u32>,
    pub positions: Vec<Point3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub uvs: Vec<Vector2<f32>>,
    pub texture: Option<TextureId>,
}

/// Packed, validated attributes of one mesh primitive.
///
/// Every index is below `positions.len()`, and `normals`/`uvs` have one entry
/// per position.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub topology: Topology,
    pub indices: Vec<u16>,
    pub positions: Vec<Point3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub uvs: Vec<Vector2<f32>>,
    pub texture: Option<TextureId>,
    /// First slot of this mesh in the frame's transformed-vertex arena.
    pub vertex_base: usize,
    /// First slot of this mesh in the frame's primitive arena.
    pub primitive_base: usize,
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        return self.positions.len();
    }

    pub fn primitive_count(&self) -> usize {
        return self.indices.len() / self.topology.vertices_per_primitive();
    }
}

/// All meshes and textures of the bound scene.
#[derive(Debug, Default)]
pub struct GeometryStore {
    meshes: Vec<Mesh>,
    textures: Vec<Texture>,
    diagnostics: Vec<LoadError>,
    vertex_count: usize,
    primitive_count: usize,
}

impl GeometryStore {
    pub fn new() -> Self {
        return Default::default();
    }

    pub fn add_texture(&mut self, texture: Texture) -> TextureId {
        self.textures.push(texture);
        return TextureId(self.textures.len() - 1);
    }

    /// Validates and stores a mesh primitive. `mesh` and `primitive` name it in
    /// diagnostics. Returns false if it was skipped.
    pub fn push_mesh(&mut self, mesh: usize, primitive: usize, data: MeshData) -> bool {
        match self.pack_mesh(mesh, primitive, data) {
            Ok(packed) => {
                self.vertex_count += packed.vertex_count();
                self.primitive_count += packed.primitive_count();
                self.meshes.push(packed);
                return true;
            }
            Err(error) => {
                self.skip(error);
                return false;
            }
        }
    }

    /// Records a primitive that could not be loaded.
    pub fn skip(&mut self, error: LoadError) {
        log::warn!("skipping primitive: {}", error);
        self.diagnostics.push(error);
    }

    fn pack_mesh(&self, mesh: usize, primitive: usize, data: MeshData) -> Result<Mesh, LoadError> {
        if data.topology != Topology::Triangle {
            return Err(LoadError::UnsupportedTopology { mesh, primitive, topology: data.topology });
        }
        if data.indices.is_empty() {
            return Err(LoadError::EmptyIndices { mesh, primitive });
        }
        let vertex_count = data.positions.len();
        if data.normals.len() != vertex_count || data.uvs.len() != vertex_count {
            return Err(LoadError::UnsupportedLayout { mesh, primitive, what: "attribute count" });
        }
        if let Some(texture) = data.texture {
            if texture.0 >= self.textures.len() {
                return Err(LoadError::MissingAccessor { mesh, primitive, what: "texture image" });
            }
        }

        let mut indices = Vec::with_capacity(data.indices.len());
        for &index in &data.indices {
            if index as usize >= vertex_count || index > u16::MAX as u32 {
                return Err(LoadError::IndexOutOfRange { mesh, primitive, index, vertex_count });
            }
            indices.push(index as u16);
        }
        let stray = indices.len() % 3;
        if stray != 0 {
            log::debug!("mesh {}, primitive {}: dropping {} trailing indices", mesh, primitive, stray);
            indices.truncate(indices.len() - stray);
            if indices.is_empty() {
                return Err(LoadError::EmptyIndices { mesh, primitive });
            }
        }

        return Ok(Mesh {
            topology: data.topology,
            indices,
            positions: data.positions,
            normals: data.normals,
            uvs: data.uvs,
            texture: data.texture,
            vertex_base: self.vertex_count,
            primitive_base: self.primitive_count,
        });
    }

    pub fn meshes(&self) -> &[Mesh] {
        return &self.meshes;
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        return self.textures.get(id.0);
    }

    pub fn textures(&self) -> &[Texture] {
        return &self.textures;
    }

    /// Primitives skipped while loading, in the order they were met.
    pub fn diagnostics(&self) -> &[LoadError] {
        return &self.diagnostics;
    }

    pub fn vertex_count(&self) -> usize {
        return self.vertex_count;
    }

    pub fn index_count(&self) -> usize {
        return self.meshes.iter().map(|m| m.indices.len()).sum();
    }

    pub fn primitive_count(&self) -> usize {
        return self.primitive_count;
    }

    /// Axis-aligned bounds of every position, `None` for an empty store.
    pub fn bounds(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        let mut positions = self.meshes.iter().flat_map(|m| m.positions.iter());
        let first = *positions.next()?;
        let (mut low, mut high) = (first, first);
        for p in positions {
            low = point![low.x.min(p.x), low.y.min(p.y), low.z.min(p.z)];
            high = point![high.x.max(p.x), high.y.max(p.y), high.z.max(p.z)];
        }
        return Some((low, high));
    }
}
