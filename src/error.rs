use thiserror::Error;

/// Problems found while turning a scene source into device geometry.
///
/// Source-level variants (`Io`, `Gltf`, `Obj`, `Image`) abort the load. The
/// per-primitive variants are only ever recorded as diagnostics: the primitive
/// is skipped and loading goes on.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to import glTF scene: {0}")]
    Gltf(#[from] gltf::Error),
    #[error("Failed to read OBJ model: {0}")]
    Obj(#[from] obj::ObjError),
    #[error("Failed to decode texture image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Mesh {mesh}, primitive {primitive}: missing {what}")]
    MissingAccessor {
        mesh: usize,
        primitive: usize,
        what: &'static str,
    },
    #[error("Mesh {mesh}, primitive {primitive}: {what} accessor points outside its buffer")]
    AccessorOutOfBounds {
        mesh: usize,
        primitive: usize,
        what: &'static str,
    },
    #[error("Mesh {mesh}, primitive {primitive}: unsupported {what} layout")]
    UnsupportedLayout {
        mesh: usize,
        primitive: usize,
        what: &'static str,
    },
    #[error("Mesh {mesh}, primitive {primitive}: empty index list")]
    EmptyIndices { mesh: usize, primitive: usize },
    #[error("Mesh {mesh}, primitive {primitive}: index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        mesh: usize,
        primitive: usize,
        index: u32,
        vertex_count: usize,
    },
    #[error("Mesh {mesh}, primitive {primitive}: {topology:?} topology is not rasterized")]
    UnsupportedTopology {
        mesh: usize,
        primitive: usize,
        topology: crate::scene::Topology,
    },
}

/// Failures of the worker pool standing in for the device.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Kernel `{kernel}` failed: {completed} of {launched} work groups completed")]
    KernelFailed {
        kernel: &'static str,
        completed: usize,
        launched: usize,
    },
    #[error("Buffer `{0}` is still shared with a running kernel")]
    BufferBusy(&'static str),
}

/// Misuse of the pipeline context or a device failure during a frame.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline is not initialized, call init() first")]
    NotInitialized,
    #[error("No scene bound, call set_scene() first")]
    NoScene,
    #[error("Canvas must be at least 1x1, got {width}x{height}")]
    EmptyCanvas { width: u32, height: u32 },
    #[error("Output surface holds {actual} bytes, expected {expected}")]
    SurfaceSize { expected: usize, actual: usize },
    #[error("At most {max} lights are supported, got {count}")]
    TooManyLights { max: usize, count: usize },
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}
