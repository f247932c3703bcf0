//! Software triangle rasterizer.
//!
//! Geometry loaded into a [`scene::GeometryStore`] is rendered by a
//! [`pipeline::Pipeline`] whose stages run as data-parallel kernels on a
//! worker pool ([`device::Device`]).

pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod scene;

pub use config::{Light, PipelineConfig};
pub use error::{DeviceError, LoadError, PipelineError};
pub use pipeline::{FrameUniforms, Pipeline};
pub use scene::GeometryStore;
