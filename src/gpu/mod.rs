pub mod mesh;
pub mod material_pipeline;

pub use material_pipeline::{GlobalUniforms, MaterialBindings, MaterialGpuProgram, WgpuBackend};
