pub mod gpu;

// Material model
pub mod material;
pub mod pattern;
pub mod material_data;
pub mod config;
pub mod diagnostics;

// Program generation
pub mod program;
pub mod pattern_wgsl;
pub mod composer;
pub mod backend;

// Runtime state
pub mod material_instance;
pub mod lighting;

pub mod cli;

pub use backend::{CompileError, NagaBackend, PassthroughBackend, ProgramHandle, ShaderBackend};
pub use composer::{compose, Composition};
pub use config::ComposerConfig;
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use lighting::{sync_lighting, LightSnapshot, SceneLight, ShadowDescriptor};
pub use material::{BaseProperty, BaseSurface, BlendMode, LayerSpec, MaterialSpec, ParamValue};
pub use material_data::MaterialData;
pub use material_instance::{DirtyState, MaterialInstance};
pub use pattern::{PatternCatalog, PatternKind, PatternParams};
pub use program::{Artifact, ComposedProgram, FixedFunctionParams, UniformTable, UniformValue};
