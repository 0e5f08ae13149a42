//! Backend submission of generated programs.
//!
//! Submission is atomic from the composer's point of view: the backend either
//! returns a usable handle or a [`CompileError`].

use std::sync::atomic::{AtomicU64, Ordering};

use crate::program::{ProgramSource, FRAGMENT_ENTRY, VERTEX_ENTRY};

/// Opaque handle to a program accepted by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u64);

/// Stage at which a backend rejected a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilePhase {
    Vertex,
    Fragment,
    Link,
}

impl std::fmt::Display for CompilePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompilePhase::Vertex => write!(f, "Vertex"),
            CompilePhase::Fragment => write!(f, "Fragment"),
            CompilePhase::Link => write!(f, "Link"),
        }
    }
}

/// The backend rejected a generated program.
#[derive(Debug)]
pub struct CompileError {
    pub phase: CompilePhase,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.phase, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl CompileError {
    pub fn new(phase: CompilePhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        phase: CompilePhase,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            phase,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// A rendering backend that turns generated source into a program handle.
pub trait ShaderBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Compile both stages. Either fully succeeds or returns an error.
    fn compile(&self, source: &ProgramSource) -> Result<ProgramHandle, CompileError>;

    /// Release a handle returned by `compile`.
    fn release(&self, _handle: ProgramHandle) {}
}

/// Accepts every program without looking at it. For headless use.
#[derive(Debug, Default)]
pub struct PassthroughBackend {
    next: AtomicU64,
}

impl PassthroughBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShaderBackend for PassthroughBackend {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn compile(&self, _source: &ProgramSource) -> Result<ProgramHandle, CompileError> {
        Ok(ProgramHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1))
    }
}

/// Parses and validates both stages with naga, without a GPU device.
#[derive(Debug, Default)]
pub struct NagaBackend {
    next: AtomicU64,
}

impl NagaBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Parse and validate one WGSL module, requiring the given entry point.
pub fn validate_stage(
    source: &str,
    phase: CompilePhase,
    entry_point: &str,
    stage: naga::ShaderStage,
) -> Result<naga::Module, CompileError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        CompileError::new(phase, format!("WGSL parse failed:\n{}", e.emit_to_string(source)))
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| CompileError::new(phase, format!("WGSL validation failed: {e:?}")))?;

    let found = module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry_point && ep.stage == stage);
    if !found {
        return Err(CompileError::new(
            CompilePhase::Link,
            format!("Missing {:?} entry point '{}'", stage, entry_point),
        ));
    }
    Ok(module)
}

impl ShaderBackend for NagaBackend {
    fn name(&self) -> &'static str {
        "naga"
    }

    fn compile(&self, source: &ProgramSource) -> Result<ProgramHandle, CompileError> {
        validate_stage(
            &source.vertex,
            CompilePhase::Vertex,
            VERTEX_ENTRY,
            naga::ShaderStage::Vertex,
        )?;
        validate_stage(
            &source.fragment,
            CompilePhase::Fragment,
            FRAGMENT_ENTRY,
            naga::ShaderStage::Fragment,
        )?;
        Ok(ProgramHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1))
    }
}
