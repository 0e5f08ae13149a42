//! Material instance: one material spec, one live compiled artifact, and the
//! dirty-state protocol that decides between a cheap uniform refresh and a
//! full recompile.
//!
//! Edits never compile. The render path calls [`MaterialInstance::ensure_compiled`]
//! before drawing and [`MaterialInstance::sync_lighting`] once per frame.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::backend::{CompileError, ShaderBackend};
use crate::composer::{self, Composition};
use crate::config::ComposerConfig;
use crate::diagnostics::Diagnostic;
use crate::lighting::{self, LightSnapshot};
use crate::material::{BaseProperty, BaseSurface, BlendMode, LayerSpec, MaterialSpec, ParamValue};
use crate::material_data::{self, MaterialData};
use crate::pattern::{PatternKind, PatternParams};
use crate::program::{Artifact, FixedFunctionParams, ProgramSource};

/// How much work the next `ensure_compiled` has to do.
///
/// Ordered so that a more expensive state always wins when escalating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirtyState {
    Clean,
    NeedsUniformRefresh,
    NeedsRecompile,
}

impl DirtyState {
    /// Combine with another pending change. `NeedsRecompile` is sticky.
    pub fn escalate(self, other: DirtyState) -> DirtyState {
        self.max(other)
    }
}

fn source_hash(source: &ProgramSource) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

/// A material spec together with its compiled artifact.
pub struct MaterialInstance {
    spec: MaterialSpec,
    state: DirtyState,
    artifact: Option<Artifact>,
    backend: Arc<dyn ShaderBackend>,
    config: ComposerConfig,
    next_generation: u64,
    /// Hash of the last source the backend rejected.
    rejected_source: Option<u64>,
    /// Last lighting pushed by the renderer, re-applied after a recompile.
    lighting: Option<LightSnapshot>,
    diagnostics: Vec<Diagnostic>,
}

impl std::fmt::Debug for MaterialInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialInstance")
            .field("spec", &self.spec)
            .field("state", &self.state)
            .field("backend", &self.backend.name())
            .field("generation", &self.next_generation)
            .finish()
    }
}

impl MaterialInstance {
    /// Create an instance. It starts out needing a compile.
    pub fn new(spec: MaterialSpec, backend: Arc<dyn ShaderBackend>) -> Self {
        Self::with_config(spec, backend, ComposerConfig::default())
    }

    pub fn with_config(
        spec: MaterialSpec,
        backend: Arc<dyn ShaderBackend>,
        config: ComposerConfig,
    ) -> Self {
        Self {
            spec,
            state: DirtyState::NeedsRecompile,
            artifact: None,
            backend,
            config: config.sanitized(),
            next_generation: 1,
            rejected_source: None,
            lighting: None,
            diagnostics: Vec::new(),
        }
    }

    /// Create an instance from plain data, keeping any deserialize diagnostics.
    pub fn from_data(data: &MaterialData, backend: Arc<dyn ShaderBackend>) -> Self {
        let (spec, diagnostics) = material_data::deserialize(data);
        let mut instance = Self::new(spec, backend);
        instance.diagnostics = diagnostics;
        instance
    }

    pub fn spec(&self) -> &MaterialSpec {
        &self.spec
    }

    pub fn state(&self) -> DirtyState {
        self.state
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// The live artifact, which may be stale while the instance is dirty.
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    /// Diagnostics collected since the last `take_diagnostics`.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Escalate the dirty state explicitly.
    pub fn mark_dirty(&mut self, state: DirtyState) {
        self.state = self.state.escalate(state);
    }

    // ------------------------------------------------------------------
    // Compilation
    // ------------------------------------------------------------------

    /// Return the current artifact, compiling or refreshing first if dirty.
    ///
    /// The only reported failure is a backend rejection. In that case the
    /// base-surface fallback is already installed and the instance is clean;
    /// the same source is never submitted again.
    pub fn ensure_compiled(&mut self) -> Result<&Artifact, CompileError> {
        if self.artifact.is_none() {
            self.state = DirtyState::NeedsRecompile;
        }
        let state = self.state;
        let result = match state {
            DirtyState::Clean => Ok(()),
            DirtyState::NeedsUniformRefresh if self.refresh_uniforms() => Ok(()),
            DirtyState::NeedsUniformRefresh | DirtyState::NeedsRecompile => self.recompile(),
        };
        // A rejection still leaves the fallback installed and clean
        self.state = DirtyState::Clean;
        result?;
        self.current()
    }

    fn current(&self) -> Result<&Artifact, CompileError> {
        // Every path above installs an artifact; an empty slot means a bug.
        self.artifact.as_ref().ok_or_else(|| {
            CompileError::new(crate::backend::CompilePhase::Link, "No artifact installed")
        })
    }

    fn recompile(&mut self) -> Result<(), CompileError> {
        let generation = self.next_generation;
        self.next_generation += 1;

        let Composition {
            artifact,
            diagnostics,
        } = composer::compose(&self.spec, &self.config, generation);
        // Composition warnings repeat on every recompile until the layer is fixed
        for diagnostic in diagnostics {
            if !self.diagnostics.contains(&diagnostic) {
                self.diagnostics.push(diagnostic);
            }
        }

        let mut program = match artifact {
            Artifact::Program(program) => program,
            fixed @ Artifact::FixedFunction(_) => {
                self.install(fixed);
                return Ok(());
            }
        };

        let hash = source_hash(&program.source);
        if self.rejected_source == Some(hash) {
            log::debug!("Generated source was rejected before, using base surface fallback");
            self.install_fallback();
            return Ok(());
        }

        match self.backend.compile(&program.source) {
            Ok(handle) => {
                log::debug!(
                    "Backend '{}' accepted generation {} as {:?}",
                    self.backend.name(),
                    generation,
                    handle
                );
                program.handle = Some(handle);
                self.install(Artifact::Program(program));
                if let (Some(snapshot), Some(artifact)) = (&self.lighting, &mut self.artifact) {
                    lighting::sync_lighting(artifact, snapshot, &self.config);
                }
                Ok(())
            }
            Err(e) => {
                log::error!("Backend '{}' rejected material program: {}", self.backend.name(), e);
                self.rejected_source = Some(hash);
                self.diagnostics
                    .push(Diagnostic::compile_rejected(format!("Backend rejected program: {}", e)));
                self.install_fallback();
                Err(e)
            }
        }
    }

    fn install_fallback(&mut self) {
        self.install(Artifact::FixedFunction(FixedFunctionParams::fallback(
            self.spec.base.clone(),
        )));
    }

    /// Replace the live artifact, releasing the previous program handle.
    fn install(&mut self, artifact: Artifact) {
        if let Some(handle) = self.artifact.as_ref().and_then(|a| a.handle()) {
            self.backend.release(handle);
        }
        self.artifact = Some(artifact);
    }

    /// Write current values into the live artifact without regenerating source.
    ///
    /// Returns false if the artifact no longer matches the material's uniform
    /// shape, in which case a recompile is needed.
    fn refresh_uniforms(&mut self) -> bool {
        let Some(artifact) = self.artifact.as_mut() else {
            return false;
        };
        match artifact {
            Artifact::Program(program) => {
                for (name, value) in composer::material_uniform_values(&self.spec) {
                    if !program.uniforms.set(&name, value) {
                        log::warn!("Uniform '{}' missing from live program, recompiling", name);
                        return false;
                    }
                }
                log::debug!("Refreshed uniforms of generation {}", program.generation());
                true
            }
            Artifact::FixedFunction(params) => {
                params.surface = self.spec.base.clone();
                true
            }
        }
    }

    // ------------------------------------------------------------------
    // Lighting
    // ------------------------------------------------------------------

    /// Push scene lighting into the live artifact. Never compiles.
    ///
    /// The snapshot is kept and re-applied after the next recompile.
    pub fn sync_lighting(&mut self, snapshot: &LightSnapshot) -> bool {
        self.lighting = Some(snapshot.clone());
        match self.artifact.as_mut() {
            Some(artifact) => lighting::sync_lighting(artifact, snapshot, &self.config),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Base surface edits
    // ------------------------------------------------------------------

    pub fn base_property(&self, property: BaseProperty) -> ParamValue {
        self.spec.base.get(property)
    }

    /// Set a base property, clamped into range. Returns whether it changed.
    pub fn set_base_property(&mut self, property: BaseProperty, value: impl Into<ParamValue>) -> bool {
        let value = value.into();
        let before = self.spec.base.get(property);
        if let Err(e) = self.spec.base.set(property, &value) {
            self.diagnostics.push(Diagnostic::validation(None, e));
            return false;
        }
        let after = self.spec.base.get(property);
        if after != value {
            self.diagnostics.push(Diagnostic::validation(
                None,
                format!("base '{}' adjusted to {:?}", property.uniform_name(), after),
            ));
        }
        self.changed(before != after, DirtyState::NeedsUniformRefresh)
    }

    /// Replace the whole base surface.
    pub fn set_base(&mut self, base: BaseSurface) -> bool {
        let changed = self.spec.base != base;
        self.spec.base = base;
        self.changed(changed, DirtyState::NeedsUniformRefresh)
    }

    // ------------------------------------------------------------------
    // Layer edits
    // ------------------------------------------------------------------

    pub fn layers(&self) -> &[LayerSpec] {
        &self.spec.layers
    }

    pub fn layer(&self, index: usize) -> Option<&LayerSpec> {
        self.spec.layers.get(index)
    }

    /// Append a layer and return its index.
    pub fn add_layer(&mut self, layer: LayerSpec) -> usize {
        self.spec.layers.push(layer);
        self.mark_dirty(DirtyState::NeedsRecompile);
        self.spec.layers.len() - 1
    }

    /// Insert a layer at `index`, clamped to the end of the stack.
    pub fn insert_layer(&mut self, index: usize, layer: LayerSpec) -> usize {
        let index = index.min(self.spec.layers.len());
        self.spec.layers.insert(index, layer);
        self.mark_dirty(DirtyState::NeedsRecompile);
        index
    }

    pub fn remove_layer(&mut self, index: usize) -> Option<LayerSpec> {
        if index >= self.spec.layers.len() {
            return None;
        }
        self.mark_dirty(DirtyState::NeedsRecompile);
        Some(self.spec.layers.remove(index))
    }

    /// Move a layer to a new position in the stack.
    pub fn move_layer(&mut self, from: usize, to: usize) -> bool {
        let len = self.spec.layers.len();
        if from >= len || to >= len {
            return false;
        }
        if from == to {
            return false;
        }
        let layer = self.spec.layers.remove(from);
        self.spec.layers.insert(to, layer);
        self.changed(true, DirtyState::NeedsRecompile)
    }

    pub fn set_layer_enabled(&mut self, index: usize, enabled: bool) -> bool {
        let Some(layer) = self.spec.layers.get_mut(index) else {
            return false;
        };
        let changed = layer.is_enabled() != enabled;
        layer.set_enabled(enabled);
        self.changed(changed, DirtyState::NeedsRecompile)
    }

    /// Change a layer's pattern kind. Parameters reset to the kind's defaults.
    pub fn set_layer_kind(&mut self, index: usize, kind: PatternKind) -> bool {
        let Some(layer) = self.spec.layers.get_mut(index) else {
            return false;
        };
        if layer.kind() == Some(kind) {
            return false;
        }
        layer.set_params(PatternParams::defaults(kind));
        self.changed(true, DirtyState::NeedsRecompile)
    }

    pub fn set_layer_blend_mode(&mut self, index: usize, mode: BlendMode) -> bool {
        let Some(layer) = self.spec.layers.get_mut(index) else {
            return false;
        };
        let changed = layer.blend_mode() != mode;
        layer.set_blend_mode(mode);
        self.changed(changed, DirtyState::NeedsRecompile)
    }

    /// Set a layer's opacity, clamped to [0, 1].
    pub fn set_layer_opacity(&mut self, index: usize, opacity: f32) -> bool {
        let Some(layer) = self.spec.layers.get_mut(index) else {
            return false;
        };
        let before = layer.layer_opacity();
        layer.set_opacity(opacity);
        let changed = layer.layer_opacity() != before;
        self.changed(changed, DirtyState::NeedsUniformRefresh)
    }

    /// Set one layer parameter, validated against the kind's schema.
    pub fn set_layer_param(&mut self, index: usize, name: &str, value: impl Into<ParamValue>) -> bool {
        let Some(layer) = self.spec.layers.get_mut(index) else {
            return false;
        };
        let value = value.into();
        let before = layer.params().get(name);
        let issues = layer.params_mut().set(name, &value);
        let changed = layer.params().get(name) != before;
        self.diagnostics.extend(
            issues
                .into_iter()
                .map(|issue| Diagnostic::validation(Some(index), issue)),
        );
        self.changed(changed, DirtyState::NeedsUniformRefresh)
    }

    pub fn layer_param(&self, index: usize, name: &str) -> Option<ParamValue> {
        self.spec.layers.get(index).and_then(|l| l.params().get(name))
    }

    fn changed(&mut self, changed: bool, state: DirtyState) -> bool {
        if changed {
            self.mark_dirty(state);
        }
        changed
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn serialize(&self) -> MaterialData {
        material_data::serialize(&self.spec)
    }

    /// Replace the material from plain data. Forces a recompile.
    pub fn deserialize(&mut self, data: &MaterialData) {
        let (spec, diagnostics) = material_data::deserialize(data);
        self.spec = spec;
        self.diagnostics.extend(diagnostics);
        self.mark_dirty(DirtyState::NeedsRecompile);
    }
}

impl Drop for MaterialInstance {
    fn drop(&mut self) {
        if let Some(handle) = self.artifact.as_ref().and_then(|a| a.handle()) {
            self.backend.release(handle);
        }
    }
}
