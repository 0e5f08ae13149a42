//! End-to-end checks of composition, instance state and lighting sync,
//! with generated programs validated by naga.
//!
//! Run with: cargo test --test composer_properties

use std::sync::Arc;

use glam::{Mat4, Vec3};
use surface_composer::backend::{CompileError, CompilePhase};
use surface_composer::lighting::ShadowDescriptor;
use surface_composer::program::{ProgramSource, TextureHandle};
use surface_composer::{
    compose, Artifact, BaseProperty, BaseSurface, BlendMode, ComposerConfig, DiagnosticKind,
    DirtyState, LayerSpec, LightSnapshot, MaterialData, MaterialInstance, MaterialSpec,
    NagaBackend, ParamValue, PatternKind, ProgramHandle, SceneLight, ShaderBackend, UniformValue,
};

fn naga_instance(spec: MaterialSpec) -> MaterialInstance {
    MaterialInstance::new(spec, Arc::new(NagaBackend::new()))
}

fn fragment_of(instance: &mut MaterialInstance) -> String {
    instance
        .ensure_compiled()
        .expect("program should be accepted")
        .program()
        .expect("layered material should produce a program")
        .source
        .fragment
        .clone()
}

#[test]
fn test_every_pattern_kind_validates() {
    for kind in PatternKind::ALL {
        let mut instance = naga_instance(MaterialSpec::default().layer(LayerSpec::new(kind)));
        let result = instance.ensure_compiled();
        assert!(result.is_ok(), "{:?} failed validation: {:?}", kind, result.err());
        assert!(instance.artifact().unwrap().program().is_some());
    }
}

#[test]
fn test_every_blend_mode_validates() {
    for mode in BlendMode::ALL {
        let spec = MaterialSpec::default()
            .layer(LayerSpec::new(PatternKind::Checker))
            .layer(LayerSpec::new(PatternKind::Noise).blend(mode).opacity(0.4));
        let mut instance = naga_instance(spec);
        let result = instance.ensure_compiled();
        assert!(result.is_ok(), "{:?} failed validation: {:?}", mode, result.err());
    }
}

#[test]
fn test_full_stack_validates() {
    let mut spec = MaterialSpec::new(BaseSurface::new(Vec3::new(0.5, 0.5, 0.5)).with_opacity(0.6));
    for (kind, mode) in PatternKind::ALL.into_iter().zip(BlendMode::ALL.into_iter().cycle()) {
        spec = spec.layer(LayerSpec::new(kind).blend(mode));
    }
    let mut instance = naga_instance(spec);
    let artifact = instance.ensure_compiled().unwrap();
    assert_eq!(artifact.program().unwrap().layer_count, PatternKind::ALL.len());
    assert!(artifact.is_transparent());
}

#[test]
fn test_composition_is_deterministic() {
    let spec = MaterialSpec::default()
        .layer(LayerSpec::new(PatternKind::Brick))
        .layer(LayerSpec::new(PatternKind::WoodGrain).blend(BlendMode::Overlay));
    let config = ComposerConfig::default();

    let a = compose(&spec, &config, 1);
    let b = compose(&spec, &config, 1);
    let (a, b) = (a.artifact.program().unwrap(), b.artifact.program().unwrap());
    assert_eq!(a.source, b.source);
    assert_eq!(a.uniforms.names().collect::<Vec<_>>(), b.uniforms.names().collect::<Vec<_>>());
}

#[test]
fn test_disabling_a_layer_keeps_indices_contiguous() {
    let spec = MaterialSpec::default()
        .layer(LayerSpec::new(PatternKind::Checker))
        .layer(LayerSpec::new(PatternKind::Stripes))
        .layer(LayerSpec::new(PatternKind::Dots));
    let mut instance = naga_instance(spec);
    instance.ensure_compiled().unwrap();

    assert!(instance.set_layer_enabled(1, false));
    assert_eq!(instance.state(), DirtyState::NeedsRecompile);
    let fragment = fragment_of(&mut instance);

    assert!(fragment.contains("fn pattern_layer0("));
    assert!(fragment.contains("fn pattern_layer1("));
    assert!(!fragment.contains("fn pattern_layer2("));
    let table = &instance.artifact().unwrap().program().unwrap().uniforms;
    // Dots moved into slot 1
    assert!(table.contains("layer1_radius"));
    assert!(!table.contains("layer1_ratio"));

    assert!(instance.set_layer_enabled(1, true));
    let fragment = fragment_of(&mut instance);
    assert!(fragment.contains("fn pattern_layer2("));
}

#[test]
fn test_roughness_edit_refreshes_without_new_source() {
    let mut instance = naga_instance(MaterialSpec::default().layer(LayerSpec::new(PatternKind::Noise)));
    let before = fragment_of(&mut instance);
    let handle = instance.artifact().unwrap().handle();

    assert!(instance.set_base_property(BaseProperty::Roughness, 0.9_f32));
    assert_eq!(instance.state(), DirtyState::NeedsUniformRefresh);
    let after = fragment_of(&mut instance);

    assert_eq!(before, after);
    let artifact = instance.artifact().unwrap();
    assert_eq!(artifact.handle(), handle);
    assert_eq!(
        artifact.program().unwrap().uniforms.get("roughness"),
        Some(&UniformValue::Float(0.9))
    );
}

#[test]
fn test_added_layer_appears_exactly_once() {
    let mut instance = naga_instance(MaterialSpec::default().layer(LayerSpec::new(PatternKind::Checker)));
    instance.ensure_compiled().unwrap();

    let index = instance.add_layer(LayerSpec::new(PatternKind::Gradient).blend(BlendMode::Add));
    assert_eq!(index, 1);
    let fragment = fragment_of(&mut instance);

    assert_eq!(fragment.matches("fn pattern_layer1(").count(), 1);
    assert_eq!(fragment.matches("pattern_layer1(p, n, color)").count(), 1);
    assert_eq!(fragment.matches("fn blend_add(").count(), 1);
}

#[test]
fn test_removing_every_layer_uses_fixed_function() {
    let mut instance = naga_instance(MaterialSpec::default().layer(LayerSpec::new(PatternKind::Weave)));
    instance.ensure_compiled().unwrap();

    assert!(instance.remove_layer(0).is_some());
    let artifact = instance.ensure_compiled().unwrap();
    let params = artifact.fixed_function().unwrap();
    assert!(!params.fallback);
    assert_eq!(artifact.handle(), None);
}

#[test]
fn test_lighting_sync_selects_key_fill_and_ambient() {
    let mut instance = naga_instance(MaterialSpec::default().layer(LayerSpec::new(PatternKind::Checker)));
    instance.ensure_compiled().unwrap();

    let snapshot = LightSnapshot::new()
        .with_light(SceneLight::ambient(Vec3::new(0.2, 0.2, 0.2), 0.5))
        .with_light(SceneLight::directional(Vec3::new(0.0, -2.0, 0.0), Vec3::ONE, 2.0))
        .with_light(SceneLight::point(Vec3::ONE, Vec3::ONE, 10.0))
        .with_light(SceneLight::directional(Vec3::new(1.0, 0.0, 0.0), Vec3::X, 0.5))
        .with_light(SceneLight::directional(Vec3::new(0.0, 0.0, 1.0), Vec3::Z, 9.0))
        .with_light(SceneLight::ambient(Vec3::ONE, 1.0));
    assert!(instance.sync_lighting(&snapshot));
    assert_eq!(instance.state(), DirtyState::Clean);

    let table = &instance.artifact().unwrap().program().unwrap().uniforms;
    assert_eq!(table.get("key_light_direction"), Some(&UniformValue::Vec3([0.0, -1.0, 0.0])));
    assert_eq!(table.get("key_light_intensity"), Some(&UniformValue::Float(2.0)));
    assert_eq!(table.get("fill_light_color"), Some(&UniformValue::Vec3([1.0, 0.0, 0.0])));
    assert_eq!(table.get("fill_light_intensity"), Some(&UniformValue::Float(0.5)));
    assert_eq!(table.get("ambient_color"), Some(&UniformValue::Vec3([0.1, 0.1, 0.1])));
}

#[test]
fn test_shadow_uniforms_follow_receiver_flag() {
    let mut instance = naga_instance(MaterialSpec::default().layer(LayerSpec::new(PatternKind::Dots)));
    instance.ensure_compiled().unwrap();

    let shadow = ShadowDescriptor::new(TextureHandle(7), Mat4::IDENTITY, 1024.0).with_bias(0.002);
    let sun = SceneLight::directional(Vec3::NEG_Y, Vec3::ONE, 1.0).with_shadow(shadow);

    instance.sync_lighting(&LightSnapshot::new().with_light(sun.clone()));
    let table = &instance.artifact().unwrap().program().unwrap().uniforms;
    assert_eq!(table.get("shadow_enabled"), Some(&UniformValue::Bool(true)));
    assert_eq!(table.get("shadow_bias"), Some(&UniformValue::Float(0.002)));
    assert_eq!(table.get("shadow_map_size"), Some(&UniformValue::Float(1024.0)));

    instance.sync_lighting(&LightSnapshot::new().with_light(sun).with_receive_shadows(false));
    let table = &instance.artifact().unwrap().program().unwrap().uniforms;
    assert_eq!(table.get("shadow_enabled"), Some(&UniformValue::Bool(false)));
}

#[test]
fn test_serialize_round_trip_composes_identically() {
    let spec = MaterialSpec::new(BaseSurface::new(Vec3::new(0.8, 0.7, 0.6)).with_clearcoat(0.4))
        .layer(LayerSpec::new(PatternKind::Stripes).blend(BlendMode::Multiply).opacity(0.75))
        .layer(LayerSpec::new(PatternKind::Noise).enabled(false));
    let mut original = naga_instance(spec);
    assert!(original.set_layer_param(0, "direction", ParamValue::Choice("diagonal".to_string())));
    let expected = fragment_of(&mut original);

    let json = original.serialize().to_json().unwrap();
    let data = MaterialData::from_json(&json).unwrap();
    let mut restored = MaterialInstance::from_data(&data, Arc::new(NagaBackend::new()));

    assert!(restored.diagnostics().is_empty(), "{:?}", restored.diagnostics());
    assert_eq!(
        restored.layer_param(0, "direction"),
        Some(ParamValue::Choice("diagonal".to_string()))
    );
    assert_eq!(restored.spec(), original.spec());
    assert_eq!(fragment_of(&mut restored), expected);
}

#[test]
fn test_unknown_kind_and_blend_mode_are_reported() {
    let json = r#"{
        "base": { "color": [0.3, 0.3, 0.3] },
        "layers": [
            { "kind": "marble", "params": { "veins": 3.0 } },
            { "type": "checker", "blendMode": "dodge", "params": { "scale": 500.0 } }
        ]
    }"#;
    let data = MaterialData::from_json(json).unwrap();
    let mut instance = MaterialInstance::from_data(&data, Arc::new(NagaBackend::new()));
    instance.ensure_compiled().unwrap();

    let kinds: Vec<DiagnosticKind> = instance.diagnostics().iter().map(|d| d.kind).collect();
    assert!(kinds.contains(&DiagnosticKind::UnknownPatternKind));
    assert!(kinds.contains(&DiagnosticKind::UnknownBlendMode));
    assert!(kinds.contains(&DiagnosticKind::ValidationError));

    let program = instance.artifact().unwrap().program().unwrap();
    assert_eq!(program.layer_count, 1);
    assert!(program.source.fragment.contains("blend_mix(color, pattern_layer0(p, n, color)"));

    // The unknown layer is kept for the next save
    let saved = instance.serialize();
    assert_eq!(saved.layers[0].kind, "marble");
    assert_eq!(saved.layers.len(), 2);
}

/// Rejects every program and counts submissions.
#[derive(Default)]
struct RejectingBackend {
    submissions: std::sync::atomic::AtomicUsize,
}

impl ShaderBackend for RejectingBackend {
    fn name(&self) -> &'static str {
        "rejecting"
    }

    fn compile(&self, _source: &ProgramSource) -> Result<ProgramHandle, CompileError> {
        self.submissions.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Err(CompileError::new(CompilePhase::Link, "target unavailable"))
    }
}

#[test]
fn test_rejection_installs_base_surface_fallback() {
    let backend = Arc::new(RejectingBackend::default());
    let base = BaseSurface::new(Vec3::new(0.1, 0.2, 0.3)).with_metalness(0.8);
    let mut instance = MaterialInstance::new(
        MaterialSpec::new(base.clone()).layer(LayerSpec::new(PatternKind::Brick)),
        backend.clone(),
    );

    let err = instance.ensure_compiled().unwrap_err();
    assert_eq!(err.phase, CompilePhase::Link);
    assert_eq!(instance.state(), DirtyState::Clean);
    match instance.artifact() {
        Some(Artifact::FixedFunction(params)) => {
            assert!(params.fallback);
            assert_eq!(params.surface, base);
        }
        other => panic!("expected fallback, got {:?}", other),
    }
    assert!(instance
        .diagnostics()
        .iter()
        .any(|d| d.kind == DiagnosticKind::CompileTargetUnavailable));

    // Same source again: not resubmitted
    instance.mark_dirty(DirtyState::NeedsRecompile);
    assert!(instance.ensure_compiled().is_ok());
    assert_eq!(backend.submissions.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(instance.artifact().unwrap().is_fixed_function());
}
