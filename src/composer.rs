//! Shader composer: turns a material spec into a WGSL program and its
//! uniform table, or into the fixed-function block when no layer applies.
//!
//! Composition is pure and deterministic. The same spec and config always
//! produce byte-identical source and the same uniform names.

use crate::config::ComposerConfig;
use crate::diagnostics::Diagnostic;
use crate::lighting::ResolvedLighting;
use crate::material::{BaseProperty, BlendMode, LayerSpec, MaterialSpec};
use crate::pattern_wgsl::{self, PatternFunction};
use crate::program::{
    Artifact, ComposedProgram, FixedFunctionParams, ProgramSource, UniformTable, UniformValue,
};

/// Name of the generated uniform struct.
pub const MATERIAL_STRUCT: &str = "MaterialUniforms";

/// Result of one composition.
#[derive(Clone, Debug)]
pub struct Composition {
    pub artifact: Artifact,
    pub diagnostics: Vec<Diagnostic>,
}

/// Enabled layers whose kind the catalog knows, paired with their position in
/// the full layer list. The position in the returned list is the layer index
/// used in generated names.
pub fn composable_layers(spec: &MaterialSpec) -> Vec<(usize, &LayerSpec)> {
    spec.layers
        .iter()
        .enumerate()
        .filter(|(_, layer)| layer.is_enabled() && layer.kind().is_some())
        .collect()
}

/// Base and layer uniform values for the current spec, by name.
///
/// Used both to build a fresh table and to refresh an existing one; the
/// names only line up when no structural edit happened in between.
pub fn material_uniform_values(spec: &MaterialSpec) -> Vec<(String, UniformValue)> {
    let mut values: Vec<(String, UniformValue)> = BaseProperty::ALL
        .iter()
        .map(|&prop| {
            let value = spec.base.get(prop);
            let uniform = if prop.is_color() {
                UniformValue::Vec3(value.as_color())
            } else {
                UniformValue::Float(value.as_scalar())
            };
            (prop.uniform_name().to_string(), uniform)
        })
        .collect();

    for (index, (_, layer)) in composable_layers(spec).into_iter().enumerate() {
        values.push((
            pattern_wgsl::uniform_name(index, "opacity"),
            UniformValue::Float(layer.layer_opacity()),
        ));
        values.extend(
            layer
                .params()
                .uniform_values()
                .into_iter()
                .map(|(param, value)| (pattern_wgsl::uniform_name(index, param), value)),
        );
    }
    values
}

/// Compose a material.
pub fn compose(spec: &MaterialSpec, config: &ComposerConfig, generation: u64) -> Composition {
    let config = config.clone().sanitized();
    let mut diagnostics = Vec::new();

    let mut functions: Vec<(PatternFunction, BlendMode)> = Vec::new();
    for (position, layer) in spec.layers.iter().enumerate() {
        if !layer.is_enabled() {
            continue;
        }
        match pattern_wgsl::pattern_function(functions.len(), layer.params()) {
            Some(func) => functions.push((func, layer.blend_mode())),
            None => diagnostics.push(Diagnostic::unknown_pattern_kind(position, layer.kind_id())),
        }
    }

    if functions.is_empty() {
        log::debug!("No composable layers, using fixed-function path");
        return Composition {
            artifact: Artifact::FixedFunction(FixedFunctionParams::new(spec.base.clone())),
            diagnostics,
        };
    }

    let mut uniforms = UniformTable::new(generation);
    let base_count = BaseProperty::ALL.len();
    let values = material_uniform_values(spec);
    for (name, value) in &values[..base_count] {
        uniforms.push(name.as_str(), value.clone());
    }
    for (name, value) in ResolvedLighting::unlit(&config).uniform_values(&config) {
        uniforms.push(name, value);
    }
    for (name, value) in &values[base_count..] {
        uniforms.push(name.as_str(), value.clone());
    }

    let fragment = fragment_source(&uniforms, &functions, &config);
    log::debug!(
        "Composed program generation {} with {} layer(s), {} uniforms",
        generation,
        functions.len(),
        uniforms.len()
    );

    Composition {
        artifact: Artifact::Program(ComposedProgram {
            source: ProgramSource {
                vertex: vertex_source(),
                fragment,
            },
            uniforms,
            layer_count: functions.len(),
            handle: None,
        }),
        diagnostics,
    }
}

/// Format a float as a WGSL literal. Debug formatting always keeps a
/// fractional part or exponent, so the literal is never read as an integer.
fn wgsl_float(v: f32) -> String {
    format!("{:?}", v)
}

fn blend_function_name(mode: BlendMode) -> &'static str {
    match mode {
        BlendMode::Replace | BlendMode::Mix => "blend_mix",
        BlendMode::Multiply => "blend_multiply",
        BlendMode::Add => "blend_add",
        BlendMode::Screen => "blend_screen",
        BlendMode::Overlay => "blend_overlay",
    }
}

fn blend_function_source(mode: BlendMode) -> &'static str {
    match mode {
        BlendMode::Replace | BlendMode::Mix => "\
fn blend_mix(b: vec3<f32>, l: vec3<f32>, a: f32) -> vec3<f32> {
    return mix(b, l, vec3<f32>(a));
}
",
        BlendMode::Multiply => "\
fn blend_multiply(b: vec3<f32>, l: vec3<f32>, a: f32) -> vec3<f32> {
    return mix(b, b * l, vec3<f32>(a));
}
",
        BlendMode::Add => "\
fn blend_add(b: vec3<f32>, l: vec3<f32>, a: f32) -> vec3<f32> {
    return mix(b, min(b + l, vec3<f32>(1.0)), vec3<f32>(a));
}
",
        BlendMode::Screen => "\
fn blend_screen(b: vec3<f32>, l: vec3<f32>, a: f32) -> vec3<f32> {
    let screened = vec3<f32>(1.0) - (vec3<f32>(1.0) - b) * (vec3<f32>(1.0) - l);
    return mix(b, screened, vec3<f32>(a));
}
",
        BlendMode::Overlay => "\
fn blend_overlay(b: vec3<f32>, l: vec3<f32>, a: f32) -> vec3<f32> {
    let low = 2.0 * b * l;
    let high = vec3<f32>(1.0) - 2.0 * (vec3<f32>(1.0) - b) * (vec3<f32>(1.0) - l);
    return mix(b, select(high, low, b < vec3<f32>(0.5)), vec3<f32>(a));
}
",
    }
}

const GLOBALS_WGSL: &str = "\
struct Globals {
    view_proj: mat4x4<f32>,
    model: mat4x4<f32>,
    camera_position: vec4<f32>,
};

@group(0) @binding(0) var<uniform> globals: Globals;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) local_position: vec3<f32>,
    @location(1) local_normal: vec3<f32>,
    @location(2) world_position: vec3<f32>,
    @location(3) world_normal: vec3<f32>,
};
";

const VERTEX_MAIN_WGSL: &str = "
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world = globals.model * vec4<f32>(in.position, 1.0);
    out.clip_position = globals.view_proj * world;
    out.local_position = in.position;
    out.local_normal = in.normal;
    out.world_position = world.xyz;
    out.world_normal = normalize((globals.model * vec4<f32>(in.normal, 0.0)).xyz);
    return out;
}
";

/// The vertex stage does not depend on the material.
pub fn vertex_source() -> String {
    format!("{}{}", GLOBALS_WGSL, VERTEX_MAIN_WGSL)
}

const BINDINGS_WGSL: &str = "\
@group(1) @binding(0) var<uniform> material: MaterialUniforms;
@group(1) @binding(1) var shadow_map: texture_depth_2d;
@group(1) @binding(2) var shadow_sampler: sampler_comparison;
";

const LIGHTING_WGSL: &str = "\
fn shadow_factor(world_position: vec3<f32>) -> f32 {
    if (material.shadow_enabled == 0u) {
        return 1.0;
    }
    let light_clip = material.shadow_light_space * vec4<f32>(world_position, 1.0);
    let ndc = light_clip.xyz / light_clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if (uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 || ndc.z > 1.0) {
        return 1.0;
    }
    let texel = 1.0 / max(material.shadow_map_size, 1.0);
    var lit = 0.0;
    for (var x = -1; x <= 1; x = x + 1) {
        for (var y = -1; y <= 1; y = y + 1) {
            let texel_offset = vec2<f32>(f32(x), f32(y)) * texel;
            lit = lit + textureSampleCompareLevel(shadow_map, shadow_sampler, uv + texel_offset, ndc.z - material.shadow_bias);
        }
    }
    return lit / 9.0;
}

fn apply_lighting(albedo: vec3<f32>, world_position: vec3<f32>, world_normal: vec3<f32>) -> vec3<f32> {
    let n = normalize(world_normal);
    let v = normalize(globals.camera_position.xyz - world_position);
    let ambient = albedo * max(material.ambient_color, vec3<f32>(AMBIENT_FLOOR));

    let key_dir = -material.key_light_direction;
    let key_diffuse = max(dot(n, key_dir), 0.0);
    let half_dir = normalize(key_dir + v);
    let exponent = mix(SHINY_EXPONENT, ROUGH_EXPONENT, material.roughness);
    let spec_tint = mix(vec3<f32>(DIELECTRIC_SPECULAR), albedo, vec3<f32>(material.metalness));
    let highlight = select(0.0, pow(max(dot(n, half_dir), 0.0), exponent), key_diffuse > 0.0);
    let key = (albedo * key_diffuse + spec_tint * highlight)
        * material.key_light_color * material.key_light_intensity * shadow_factor(world_position);

    let fill_diffuse = max(dot(n, -material.fill_light_direction), 0.0);
    let fill = albedo * fill_diffuse * material.fill_light_color * material.fill_light_intensity;

    let rim = pow(1.0 - max(dot(n, v), 0.0), RIM_POWER) * material.clearcoat * CLEARCOAT_STRENGTH;
    let emissive = material.emissive_color * material.emissive_intensity;
    return ambient + key + fill + vec3<f32>(rim) + emissive;
}
";

fn fragment_source(
    uniforms: &UniformTable,
    functions: &[(PatternFunction, BlendMode)],
    config: &ComposerConfig,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("// Surface material, {} layer(s)\n\n", functions.len()));
    out.push_str(GLOBALS_WGSL);
    out.push('\n');
    out.push_str(&uniforms.wgsl_struct(MATERIAL_STRUCT));
    out.push('\n');
    out.push_str(BINDINGS_WGSL);
    out.push('\n');

    let constants = [
        ("AMBIENT_FLOOR", config.ambient_floor),
        ("ROUGH_EXPONENT", config.rough_exponent),
        ("SHINY_EXPONENT", config.shiny_exponent),
        ("DIELECTRIC_SPECULAR", config.dielectric_specular),
        ("RIM_POWER", config.rim_power),
        ("CLEARCOAT_STRENGTH", config.clearcoat_strength),
    ];
    for (name, value) in constants {
        out.push_str(&format!("const {}: f32 = {};\n", name, wgsl_float(value)));
    }
    out.push('\n');

    if functions.iter().any(|(f, _)| f.kind.uses_face_projection()) {
        out.push_str(pattern_wgsl::FACE_UV_WGSL);
        out.push('\n');
    }
    if functions.iter().any(|(f, _)| f.kind.uses_noise()) {
        out.push_str(&pattern_wgsl::noise_wgsl());
        out.push('\n');
    }

    let mut emitted: Vec<&'static str> = Vec::new();
    for mode in BlendMode::ALL {
        let name = blend_function_name(mode);
        if emitted.contains(&name) || !functions.iter().any(|(_, m)| blend_function_name(*m) == name) {
            continue;
        }
        out.push_str(blend_function_source(mode));
        out.push('\n');
        emitted.push(name);
    }

    for (func, _) in functions {
        out.push_str(&func.source);
        out.push('\n');
    }

    out.push_str(LIGHTING_WGSL);
    out.push('\n');

    out.push_str("@fragment\nfn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {\n");
    out.push_str("    let p = in.local_position;\n");
    out.push_str("    let n = normalize(in.local_normal);\n");
    out.push_str("    var color = material.base_color;\n");
    for (index, (func, mode)) in functions.iter().enumerate() {
        out.push_str(&format!(
            "    color = {}(color, {}(p, n, color), material.{});\n",
            blend_function_name(*mode),
            func.name,
            pattern_wgsl::uniform_name(index, "opacity"),
        ));
    }
    out.push_str("    let lit = apply_lighting(color, in.world_position, in.world_normal);\n");
    out.push_str("    return vec4<f32>(lit, material.opacity);\n");
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::BaseSurface;
    use crate::pattern::{PatternKind, PatternParams};
    use glam::Vec3;
    use std::collections::BTreeMap;

    fn compose_default(spec: &MaterialSpec) -> Composition {
        compose(spec, &ComposerConfig::default(), 1)
    }

    #[test]
    fn test_no_layers_is_fixed_function() {
        let spec = MaterialSpec::new(BaseSurface::new(Vec3::new(0.2, 0.4, 0.6)).with_roughness(0.3));
        let composition = compose_default(&spec);
        let params = composition.artifact.fixed_function().unwrap();
        assert_eq!(params.surface, spec.base);
        assert!(!params.fallback);
    }

    #[test]
    fn test_disabled_layers_excluded() {
        let spec = MaterialSpec::default()
            .layer(LayerSpec::new(PatternKind::Brick).enabled(false))
            .layer(LayerSpec::new(PatternKind::Checker));
        let composition = compose_default(&spec);
        let program = composition.artifact.program().unwrap();
        assert_eq!(program.layer_count, 1);
        assert!(program.uniforms.contains("layer0_scale"));
        assert!(!program.uniforms.contains("layer0_brick_width"));
        assert!(!program.source.fragment.contains("pattern_layer1"));
    }

    #[test]
    fn test_layers_composed_in_order() {
        let spec = MaterialSpec::default()
            .layer(LayerSpec::new(PatternKind::Noise).blend(BlendMode::Multiply))
            .layer(LayerSpec::new(PatternKind::Dots).blend(BlendMode::Screen));
        let composition = compose_default(&spec);
        let fragment = &composition.artifact.program().unwrap().source.fragment;

        let first = fragment
            .find("color = blend_multiply(color, pattern_layer0(p, n, color), material.layer0_opacity);")
            .unwrap();
        let second = fragment
            .find("color = blend_screen(color, pattern_layer1(p, n, color), material.layer1_opacity);")
            .unwrap();
        assert!(first < second);
        assert!(!fragment.contains("fn blend_overlay"));
    }

    #[test]
    fn test_unknown_kind_skipped_with_diagnostic() {
        let unknown = LayerSpec::with_params(PatternParams::Unknown {
            kind: "marble".to_string(),
            params: BTreeMap::new(),
        });
        let spec = MaterialSpec::default()
            .layer(unknown)
            .layer(LayerSpec::new(PatternKind::Stripes));
        let composition = compose_default(&spec);

        assert_eq!(composition.diagnostics.len(), 1);
        assert_eq!(composition.diagnostics[0].layer, Some(0));
        let program = composition.artifact.program().unwrap();
        assert_eq!(program.layer_count, 1);
        assert!(program.uniforms.contains("layer0_ratio"));
    }

    #[test]
    fn test_only_unknown_layers_fall_back_to_fixed_function() {
        let spec = MaterialSpec::default().layer(LayerSpec::with_params(PatternParams::Unknown {
            kind: "marble".to_string(),
            params: BTreeMap::new(),
        }));
        assert!(compose_default(&spec).artifact.is_fixed_function());
    }

    #[test]
    fn test_helpers_only_when_used() {
        let gradient = MaterialSpec::default().layer(LayerSpec::new(PatternKind::Gradient));
        let fragment = compose_default(&gradient).artifact.program().unwrap().source.fragment.clone();
        assert!(!fragment.contains("fn face_uv"));
        assert!(!fragment.contains("fn fbm"));

        let wood = MaterialSpec::default().layer(LayerSpec::new(PatternKind::WoodGrain));
        let fragment = compose_default(&wood).artifact.program().unwrap().source.fragment.clone();
        assert!(fragment.contains("fn fbm"));
        assert_eq!(fragment.matches("fn blend_mix").count(), 1);
    }

    #[test]
    fn test_constants_baked_from_config() {
        let config = ComposerConfig {
            rim_power: 5.0,
            ..Default::default()
        };
        let spec = MaterialSpec::default().layer(LayerSpec::new(PatternKind::Checker));
        let composition = compose(&spec, &config, 3);
        let program = composition.artifact.program().unwrap();
        assert!(program.source.fragment.contains("const RIM_POWER: f32 = 5.0;"));
        assert!(program.source.fragment.contains("const AMBIENT_FLOOR: f32 = 0.03;"));
        assert_eq!(program.generation(), 3);
    }

    #[test]
    fn test_uniform_values_match_table() {
        let spec = MaterialSpec::new(BaseSurface::default().with_opacity(0.5))
            .layer(LayerSpec::new(PatternKind::Brick).opacity(0.25));
        let composition = compose_default(&spec);
        let program = composition.artifact.program().unwrap();
        for (name, value) in material_uniform_values(&spec) {
            assert_eq!(program.uniforms.get(&name), Some(&value), "{}", name);
        }
        assert_eq!(program.uniforms.get("layer0_opacity"), Some(&UniformValue::Float(0.25)));
        assert!(composition.artifact.is_transparent());
    }

    #[test]
    fn test_wgsl_float_keeps_fraction() {
        assert_eq!(wgsl_float(4.0), "4.0");
        assert_eq!(wgsl_float(0.005), "0.005");
    }
}
