//! WGSL generators for the pattern catalog.
//!
//! Every pattern function has the signature
//! `fn pattern_layerN(p: vec3<f32>, n: vec3<f32>, base: vec3<f32>) -> vec3<f32>`
//! where `p` and `n` are local-space position and normal and `base` is the
//! running color. Parameters are read from `material.layerN_<param>`.

use crate::pattern::{PatternKind, PatternParams, MAX_NOISE_OCTAVES};
use crate::program::UniformValue;

/// Generated source and uniforms for one layer.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternFunction {
    pub kind: PatternKind,
    pub name: String,
    pub source: String,
    /// Uniforms the function reads, fully named (`layerN_param`).
    pub uniforms: Vec<(String, UniformValue)>,
}

/// Uniform name for a layer parameter.
pub fn uniform_name(layer_index: usize, param: &str) -> String {
    format!("layer{}_{}", layer_index, param)
}

/// Name of the generated function for a layer.
pub fn function_name(layer_index: usize) -> String {
    format!("pattern_layer{}", layer_index)
}

/// Generate the composition function for one layer.
///
/// Returns `None` for a kind the catalog does not know: no function and no
/// uniforms, so the caller emits no call either.
pub fn pattern_function(layer_index: usize, params: &PatternParams) -> Option<PatternFunction> {
    let kind = params.kind()?;
    let name = function_name(layer_index);
    let prefix = format!("material.{}", uniform_name(layer_index, ""));
    let body = pattern_body(kind).replace('$', &prefix);

    let source = format!(
        "fn {}(p: vec3<f32>, n: vec3<f32>, base: vec3<f32>) -> vec3<f32> {{\n{}}}\n",
        name, body
    );
    let uniforms = params
        .uniform_values()
        .into_iter()
        .map(|(param, value)| (uniform_name(layer_index, param), value))
        .collect();

    Some(PatternFunction {
        kind,
        name,
        source,
        uniforms,
    })
}

/// Function body for a kind. `$` stands for the layer's uniform prefix.
fn pattern_body(kind: PatternKind) -> &'static str {
    match kind {
        PatternKind::Brick => BRICK_BODY,
        PatternKind::Checker => CHECKER_BODY,
        PatternKind::Noise => NOISE_BODY,
        PatternKind::Gradient => GRADIENT_BODY,
        PatternKind::WoodGrain => WOOD_BODY,
        PatternKind::Weave => WEAVE_BODY,
        PatternKind::Stripes => STRIPES_BODY,
        PatternKind::Dots => DOTS_BODY,
    }
}

const BRICK_BODY: &str = "\
    let uv = face_uv(p, n);
    let brick = vec2<f32>($brick_width, $brick_height);
    let row = floor(uv.y / brick.y);
    let shift = $offset * (row - 2.0 * floor(row * 0.5));
    let cell_pos = vec2<f32>(fract(uv.x / brick.x + shift) * brick.x, fract(uv.y / brick.y) * brick.y);
    let half_joint = $mortar_size * 0.5;
    let in_x = step(half_joint, cell_pos.x) * step(cell_pos.x, brick.x - half_joint);
    let in_y = step(half_joint, cell_pos.y) * step(cell_pos.y, brick.y - half_joint);
    return mix($mortar_color, $brick_color, vec3<f32>(in_x * in_y));
";

const CHECKER_BODY: &str = "\
    let cell = floor(face_uv(p, n) * $scale);
    let sum = cell.x + cell.y;
    let parity = sum - 2.0 * floor(sum * 0.5);
    return mix($color1, $color2, vec3<f32>(parity));
";

const NOISE_BODY: &str = "\
    let v = fbm(p * $scale, $octaves);
    return mix($color1, $color2, vec3<f32>(v));
";

const GRADIENT_BODY: &str = "\
    var t = p.y + 0.5;
    if ($direction > 1.5) {
        t = (p.x + p.y) * 0.5 + 0.5;
    } else if ($direction > 0.5) {
        t = p.x + 0.5;
    }
    t = clamp(t + $offset, 0.0, 1.0);
    return mix($color1, $color2, vec3<f32>(t));
";

const WOOD_BODY: &str = "\
    let warp = fbm(p * 4.0, 3.0) * $turbulence;
    let rings = fract(length(p.xz) * $ring_scale + warp);
    let t = smoothstep(0.0, 0.5, rings) * (1.0 - smoothstep(0.5, 1.0, rings));
    return mix($dark_color, $light_color, vec3<f32>(t));
";

const WEAVE_BODY: &str = "\
    let uv = face_uv(p, n) * $scale;
    let cell = floor(uv);
    let f = fract(uv);
    let sum = cell.x + cell.y;
    let parity = sum - 2.0 * floor(sum * 0.5);
    let gap = (1.0 - $thread_width) * 0.5;
    let across = mix(f.y, f.x, parity);
    let along = mix(f.x, f.y, parity);
    let on_thread = step(gap, across) * step(across, 1.0 - gap);
    let bulge = 1.0 - $shading * abs(along * 2.0 - 1.0);
    let thread = $thread_color * bulge;
    let gap_color = base * (1.0 - $shading);
    return mix(gap_color, thread, vec3<f32>(on_thread));
";

const STRIPES_BODY: &str = "\
    let uv = face_uv(p, n);
    var coord = uv.y;
    if ($direction > 1.5) {
        coord = (uv.x + uv.y) * 0.70710677;
    } else if ($direction > 0.5) {
        coord = uv.x;
    }
    let band = fract(coord * $scale);
    return mix($color2, $color1, vec3<f32>(step(band, $ratio)));
";

const DOTS_BODY: &str = "\
    let cell = fract(face_uv(p, n) * $scale) - vec2<f32>(0.5);
    let inside = 1.0 - step($radius, length(cell));
    return mix($background_color, $dot_color, vec3<f32>(inside));
";

/// Dominant-axis projection of local position, so 2D patterns stay fixed to
/// a face of the volume.
pub const FACE_UV_WGSL: &str = "\
fn face_uv(p: vec3<f32>, n: vec3<f32>) -> vec2<f32> {
    let a = abs(n);
    if (a.x >= a.y && a.x >= a.z) {
        return p.zy;
    }
    if (a.y >= a.z) {
        return p.xz;
    }
    return p.xy;
}
";

/// Hash, trilinear value noise and the octave-bounded fractal sum.
pub fn noise_wgsl() -> String {
    format!(
        "\
const MAX_NOISE_OCTAVES: i32 = {max};

fn hash3(p: vec3<f32>) -> f32 {{
    let q = fract(p * 0.3183099 + vec3<f32>(0.1, 0.2, 0.3)) * 17.0;
    return fract(q.x * q.y * q.z * (q.x + q.y + q.z));
}}

fn value_noise(p: vec3<f32>) -> f32 {{
    let i = floor(p);
    let f = fract(p);
    let u = f * f * (vec3<f32>(3.0) - 2.0 * f);
    let x00 = mix(hash3(i), hash3(i + vec3<f32>(1.0, 0.0, 0.0)), u.x);
    let x10 = mix(hash3(i + vec3<f32>(0.0, 1.0, 0.0)), hash3(i + vec3<f32>(1.0, 1.0, 0.0)), u.x);
    let x01 = mix(hash3(i + vec3<f32>(0.0, 0.0, 1.0)), hash3(i + vec3<f32>(1.0, 0.0, 1.0)), u.x);
    let x11 = mix(hash3(i + vec3<f32>(0.0, 1.0, 1.0)), hash3(i + vec3<f32>(1.0, 1.0, 1.0)), u.x);
    return mix(mix(x00, x10, u.y), mix(x01, x11, u.y), u.z);
}}

fn fbm(p: vec3<f32>, octaves: f32) -> f32 {{
    let count = clamp(i32(octaves), 1, MAX_NOISE_OCTAVES);
    var sum = 0.0;
    var amplitude = 0.5;
    var norm = 0.0;
    var q = p;
    for (var i = 0; i < MAX_NOISE_OCTAVES; i = i + 1) {{
        if (i >= count) {{
            break;
        }}
        sum = sum + amplitude * value_noise(q);
        norm = norm + amplitude;
        amplitude = amplitude * 0.5;
        q = q * 2.0;
    }}
    return sum / norm;
}}
",
        max = MAX_NOISE_OCTAVES
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::ParamValue;

    #[test]
    fn test_all_kinds_generate() {
        for kind in PatternKind::ALL {
            let params = PatternParams::defaults(kind);
            let func = pattern_function(2, &params).unwrap();
            assert_eq!(func.name, "pattern_layer2");
            assert!(func.source.starts_with("fn pattern_layer2(p: vec3<f32>, n: vec3<f32>, base: vec3<f32>) -> vec3<f32> {"));
            assert!(!func.source.contains('$'), "unsubstituted prefix in {:?}", kind);
        }
    }

    #[test]
    fn test_uniforms_cover_every_reference() {
        for kind in PatternKind::ALL {
            let func = pattern_function(0, &PatternParams::defaults(kind)).unwrap();
            for (name, _) in &func.uniforms {
                assert!(name.starts_with("layer0_"));
                assert!(
                    func.source.contains(&format!("material.{}", name)),
                    "{:?} never reads {}",
                    kind,
                    name
                );
            }
            // Every material.layer0_* reference must be a declared uniform
            for part in func.source.split("material.").skip(1) {
                let ident: String = part
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                    .collect();
                assert!(
                    func.uniforms.iter().any(|(n, _)| *n == ident),
                    "{:?} reads undeclared {}",
                    kind,
                    ident
                );
            }
        }
    }

    #[test]
    fn test_uniform_kinds_follow_param_types() {
        let mut params = PatternParams::defaults(PatternKind::Stripes);
        params.set("direction", &ParamValue::Choice("horizontal".into()));
        let func = pattern_function(1, &params).unwrap();

        let get = |name: &str| {
            func.uniforms
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("layer1_color1"), UniformValue::Vec3([1.0, 1.0, 1.0]));
        assert_eq!(get("layer1_direction"), UniformValue::Float(1.0));
        assert_eq!(get("layer1_scale"), UniformValue::Float(8.0));
    }

    #[test]
    fn test_unknown_kind_generates_nothing() {
        let params = PatternParams::Unknown {
            kind: "marble".to_string(),
            params: Default::default(),
        };
        assert!(pattern_function(0, &params).is_none());
    }

    #[test]
    fn test_noise_helpers_bound_octaves() {
        let src = noise_wgsl();
        assert!(src.contains("const MAX_NOISE_OCTAVES: i32 = 4;"));
        assert!(src.contains("clamp(i32(octaves), 1, MAX_NOISE_OCTAVES)"));
    }
}
