//! Lighting sync: pushes the current scene lights and shadow state into the
//! lighting uniforms of an already compiled artifact.
//!
//! The model is two directional lights plus ambient:
//! - The first directional light in traversal order is the key light
//! - The second is the fill light; without one, fill intensity is 0
//! - The first ambient light (color * intensity) is the ambient term, or the
//!   configured fallback when the scene has none
//!
//! Any further directional or ambient lights are ignored. Syncing never
//! touches base or pattern uniforms and never recompiles.

use glam::{Mat4, Vec3};

use crate::config::ComposerConfig;
use crate::program::{Artifact, TextureHandle, UniformValue};

/// Names of every uniform written by [`sync_lighting`], in table order.
pub const LIGHTING_UNIFORMS: [&str; 12] = [
    "key_light_direction",
    "key_light_color",
    "key_light_intensity",
    "fill_light_direction",
    "fill_light_color",
    "fill_light_intensity",
    "ambient_color",
    "shadow_map",
    "shadow_light_space",
    "shadow_bias",
    "shadow_map_size",
    "shadow_enabled",
];

/// Shadow state from the rendering subsystem for one light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowDescriptor {
    /// Depth map.
    pub map: TextureHandle,
    /// World to light clip space.
    pub light_space: Mat4,
    /// Depth bias; `None` uses the configured default.
    pub bias: Option<f32>,
    /// Depth map resolution in texels.
    pub map_size: f32,
}

impl ShadowDescriptor {
    pub fn new(map: TextureHandle, light_space: Mat4, map_size: f32) -> Self {
        Self {
            map,
            light_space,
            bias: None,
            map_size,
        }
    }

    pub fn with_bias(mut self, bias: f32) -> Self {
        self.bias = Some(bias);
        self
    }
}

/// Classification of a light-like scene object.
#[derive(Clone, Debug, PartialEq)]
pub enum LightKind {
    Directional {
        /// Direction the light travels, world space.
        direction: Vec3,
        casts_shadow: bool,
        shadow: Option<ShadowDescriptor>,
    },
    Ambient,
    /// Not part of the lighting model; skipped during selection.
    Point { position: Vec3 },
}

/// One light-like object from the scene.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneLight {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
}

impl SceneLight {
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional {
                direction,
                casts_shadow: false,
                shadow: None,
            },
            color,
            intensity,
        }
    }

    pub fn ambient(color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Ambient,
            color,
            intensity,
        }
    }

    pub fn point(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Point { position },
            color,
            intensity,
        }
    }

    /// Mark a directional light as shadow casting with the given shadow state.
    /// Has no effect on other kinds.
    pub fn with_shadow(mut self, descriptor: ShadowDescriptor) -> Self {
        if let LightKind::Directional {
            casts_shadow,
            shadow,
            ..
        } = &mut self.kind
        {
            *casts_shadow = true;
            *shadow = Some(descriptor);
        }
        self
    }

    pub fn is_directional(&self) -> bool {
        matches!(self.kind, LightKind::Directional { .. })
    }

    pub fn is_ambient(&self) -> bool {
        matches!(self.kind, LightKind::Ambient)
    }
}

/// Scene lights in traversal order plus the receiving object's shadow flag.
#[derive(Clone, Debug, PartialEq)]
pub struct LightSnapshot {
    pub lights: Vec<SceneLight>,
    pub receive_shadows: bool,
}

impl Default for LightSnapshot {
    fn default() -> Self {
        Self {
            lights: Vec::new(),
            receive_shadows: true,
        }
    }
}

impl LightSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_light(mut self, light: SceneLight) -> Self {
        self.lights.push(light);
        self
    }

    pub fn with_receive_shadows(mut self, receive: bool) -> Self {
        self.receive_shadows = receive;
        self
    }
}

/// A selected directional light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalTerm {
    /// Normalized travel direction.
    pub direction: [f32; 3],
    pub color: [f32; 3],
    pub intensity: f32,
}

impl DirectionalTerm {
    /// Zero-intensity stand-in for a missing light.
    fn off() -> Self {
        Self {
            direction: [0.0, -1.0, 0.0],
            color: [1.0, 1.0, 1.0],
            intensity: 0.0,
        }
    }

    fn from_light(direction: Vec3, light: &SceneLight) -> Self {
        Self {
            direction: normalize_direction(direction),
            color: light.color.to_array(),
            intensity: light.intensity.max(0.0),
        }
    }
}

/// Shadow bundle taken from the key light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedShadow {
    pub map: TextureHandle,
    pub light_space: Mat4,
    pub bias: f32,
    pub map_size: f32,
}

/// Lighting uniforms for one frame, after light selection.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedLighting {
    pub key: DirectionalTerm,
    pub fill: DirectionalTerm,
    pub ambient: [f32; 3],
    pub shadow: Option<ResolvedShadow>,
}

impl ResolvedLighting {
    /// Lighting for a scene with no lights.
    pub fn unlit(config: &ComposerConfig) -> Self {
        Self {
            key: DirectionalTerm::off(),
            fill: DirectionalTerm::off(),
            ambient: config.ambient_fallback,
            shadow: None,
        }
    }

    /// Values for every name in [`LIGHTING_UNIFORMS`], in the same order.
    pub fn uniform_values(&self, config: &ComposerConfig) -> Vec<(&'static str, UniformValue)> {
        let (map, light_space, bias, map_size) = match &self.shadow {
            Some(s) => (Some(s.map), s.light_space, s.bias, s.map_size),
            None => (None, Mat4::IDENTITY, config.default_shadow_bias, 0.0),
        };
        vec![
            ("key_light_direction", UniformValue::Vec3(self.key.direction)),
            ("key_light_color", UniformValue::Vec3(self.key.color)),
            ("key_light_intensity", UniformValue::Float(self.key.intensity)),
            ("fill_light_direction", UniformValue::Vec3(self.fill.direction)),
            ("fill_light_color", UniformValue::Vec3(self.fill.color)),
            ("fill_light_intensity", UniformValue::Float(self.fill.intensity)),
            ("ambient_color", UniformValue::Vec3(self.ambient)),
            ("shadow_map", UniformValue::Texture(map)),
            ("shadow_light_space", UniformValue::Mat4(light_space.to_cols_array_2d())),
            ("shadow_bias", UniformValue::Float(bias)),
            ("shadow_map_size", UniformValue::Float(map_size)),
            ("shadow_enabled", UniformValue::Bool(self.shadow.is_some())),
        ]
    }
}

/// Normalize a light direction, falling back to straight down.
fn normalize_direction(dir: Vec3) -> [f32; 3] {
    let len = dir.length();
    if len > 0.001 && len.is_finite() {
        (dir / len).to_array()
    } else {
        [0.0, -1.0, 0.0]
    }
}

/// Select key, fill, ambient and shadow from a snapshot.
pub fn resolve_lighting(snapshot: &LightSnapshot, config: &ComposerConfig) -> ResolvedLighting {
    let mut resolved = ResolvedLighting::unlit(config);
    let mut directional_seen = 0usize;
    let mut ambient_seen = false;

    for light in &snapshot.lights {
        match &light.kind {
            LightKind::Directional {
                direction,
                casts_shadow,
                shadow,
            } => {
                match directional_seen {
                    0 => {
                        resolved.key = DirectionalTerm::from_light(*direction, light);
                        if *casts_shadow && snapshot.receive_shadows {
                            resolved.shadow = shadow.map(|s| ResolvedShadow {
                                map: s.map,
                                light_space: s.light_space,
                                bias: s.bias.unwrap_or(config.default_shadow_bias),
                                map_size: s.map_size,
                            });
                        }
                    }
                    1 => resolved.fill = DirectionalTerm::from_light(*direction, light),
                    _ => log::debug!("Ignoring directional light #{}", directional_seen + 1),
                }
                directional_seen += 1;
            }
            LightKind::Ambient if !ambient_seen => {
                resolved.ambient = (light.color * light.intensity.max(0.0)).to_array();
                ambient_seen = true;
            }
            LightKind::Ambient | LightKind::Point { .. } => {}
        }
    }

    resolved
}

/// Write scene lighting into an artifact's uniforms.
///
/// `config` must be the one the artifact was composed with; it supplies the
/// ambient fallback and default shadow bias. Only the names in
/// [`LIGHTING_UNIFORMS`] are written. The fixed-function path carries no
/// lighting uniforms, so it is left untouched and false is returned.
pub fn sync_lighting(
    artifact: &mut Artifact,
    snapshot: &LightSnapshot,
    config: &ComposerConfig,
) -> bool {
    let Some(program) = artifact.program_mut() else {
        return false;
    };
    let resolved = resolve_lighting(snapshot, config);
    let mut written = true;
    for (name, value) in resolved.uniform_values(config) {
        written &= program.uniforms.set(name, value);
    }
    if !written {
        log::warn!("Artifact is missing lighting uniforms; sync was partial");
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::BaseSurface;
    use crate::program::{ComposedProgram, FixedFunctionParams, ProgramSource, UniformTable};

    fn program_artifact() -> Artifact {
        let config = ComposerConfig::default();
        let mut table = UniformTable::new(0);
        table.push("base_color", UniformValue::Vec3([0.8, 0.8, 0.8]));
        for (name, value) in ResolvedLighting::unlit(&config).uniform_values(&config) {
            table.push(name, value);
        }
        Artifact::Program(ComposedProgram {
            source: ProgramSource {
                vertex: String::new(),
                fragment: String::new(),
            },
            uniforms: table,
            layer_count: 0,
            handle: None,
        })
    }

    #[test]
    fn test_no_lights_uses_fallbacks() {
        let config = ComposerConfig::default();
        let resolved = resolve_lighting(&LightSnapshot::new(), &config);
        assert_eq!(resolved.key.intensity, 0.0);
        assert_eq!(resolved.fill.intensity, 0.0);
        assert_eq!(resolved.ambient, config.ambient_fallback);
        assert!(resolved.shadow.is_none());
    }

    #[test]
    fn test_first_two_directional_lights_win() {
        let snapshot = LightSnapshot::new()
            .with_light(SceneLight::point(Vec3::ONE, Vec3::ONE, 5.0))
            .with_light(SceneLight::directional(Vec3::new(0.0, -2.0, 0.0), Vec3::X, 1.0))
            .with_light(SceneLight::directional(Vec3::X, Vec3::Y, 0.5))
            .with_light(SceneLight::directional(Vec3::Z, Vec3::Z, 9.0));
        let resolved = resolve_lighting(&snapshot, &ComposerConfig::default());

        assert_eq!(resolved.key.direction, [0.0, -1.0, 0.0]);
        assert_eq!(resolved.key.color, [1.0, 0.0, 0.0]);
        assert_eq!(resolved.fill.direction, [1.0, 0.0, 0.0]);
        assert_eq!(resolved.fill.intensity, 0.5);
    }

    #[test]
    fn test_single_directional_has_no_fill() {
        let snapshot =
            LightSnapshot::new().with_light(SceneLight::directional(Vec3::NEG_Y, Vec3::ONE, 2.0));
        let resolved = resolve_lighting(&snapshot, &ComposerConfig::default());
        assert_eq!(resolved.key.intensity, 2.0);
        assert_eq!(resolved.fill.intensity, 0.0);
    }

    #[test]
    fn test_first_ambient_scaled_by_intensity() {
        let snapshot = LightSnapshot::new()
            .with_light(SceneLight::ambient(Vec3::new(1.0, 0.5, 0.0), 0.5))
            .with_light(SceneLight::ambient(Vec3::ONE, 1.0));
        let resolved = resolve_lighting(&snapshot, &ComposerConfig::default());
        assert_eq!(resolved.ambient, [0.5, 0.25, 0.0]);
    }

    #[test]
    fn test_zero_direction_falls_back_to_down() {
        let snapshot =
            LightSnapshot::new().with_light(SceneLight::directional(Vec3::ZERO, Vec3::ONE, 1.0));
        let resolved = resolve_lighting(&snapshot, &ComposerConfig::default());
        assert_eq!(resolved.key.direction, [0.0, -1.0, 0.0]);
    }

    #[test]
    fn test_shadow_requires_caster_and_receiver() {
        let shadow = ShadowDescriptor::new(TextureHandle(7), Mat4::IDENTITY, 2048.0);
        let key = SceneLight::directional(Vec3::NEG_Y, Vec3::ONE, 1.0).with_shadow(shadow);
        let config = ComposerConfig::default();

        let resolved = resolve_lighting(&LightSnapshot::new().with_light(key.clone()), &config);
        let bundle = resolved.shadow.unwrap();
        assert_eq!(bundle.map, TextureHandle(7));
        assert_eq!(bundle.bias, config.default_shadow_bias);

        let no_receive = LightSnapshot::new()
            .with_light(key)
            .with_receive_shadows(false);
        assert!(resolve_lighting(&no_receive, &config).shadow.is_none());

        // Shadows from the fill light are never used
        let fill_shadow = LightSnapshot::new()
            .with_light(SceneLight::directional(Vec3::NEG_Y, Vec3::ONE, 1.0))
            .with_light(SceneLight::directional(Vec3::X, Vec3::ONE, 1.0).with_shadow(shadow));
        assert!(resolve_lighting(&fill_shadow, &config).shadow.is_none());
    }

    #[test]
    fn test_sync_writes_only_lighting() {
        let mut artifact = program_artifact();
        let snapshot = LightSnapshot::new()
            .with_light(SceneLight::directional(Vec3::NEG_Y, Vec3::ONE, 3.0).with_shadow(
                ShadowDescriptor::new(TextureHandle(1), Mat4::IDENTITY, 1024.0).with_bias(0.01),
            ));

        assert!(sync_lighting(&mut artifact, &snapshot, &ComposerConfig::default()));
        let table = &artifact.program().unwrap().uniforms;
        assert_eq!(table.get("key_light_intensity"), Some(&UniformValue::Float(3.0)));
        assert_eq!(table.get("shadow_enabled"), Some(&UniformValue::Bool(true)));
        assert_eq!(table.get("shadow_bias"), Some(&UniformValue::Float(0.01)));
        assert_eq!(table.get("base_color"), Some(&UniformValue::Vec3([0.8, 0.8, 0.8])));

        // An empty scene clears the shadow flag again
        assert!(sync_lighting(&mut artifact, &LightSnapshot::new(), &ComposerConfig::default()));
        let table = &artifact.program().unwrap().uniforms;
        assert_eq!(table.get("shadow_enabled"), Some(&UniformValue::Bool(false)));
        assert_eq!(table.get("key_light_intensity"), Some(&UniformValue::Float(0.0)));
    }

    #[test]
    fn test_sync_on_fixed_function_is_noop() {
        let mut artifact = Artifact::FixedFunction(FixedFunctionParams::new(BaseSurface::default()));
        let before = artifact.fixed_function().cloned();
        assert!(!sync_lighting(&mut artifact, &LightSnapshot::new(), &ComposerConfig::default()));
        assert_eq!(artifact.fixed_function().cloned(), before);
    }

    #[test]
    fn test_sync_uses_given_config_fallbacks() {
        let mut artifact = program_artifact();
        let config = ComposerConfig {
            ambient_fallback: [0.3, 0.2, 0.1],
            default_shadow_bias: 0.02,
            ..ComposerConfig::default()
        };
        let snapshot = LightSnapshot::new().with_light(
            SceneLight::directional(Vec3::NEG_Y, Vec3::ONE, 1.0)
                .with_shadow(ShadowDescriptor::new(TextureHandle(3), Mat4::IDENTITY, 512.0)),
        );

        assert!(sync_lighting(&mut artifact, &snapshot, &config));
        let table = &artifact.program().unwrap().uniforms;
        assert_eq!(table.get("ambient_color"), Some(&UniformValue::Vec3([0.3, 0.2, 0.1])));
        assert_eq!(table.get("shadow_bias"), Some(&UniformValue::Float(0.02)));
    }
}
