//! Material data model: parameter schema primitives, the base surface, layers
//! and the material spec that owns them.
//!
//! Everything here is plain data. Values are clamped at the point of mutation,
//! so a `MaterialSpec` is always safe to hand to the composer.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::pattern::{PatternKind, PatternParams};

/// Types of pattern parameters declared by the catalog.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// Single float value, optionally range-limited.
    Scalar,
    /// RGB color, each channel clamped to 0-1.
    Color,
    /// One of a fixed set of named options, coded as its index on the GPU.
    Options(&'static [&'static str]),
}

/// Runtime value for a parameter.
///
/// The plain-data form is untagged: numbers are scalars, three-element arrays
/// are colors and strings are option names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(f32),
    Color([f32; 3]),
    Choice(String),
}

impl Default for ParamValue {
    fn default() -> Self {
        ParamValue::Scalar(0.0)
    }
}

impl ParamValue {
    /// Get as float, returning 0.0 for non-scalar types.
    pub fn as_scalar(&self) -> f32 {
        match self {
            ParamValue::Scalar(v) => *v,
            _ => 0.0,
        }
    }

    /// Get as color, returning black for non-color types.
    pub fn as_color(&self) -> [f32; 3] {
        match self {
            ParamValue::Color(c) => *c,
            _ => [0.0; 3],
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            ParamValue::Scalar(_) => "scalar",
            ParamValue::Color(_) => "color",
            ParamValue::Choice(_) => "option",
        }
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Scalar(v)
    }
}

impl From<Vec3> for ParamValue {
    fn from(v: Vec3) -> Self {
        ParamValue::Color(v.to_array())
    }
}

/// A parameter definition in a pattern schema.
#[derive(Clone, Debug, Serialize)]
pub struct ParamDef {
    /// Parameter name (also the uniform suffix in generated source).
    pub name: &'static str,
    /// Type of the parameter.
    pub param_type: ParamType,
    /// Default value used when a value is missing or unusable.
    pub default_value: ParamValue,
    /// Optional minimum value (for Scalar type).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f32>,
    /// Optional maximum value (for Scalar type).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f32>,
    /// Human-readable description.
    pub description: &'static str,
}

impl ParamDef {
    /// Create a new scalar parameter definition.
    pub fn float(name: &'static str, default: f32) -> Self {
        Self {
            name,
            param_type: ParamType::Scalar,
            default_value: ParamValue::Scalar(default),
            min: None,
            max: None,
            description: "",
        }
    }

    /// Create a new RGB color parameter definition.
    pub fn color(name: &'static str, default: [f32; 3]) -> Self {
        Self {
            name,
            param_type: ParamType::Color,
            default_value: ParamValue::Color(default),
            min: None,
            max: None,
            description: "",
        }
    }

    /// Create a new option-set parameter definition. `default` indexes `options`.
    pub fn options(name: &'static str, options: &'static [&'static str], default: usize) -> Self {
        let default_name = options.get(default).or(options.first()).copied().unwrap_or("");
        Self {
            name,
            param_type: ParamType::Options(options),
            default_value: ParamValue::Choice(default_name.to_string()),
            min: None,
            max: None,
            description: "",
        }
    }

    /// Builder: set min/max range.
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Builder: set description.
    pub fn with_description(mut self, desc: &'static str) -> Self {
        self.description = desc;
        self
    }

    /// Coerce a value into this parameter's declared shape and range.
    ///
    /// Out-of-range scalars and color channels are clamped, unknown options
    /// and mismatched shapes fall back to the default. The second element
    /// describes what was changed, if anything.
    pub fn sanitize(&self, value: &ParamValue) -> (ParamValue, Option<String>) {
        match (&self.param_type, value) {
            (ParamType::Scalar, ParamValue::Scalar(v)) => {
                if !v.is_finite() {
                    return (
                        self.default_value.clone(),
                        Some(format!("'{}' is not a finite number, using default", self.name)),
                    );
                }
                let min = self.min.unwrap_or(f32::NEG_INFINITY);
                let max = self.max.unwrap_or(f32::INFINITY);
                let clamped = v.clamp(min, max);
                let issue = (clamped != *v).then(|| {
                    format!("'{}' = {} outside [{}, {}], clamped to {}", self.name, v, min, max, clamped)
                });
                (ParamValue::Scalar(clamped), issue)
            }
            (ParamType::Color, ParamValue::Color(c)) => {
                if c.iter().any(|ch| !ch.is_finite()) {
                    return (
                        self.default_value.clone(),
                        Some(format!("'{}' has a non-finite channel, using default", self.name)),
                    );
                }
                let clamped = c.map(|ch| ch.clamp(0.0, 1.0));
                let issue = (clamped != *c)
                    .then(|| format!("'{}' channels clamped to [0, 1]", self.name));
                (ParamValue::Color(clamped), issue)
            }
            (ParamType::Options(options), ParamValue::Choice(name)) => {
                if options.contains(&name.as_str()) {
                    (value.clone(), None)
                } else {
                    (
                        self.default_value.clone(),
                        Some(format!("'{}' has no option '{}', using default", self.name, name)),
                    )
                }
            }
            // Options may also arrive coded as their index.
            (ParamType::Options(options), ParamValue::Scalar(code)) => {
                let index = *code as usize;
                match options.get(index) {
                    Some(name) if code.fract() == 0.0 && *code >= 0.0 => {
                        (ParamValue::Choice(name.to_string()), None)
                    }
                    _ => (
                        self.default_value.clone(),
                        Some(format!("'{}' has no option coded {}, using default", self.name, code)),
                    ),
                }
            }
            (_, other) => (
                self.default_value.clone(),
                Some(format!(
                    "'{}' expects a {} value, got {}; using default",
                    self.name,
                    self.shape(),
                    other.shape()
                )),
            ),
        }
    }

    fn shape(&self) -> &'static str {
        match self.param_type {
            ParamType::Scalar => "scalar",
            ParamType::Color => "color",
            ParamType::Options(_) => "option",
        }
    }
}

/// Clamp a unit-interval value, mapping non-finite input to `fallback`.
pub(crate) fn clamp_unit(v: f32, fallback: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

fn clamp_color(c: Vec3, fallback: Vec3) -> Vec3 {
    if c.is_finite() {
        c.clamp(Vec3::ZERO, Vec3::ONE)
    } else {
        fallback
    }
}

/// Named properties of the base surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BaseProperty {
    Color,
    Roughness,
    Metalness,
    Clearcoat,
    EmissiveColor,
    EmissiveIntensity,
    Opacity,
}

impl BaseProperty {
    pub const ALL: [BaseProperty; 7] = [
        BaseProperty::Color,
        BaseProperty::Roughness,
        BaseProperty::Metalness,
        BaseProperty::Clearcoat,
        BaseProperty::EmissiveColor,
        BaseProperty::EmissiveIntensity,
        BaseProperty::Opacity,
    ];

    /// Uniform name of this property in a composed program.
    pub fn uniform_name(&self) -> &'static str {
        match self {
            BaseProperty::Color => "base_color",
            BaseProperty::Roughness => "roughness",
            BaseProperty::Metalness => "metalness",
            BaseProperty::Clearcoat => "clearcoat",
            BaseProperty::EmissiveColor => "emissive_color",
            BaseProperty::EmissiveIntensity => "emissive_intensity",
            BaseProperty::Opacity => "opacity",
        }
    }

    pub fn is_color(&self) -> bool {
        matches!(self, BaseProperty::Color | BaseProperty::EmissiveColor)
    }
}

/// Core PBR-like properties of a material before any layer is applied.
#[derive(Clone, Debug, PartialEq)]
pub struct BaseSurface {
    color: Vec3,
    roughness: f32,
    metalness: f32,
    clearcoat: f32,
    emissive_color: Vec3,
    emissive_intensity: f32,
    opacity: f32,
}

impl Default for BaseSurface {
    fn default() -> Self {
        Self {
            color: Vec3::splat(0.8),
            roughness: 0.5,
            metalness: 0.0,
            clearcoat: 0.0,
            emissive_color: Vec3::ZERO,
            emissive_intensity: 1.0,
            opacity: 1.0,
        }
    }
}

impl BaseSurface {
    pub fn new(color: Vec3) -> Self {
        let mut surface = Self::default();
        surface.set_color(color);
        surface
    }

    pub fn color(&self) -> Vec3 {
        self.color
    }

    pub fn roughness(&self) -> f32 {
        self.roughness
    }

    pub fn metalness(&self) -> f32 {
        self.metalness
    }

    pub fn clearcoat(&self) -> f32 {
        self.clearcoat
    }

    pub fn emissive_color(&self) -> Vec3 {
        self.emissive_color
    }

    pub fn emissive_intensity(&self) -> f32 {
        self.emissive_intensity
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_color(&mut self, color: Vec3) {
        self.color = clamp_color(color, self.color);
    }

    pub fn set_roughness(&mut self, v: f32) {
        self.roughness = clamp_unit(v, self.roughness);
    }

    pub fn set_metalness(&mut self, v: f32) {
        self.metalness = clamp_unit(v, self.metalness);
    }

    pub fn set_clearcoat(&mut self, v: f32) {
        self.clearcoat = clamp_unit(v, self.clearcoat);
    }

    pub fn set_emissive_color(&mut self, color: Vec3) {
        self.emissive_color = clamp_color(color, self.emissive_color);
    }

    pub fn set_emissive_intensity(&mut self, v: f32) {
        if v.is_finite() {
            self.emissive_intensity = v.max(0.0);
        }
    }

    pub fn set_opacity(&mut self, v: f32) {
        self.opacity = clamp_unit(v, self.opacity);
    }

    /// Builder: set roughness.
    pub fn with_roughness(mut self, v: f32) -> Self {
        self.set_roughness(v);
        self
    }

    /// Builder: set metalness.
    pub fn with_metalness(mut self, v: f32) -> Self {
        self.set_metalness(v);
        self
    }

    /// Builder: set clearcoat.
    pub fn with_clearcoat(mut self, v: f32) -> Self {
        self.set_clearcoat(v);
        self
    }

    /// Builder: set emissive color and intensity.
    pub fn with_emissive(mut self, color: Vec3, intensity: f32) -> Self {
        self.set_emissive_color(color);
        self.set_emissive_intensity(intensity);
        self
    }

    /// Builder: set opacity.
    pub fn with_opacity(mut self, v: f32) -> Self {
        self.set_opacity(v);
        self
    }

    /// Read a property as a plain value.
    pub fn get(&self, property: BaseProperty) -> ParamValue {
        match property {
            BaseProperty::Color => self.color.into(),
            BaseProperty::Roughness => self.roughness.into(),
            BaseProperty::Metalness => self.metalness.into(),
            BaseProperty::Clearcoat => self.clearcoat.into(),
            BaseProperty::EmissiveColor => self.emissive_color.into(),
            BaseProperty::EmissiveIntensity => self.emissive_intensity.into(),
            BaseProperty::Opacity => self.opacity.into(),
        }
    }

    /// Write a property from a plain value, clamping into its valid range.
    ///
    /// A value of the wrong shape is rejected and the property is left as is.
    pub fn set(&mut self, property: BaseProperty, value: &ParamValue) -> Result<(), String> {
        match (property.is_color(), value) {
            (true, ParamValue::Color(c)) => {
                let color = Vec3::from_array(*c);
                if property == BaseProperty::Color {
                    self.set_color(color);
                } else {
                    self.set_emissive_color(color);
                }
                Ok(())
            }
            (false, ParamValue::Scalar(v)) => {
                match property {
                    BaseProperty::Roughness => self.set_roughness(*v),
                    BaseProperty::Metalness => self.set_metalness(*v),
                    BaseProperty::Clearcoat => self.set_clearcoat(*v),
                    BaseProperty::EmissiveIntensity => self.set_emissive_intensity(*v),
                    BaseProperty::Opacity => self.set_opacity(*v),
                    BaseProperty::Color | BaseProperty::EmissiveColor => {}
                }
                Ok(())
            }
            _ => Err(format!(
                "base property '{}' cannot be set from {:?}",
                property.uniform_name(),
                value
            )),
        }
    }
}

/// How a layer's pattern color combines with the color accumulated so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlendMode {
    Replace,
    Multiply,
    Overlay,
    Add,
    #[default]
    Mix,
    Screen,
}

impl BlendMode {
    pub const ALL: [BlendMode; 6] = [
        BlendMode::Replace,
        BlendMode::Multiply,
        BlendMode::Overlay,
        BlendMode::Add,
        BlendMode::Mix,
        BlendMode::Screen,
    ];

    /// Stable identifier used in serialized materials.
    pub fn id(&self) -> &'static str {
        match self {
            BlendMode::Replace => "replace",
            BlendMode::Multiply => "multiply",
            BlendMode::Overlay => "overlay",
            BlendMode::Add => "add",
            BlendMode::Mix => "mix",
            BlendMode::Screen => "screen",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL.into_iter().find(|m| m.id().eq_ignore_ascii_case(id))
    }

    /// Channel-wise blend of `layer` over `base` at `opacity`.
    ///
    /// This is the reference for the WGSL helpers the composer emits.
    pub fn apply(&self, base: Vec3, layer: Vec3, opacity: f32) -> Vec3 {
        let target = match self {
            BlendMode::Replace | BlendMode::Mix => layer,
            BlendMode::Multiply => base * layer,
            BlendMode::Add => (base + layer).min(Vec3::ONE),
            BlendMode::Screen => Vec3::ONE - (Vec3::ONE - base) * (Vec3::ONE - layer),
            BlendMode::Overlay => {
                let overlay = |b: f32, l: f32| {
                    if b < 0.5 {
                        2.0 * b * l
                    } else {
                        1.0 - 2.0 * (1.0 - b) * (1.0 - l)
                    }
                };
                Vec3::new(
                    overlay(base.x, layer.x),
                    overlay(base.y, layer.y),
                    overlay(base.z, layer.z),
                )
            }
        };
        base.lerp(target, opacity)
    }
}

/// One procedural pattern entry in a material's ordered stack.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerSpec {
    params: PatternParams,
    blend_mode: BlendMode,
    opacity: f32,
    enabled: bool,
}

impl LayerSpec {
    /// A new enabled, fully opaque layer with the kind's default parameters.
    pub fn new(kind: PatternKind) -> Self {
        Self::with_params(PatternParams::defaults(kind))
    }

    /// A new layer from explicit parameters. Parameters are re-validated
    /// against the catalog, so out-of-range fields are clamped here.
    pub fn with_params(params: PatternParams) -> Self {
        let (params, issues) = params.sanitized();
        for issue in issues {
            log::debug!("Layer parameter adjusted on construction: {}", issue);
        }
        Self {
            params,
            blend_mode: BlendMode::default(),
            opacity: 1.0,
            enabled: true,
        }
    }

    /// Builder: set blend mode.
    pub fn blend(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    /// Builder: set opacity.
    pub fn opacity(mut self, opacity: f32) -> Self {
        self.set_opacity(opacity);
        self
    }

    /// Builder: set enabled flag.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn params(&self) -> &PatternParams {
        &self.params
    }

    pub(crate) fn params_mut(&mut self) -> &mut PatternParams {
        &mut self.params
    }

    /// Pattern kind, or `None` when the layer names a kind the catalog lacks.
    pub fn kind(&self) -> Option<PatternKind> {
        self.params.kind()
    }

    pub fn kind_id(&self) -> &str {
        self.params.kind_id()
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub fn layer_opacity(&self) -> f32 {
        self.opacity
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_params(&mut self, params: PatternParams) {
        self.params = params;
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) {
        self.blend_mode = mode;
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = clamp_unit(opacity, self.opacity);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

/// A base surface plus an ordered stack of layers.
///
/// This is the only persisted state; every compiled artifact derives from it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterialSpec {
    pub base: BaseSurface,
    pub layers: Vec<LayerSpec>,
}

impl MaterialSpec {
    pub fn new(base: BaseSurface) -> Self {
        Self {
            base,
            layers: Vec::new(),
        }
    }

    /// Builder: append a layer.
    pub fn layer(mut self, layer: LayerSpec) -> Self {
        self.layers.push(layer);
        self
    }

    /// Enabled layers in stack order.
    pub fn enabled_layers(&self) -> impl Iterator<Item = &LayerSpec> {
        self.layers.iter().filter(|l| l.is_enabled())
    }
}
