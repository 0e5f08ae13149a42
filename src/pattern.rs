//! Pattern catalog: declarative schemas for every pattern kind and the
//! strongly-typed parameter structs validated against them.
//!
//! Schemas are host-defined. Layers pick a kind and set values; anything a
//! layer supplies is clamped or defaulted against the kind's schema before it
//! is stored, so generation never sees an out-of-range value.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use glam::Vec3;
use serde::Serialize;

use crate::material::{ParamDef, ParamValue};
use crate::program::UniformValue;

/// Upper bound on fractal noise octaves, both in generated code and in the
/// `octaves` schema range.
pub const MAX_NOISE_OCTAVES: u32 = 4;

/// The built-in pattern kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Brick,
    Checker,
    Noise,
    Gradient,
    WoodGrain,
    Weave,
    Stripes,
    Dots,
}

impl PatternKind {
    pub const ALL: [PatternKind; 8] = [
        PatternKind::Brick,
        PatternKind::Checker,
        PatternKind::Noise,
        PatternKind::Gradient,
        PatternKind::WoodGrain,
        PatternKind::Weave,
        PatternKind::Stripes,
        PatternKind::Dots,
    ];

    /// Stable identifier used in serialized materials.
    pub fn id(&self) -> &'static str {
        match self {
            PatternKind::Brick => "brick",
            PatternKind::Checker => "checker",
            PatternKind::Noise => "noise",
            PatternKind::Gradient => "gradient",
            PatternKind::WoodGrain => "wood",
            PatternKind::Weave => "weave",
            PatternKind::Stripes => "stripes",
            PatternKind::Dots => "dots",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL.into_iter().find(|k| k.id().eq_ignore_ascii_case(id))
    }

    /// Whether the generated function samples fractal noise.
    pub fn uses_noise(&self) -> bool {
        matches!(self, PatternKind::Noise | PatternKind::WoodGrain)
    }

    /// Whether the generated function projects onto the dominant face.
    pub fn uses_face_projection(&self) -> bool {
        matches!(
            self,
            PatternKind::Brick
                | PatternKind::Checker
                | PatternKind::Weave
                | PatternKind::Stripes
                | PatternKind::Dots
        )
    }
}

/// Axis choice for directional patterns. GPU code: vertical=0, horizontal=1, diagonal=2.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    #[default]
    Vertical,
    Horizontal,
    Diagonal,
}

impl Direction {
    pub const OPTIONS: &'static [&'static str] = &["vertical", "horizontal", "diagonal"];

    pub fn name(&self) -> &'static str {
        Self::OPTIONS[self.code() as usize]
    }

    pub fn code(&self) -> u32 {
        match self {
            Direction::Vertical => 0,
            Direction::Horizontal => 1,
            Direction::Diagonal => 2,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "vertical" => Some(Direction::Vertical),
            "horizontal" => Some(Direction::Horizontal),
            "diagonal" => Some(Direction::Diagonal),
            _ => None,
        }
    }
}

/// Schema for one pattern kind.
#[derive(Clone, Debug, Serialize)]
pub struct PatternSchema {
    pub kind: PatternKind,
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamDef>,
}

impl PatternSchema {
    fn new(kind: PatternKind, name: &'static str, description: &'static str) -> Self {
        Self {
            kind,
            id: kind.id(),
            name,
            description,
            params: Vec::new(),
        }
    }

    fn param(mut self, param: ParamDef) -> Self {
        self.params.push(param);
        self
    }

    /// Look up a parameter definition by name.
    pub fn get(&self, name: &str) -> Option<&ParamDef> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Registry of pattern schemas.
pub struct PatternCatalog {
    schemas: HashMap<PatternKind, PatternSchema>,
}

impl PatternCatalog {
    /// Create a catalog with the built-in pattern kinds.
    pub fn new() -> Self {
        let mut catalog = Self {
            schemas: HashMap::new(),
        };
        catalog.register_builtin_patterns();
        catalog
    }

    /// Shared catalog used by layer validation and generation.
    pub fn builtin() -> &'static PatternCatalog {
        static CATALOG: OnceLock<PatternCatalog> = OnceLock::new();
        CATALOG.get_or_init(PatternCatalog::new)
    }

    fn register_builtin_patterns(&mut self) {
        self.register(
            PatternSchema::new(PatternKind::Brick, "Brick", "Running-bond bricks with mortar joints")
                .param(ParamDef::color("brick_color", [0.62, 0.27, 0.18])
                    .with_description("Brick face color"))
                .param(ParamDef::color("mortar_color", [0.85, 0.83, 0.78])
                    .with_description("Mortar joint color"))
                .param(ParamDef::float("brick_width", 0.25)
                    .with_range(0.02, 2.0)
                    .with_description("Brick width in local units"))
                .param(ParamDef::float("brick_height", 0.1)
                    .with_range(0.01, 1.0)
                    .with_description("Brick height in local units"))
                .param(ParamDef::float("mortar_size", 0.015)
                    .with_range(0.0, 0.2)
                    .with_description("Mortar joint thickness"))
                .param(ParamDef::float("offset", 0.5)
                    .with_range(0.0, 1.0)
                    .with_description("Horizontal shift of every other row")),
        );

        self.register(
            PatternSchema::new(PatternKind::Checker, "Checker", "Two-color checkerboard")
                .param(ParamDef::color("color1", [1.0, 1.0, 1.0]))
                .param(ParamDef::color("color2", [0.1, 0.1, 0.1]))
                .param(ParamDef::float("scale", 4.0)
                    .with_range(0.1, 64.0)
                    .with_description("Checks per local unit")),
        );

        self.register(
            PatternSchema::new(PatternKind::Noise, "Noise", "Fractal value noise between two colors")
                .param(ParamDef::color("color1", [0.0, 0.0, 0.0]))
                .param(ParamDef::color("color2", [1.0, 1.0, 1.0]))
                .param(ParamDef::float("scale", 5.0)
                    .with_range(0.1, 64.0)
                    .with_description("Base noise frequency"))
                .param(ParamDef::float("octaves", 3.0)
                    .with_range(1.0, MAX_NOISE_OCTAVES as f32)
                    .with_description("Number of fractal octaves")),
        );

        self.register(
            PatternSchema::new(PatternKind::Gradient, "Gradient", "Linear two-color gradient across the volume")
                .param(ParamDef::color("color1", [0.0, 0.0, 0.0]))
                .param(ParamDef::color("color2", [1.0, 1.0, 1.0]))
                .param(ParamDef::options("direction", Direction::OPTIONS, 0))
                .param(ParamDef::float("offset", 0.0)
                    .with_range(-1.0, 1.0)
                    .with_description("Shift of the gradient midpoint")),
        );

        self.register(
            PatternSchema::new(PatternKind::WoodGrain, "Wood Grain", "Concentric growth rings distorted by noise")
                .param(ParamDef::color("light_color", [0.76, 0.6, 0.42]))
                .param(ParamDef::color("dark_color", [0.48, 0.32, 0.18]))
                .param(ParamDef::float("ring_scale", 12.0)
                    .with_range(1.0, 64.0)
                    .with_description("Rings per local unit"))
                .param(ParamDef::float("turbulence", 1.0)
                    .with_range(0.0, 4.0)
                    .with_description("Noise distortion of the rings")),
        );

        self.register(
            PatternSchema::new(PatternKind::Weave, "Weave", "Over-under fabric threads over the running color")
                .param(ParamDef::color("thread_color", [0.9, 0.88, 0.8]))
                .param(ParamDef::float("scale", 10.0)
                    .with_range(1.0, 64.0)
                    .with_description("Thread crossings per local unit"))
                .param(ParamDef::float("thread_width", 0.7)
                    .with_range(0.1, 1.0)
                    .with_description("Thread width relative to its cell"))
                .param(ParamDef::float("shading", 0.35)
                    .with_range(0.0, 1.0)
                    .with_description("Darkening toward thread ends and in gaps")),
        );

        self.register(
            PatternSchema::new(PatternKind::Stripes, "Stripes", "Alternating bands")
                .param(ParamDef::color("color1", [1.0, 1.0, 1.0]))
                .param(ParamDef::color("color2", [0.0, 0.0, 0.0]))
                .param(ParamDef::options("direction", Direction::OPTIONS, 0))
                .param(ParamDef::float("scale", 8.0)
                    .with_range(0.1, 64.0)
                    .with_description("Stripe pairs per local unit"))
                .param(ParamDef::float("ratio", 0.5)
                    .with_range(0.05, 0.95)
                    .with_description("Fraction of each pair taken by color1")),
        );

        self.register(
            PatternSchema::new(PatternKind::Dots, "Dots", "Grid of round dots")
                .param(ParamDef::color("dot_color", [0.0, 0.0, 0.0]))
                .param(ParamDef::color("background_color", [1.0, 1.0, 1.0]))
                .param(ParamDef::float("scale", 8.0)
                    .with_range(0.1, 64.0)
                    .with_description("Dots per local unit"))
                .param(ParamDef::float("radius", 0.25)
                    .with_range(0.02, 0.5)
                    .with_description("Dot radius relative to its cell")),
        );
    }

    pub fn register(&mut self, schema: PatternSchema) {
        self.schemas.insert(schema.kind, schema);
    }

    pub fn get(&self, kind: PatternKind) -> Option<&PatternSchema> {
        self.schemas.get(&kind)
    }

    /// All schemas in `PatternKind` order.
    pub fn schemas(&self) -> Vec<&PatternSchema> {
        PatternKind::ALL
            .iter()
            .filter_map(|kind| self.schemas.get(kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl Default for PatternCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// A typed parameter field that can be filled from a sanitized plain value.
trait ParamField: Sized + Default {
    fn from_sanitized(value: &ParamValue) -> Option<Self>;
    fn to_value(&self) -> ParamValue;
    fn uniform_value(&self) -> UniformValue;

    fn resolve(def: Option<&ParamDef>, value: Option<&ParamValue>, issues: &mut Vec<String>) -> Self {
        let Some(def) = def else {
            return Self::default();
        };
        let sanitized = match value {
            Some(value) => {
                let (sanitized, issue) = def.sanitize(value);
                issues.extend(issue);
                sanitized
            }
            None => def.default_value.clone(),
        };
        Self::from_sanitized(&sanitized)
            .or_else(|| Self::from_sanitized(&def.default_value))
            .unwrap_or_default()
    }
}

impl ParamField for f32 {
    fn from_sanitized(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    fn to_value(&self) -> ParamValue {
        ParamValue::Scalar(*self)
    }

    fn uniform_value(&self) -> UniformValue {
        UniformValue::Float(*self)
    }
}

impl ParamField for Vec3 {
    fn from_sanitized(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Color(c) => Some(Vec3::from_array(*c)),
            _ => None,
        }
    }

    fn to_value(&self) -> ParamValue {
        ParamValue::Color(self.to_array())
    }

    fn uniform_value(&self) -> UniformValue {
        UniformValue::Vec3(self.to_array())
    }
}

impl ParamField for Direction {
    fn from_sanitized(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Choice(name) => Direction::from_name(name),
            _ => None,
        }
    }

    fn to_value(&self) -> ParamValue {
        ParamValue::Choice(self.name().to_string())
    }

    fn uniform_value(&self) -> UniformValue {
        UniformValue::Float(self.code() as f32)
    }
}

fn resolve_field<T: ParamField>(
    schema: Option<&PatternSchema>,
    name: &str,
    value: Option<ParamValue>,
    issues: &mut Vec<String>,
) -> T {
    T::resolve(schema.and_then(|s| s.get(name)), value.as_ref(), issues)
}

/// Declares a typed parameter struct whose field names match its schema.
macro_rules! pattern_params {
    ($(#[$meta:meta])* $name:ident { $($field:ident: $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $(pub $field: $ty,)*
        }

        impl $name {
            fn resolve(
                schema: Option<&PatternSchema>,
                lookup: &dyn Fn(&str) -> Option<ParamValue>,
                issues: &mut Vec<String>,
            ) -> Self {
                Self {
                    $($field: resolve_field(schema, stringify!($field), lookup(stringify!($field)), issues),)*
                }
            }

            fn get(&self, name: &str) -> Option<ParamValue> {
                $(if name == stringify!($field) {
                    return Some(self.$field.to_value());
                })*
                None
            }

            fn set(&mut self, def: &ParamDef, value: &ParamValue, issues: &mut Vec<String>) -> bool {
                $(if def.name == stringify!($field) {
                    self.$field = <$ty as ParamField>::resolve(Some(def), Some(value), issues);
                    return true;
                })*
                false
            }

            fn entries(&self) -> Vec<(&'static str, ParamValue)> {
                vec![$((stringify!($field), self.$field.to_value()),)*]
            }

            fn uniforms(&self) -> Vec<(&'static str, UniformValue)> {
                vec![$((stringify!($field), self.$field.uniform_value()),)*]
            }
        }
    };
}

pattern_params!(
    /// Parameters for [`PatternKind::Brick`].
    BrickParams {
        brick_color: Vec3,
        mortar_color: Vec3,
        brick_width: f32,
        brick_height: f32,
        mortar_size: f32,
        offset: f32,
    }
);

pattern_params!(
    /// Parameters for [`PatternKind::Checker`].
    CheckerParams {
        color1: Vec3,
        color2: Vec3,
        scale: f32,
    }
);

pattern_params!(
    /// Parameters for [`PatternKind::Noise`].
    NoiseParams {
        color1: Vec3,
        color2: Vec3,
        scale: f32,
        octaves: f32,
    }
);

pattern_params!(
    /// Parameters for [`PatternKind::Gradient`].
    GradientParams {
        color1: Vec3,
        color2: Vec3,
        direction: Direction,
        offset: f32,
    }
);

pattern_params!(
    /// Parameters for [`PatternKind::WoodGrain`].
    WoodGrainParams {
        light_color: Vec3,
        dark_color: Vec3,
        ring_scale: f32,
        turbulence: f32,
    }
);

pattern_params!(
    /// Parameters for [`PatternKind::Weave`].
    WeaveParams {
        thread_color: Vec3,
        scale: f32,
        thread_width: f32,
        shading: f32,
    }
);

pattern_params!(
    /// Parameters for [`PatternKind::Stripes`].
    StripesParams {
        color1: Vec3,
        color2: Vec3,
        direction: Direction,
        scale: f32,
        ratio: f32,
    }
);

pattern_params!(
    /// Parameters for [`PatternKind::Dots`].
    DotsParams {
        dot_color: Vec3,
        background_color: Vec3,
        scale: f32,
        radius: f32,
    }
);

/// Layer parameters, one variant per pattern kind.
///
/// `Unknown` keeps the raw values of a kind the catalog does not know so a
/// material can be stored back without loss; it never generates code.
#[derive(Clone, Debug, PartialEq)]
pub enum PatternParams {
    Brick(BrickParams),
    Checker(CheckerParams),
    Noise(NoiseParams),
    Gradient(GradientParams),
    WoodGrain(WoodGrainParams),
    Weave(WeaveParams),
    Stripes(StripesParams),
    Dots(DotsParams),
    Unknown {
        kind: String,
        params: BTreeMap<String, ParamValue>,
    },
}

/// Apply `$body` to the typed params of whichever known kind `$params` holds.
macro_rules! with_known {
    ($params:expr, $p:ident => $body:expr, unknown => $fallback:expr) => {
        match $params {
            PatternParams::Brick($p) => $body,
            PatternParams::Checker($p) => $body,
            PatternParams::Noise($p) => $body,
            PatternParams::Gradient($p) => $body,
            PatternParams::WoodGrain($p) => $body,
            PatternParams::Weave($p) => $body,
            PatternParams::Stripes($p) => $body,
            PatternParams::Dots($p) => $body,
            PatternParams::Unknown { .. } => $fallback,
        }
    };
}

impl PatternParams {
    /// Default parameters for a kind, straight from its schema.
    pub fn defaults(kind: PatternKind) -> Self {
        let mut issues = Vec::new();
        Self::resolve(kind, &|_| None, &mut issues)
    }

    /// Build typed parameters for a kind from plain values.
    ///
    /// Missing values take their default; invalid ones are clamped or
    /// defaulted and described in the returned issues.
    pub fn from_values(kind: PatternKind, values: &BTreeMap<String, ParamValue>) -> (Self, Vec<String>) {
        let mut issues = Vec::new();
        let schema = PatternCatalog::builtin().get(kind);
        for name in values.keys() {
            if !schema.is_some_and(|s| s.has_param(name)) {
                issues.push(format!("'{}' has no parameter '{}', ignored", kind.id(), name));
            }
        }
        let params = Self::resolve(kind, &|name| values.get(name).cloned(), &mut issues);
        (params, issues)
    }

    fn resolve(
        kind: PatternKind,
        lookup: &dyn Fn(&str) -> Option<ParamValue>,
        issues: &mut Vec<String>,
    ) -> Self {
        let schema = PatternCatalog::builtin().get(kind);
        match kind {
            PatternKind::Brick => PatternParams::Brick(BrickParams::resolve(schema, lookup, issues)),
            PatternKind::Checker => PatternParams::Checker(CheckerParams::resolve(schema, lookup, issues)),
            PatternKind::Noise => PatternParams::Noise(NoiseParams::resolve(schema, lookup, issues)),
            PatternKind::Gradient => PatternParams::Gradient(GradientParams::resolve(schema, lookup, issues)),
            PatternKind::WoodGrain => PatternParams::WoodGrain(WoodGrainParams::resolve(schema, lookup, issues)),
            PatternKind::Weave => PatternParams::Weave(WeaveParams::resolve(schema, lookup, issues)),
            PatternKind::Stripes => PatternParams::Stripes(StripesParams::resolve(schema, lookup, issues)),
            PatternKind::Dots => PatternParams::Dots(DotsParams::resolve(schema, lookup, issues)),
        }
    }

    /// Re-validate every field against the schema.
    pub fn sanitized(self) -> (Self, Vec<String>) {
        match self.kind() {
            Some(kind) => {
                let values: BTreeMap<String, ParamValue> = self
                    .entries()
                    .into_iter()
                    .collect();
                Self::from_values(kind, &values)
            }
            None => (self, Vec::new()),
        }
    }

    pub fn kind(&self) -> Option<PatternKind> {
        match self {
            PatternParams::Brick(_) => Some(PatternKind::Brick),
            PatternParams::Checker(_) => Some(PatternKind::Checker),
            PatternParams::Noise(_) => Some(PatternKind::Noise),
            PatternParams::Gradient(_) => Some(PatternKind::Gradient),
            PatternParams::WoodGrain(_) => Some(PatternKind::WoodGrain),
            PatternParams::Weave(_) => Some(PatternKind::Weave),
            PatternParams::Stripes(_) => Some(PatternKind::Stripes),
            PatternParams::Dots(_) => Some(PatternKind::Dots),
            PatternParams::Unknown { .. } => None,
        }
    }

    /// Kind identifier, including the raw name of an unknown kind.
    pub fn kind_id(&self) -> &str {
        match self {
            PatternParams::Unknown { kind, .. } => kind,
            known => known.kind().map(|k| k.id()).unwrap_or_default(),
        }
    }

    /// Read a parameter by name.
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        if let PatternParams::Unknown { params, .. } = self {
            return params.get(name).cloned();
        }
        with_known!(self, p => p.get(name), unknown => None)
    }

    /// Write a parameter by name, validating it against the schema.
    ///
    /// Returns the issues found; an unknown parameter name is reported and
    /// nothing is written.
    pub fn set(&mut self, name: &str, value: &ParamValue) -> Vec<String> {
        let mut issues = Vec::new();
        if let PatternParams::Unknown { params, .. } = self {
            params.insert(name.to_string(), value.clone());
            return issues;
        }
        let Some(kind) = self.kind() else {
            return issues;
        };
        let Some(def) = PatternCatalog::builtin().get(kind).and_then(|s| s.get(name)) else {
            issues.push(format!("'{}' has no parameter '{}', ignored", kind.id(), name));
            return issues;
        };
        let written = with_known!(self, p => p.set(def, value, &mut issues), unknown => false);
        if !written {
            issues.push(format!("'{}' cannot store parameter '{}'", kind.id(), name));
        }
        issues
    }

    /// All parameters as plain values, in schema order.
    pub fn entries(&self) -> Vec<(String, ParamValue)> {
        if let PatternParams::Unknown { params, .. } = self {
            return params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }
        with_known!(
            self,
            p => p.entries().into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            unknown => Vec::new()
        )
    }

    /// Uniform values keyed by parameter name.
    ///
    /// Colors become vec3 uniforms, `direction` becomes its numeric code and
    /// every other parameter a scalar. Unknown kinds have none.
    pub fn uniform_values(&self) -> Vec<(&'static str, UniformValue)> {
        with_known!(self, p => p.uniforms(), unknown => Vec::new())
    }
}
