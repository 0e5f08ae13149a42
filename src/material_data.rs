//! Plain-data representation of a material for storage and transport.
//!
//! `serialize` followed by `deserialize` reproduces the same `MaterialSpec`.
//! Deserializing foreign data never fails: invalid values are clamped or
//! defaulted and reported as diagnostics.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostic;
use crate::material::{BaseProperty, BaseSurface, BlendMode, LayerSpec, MaterialSpec, ParamValue};
use crate::pattern::{PatternKind, PatternParams};

/// Serialized base surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseSurfaceData {
    #[serde(default = "default_color")]
    pub color: [f32; 3],
    #[serde(default = "default_roughness")]
    pub roughness: f32,
    #[serde(default)]
    pub metalness: f32,
    #[serde(default)]
    pub clearcoat: f32,
    #[serde(default)]
    pub emissive_color: [f32; 3],
    #[serde(default = "default_one")]
    pub emissive_intensity: f32,
    #[serde(default = "default_one")]
    pub opacity: f32,
}

fn default_color() -> [f32; 3] {
    BaseSurface::default().color().to_array()
}

fn default_roughness() -> f32 {
    BaseSurface::default().roughness()
}

fn default_one() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_blend_mode() -> String {
    BlendMode::default().id().to_string()
}

impl Default for BaseSurfaceData {
    fn default() -> Self {
        Self::from(&BaseSurface::default())
    }
}

impl From<&BaseSurface> for BaseSurfaceData {
    fn from(base: &BaseSurface) -> Self {
        Self {
            color: base.color().to_array(),
            roughness: base.roughness(),
            metalness: base.metalness(),
            clearcoat: base.clearcoat(),
            emissive_color: base.emissive_color().to_array(),
            emissive_intensity: base.emissive_intensity(),
            opacity: base.opacity(),
        }
    }
}

impl BaseSurfaceData {
    fn value(&self, property: BaseProperty) -> ParamValue {
        match property {
            BaseProperty::Color => ParamValue::Color(self.color),
            BaseProperty::Roughness => ParamValue::Scalar(self.roughness),
            BaseProperty::Metalness => ParamValue::Scalar(self.metalness),
            BaseProperty::Clearcoat => ParamValue::Scalar(self.clearcoat),
            BaseProperty::EmissiveColor => ParamValue::Color(self.emissive_color),
            BaseProperty::EmissiveIntensity => ParamValue::Scalar(self.emissive_intensity),
            BaseProperty::Opacity => ParamValue::Scalar(self.opacity),
        }
    }
}

/// Serialized layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerData {
    /// Pattern kind id, e.g. `"brick"`.
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default = "default_blend_mode")]
    pub blend_mode: String,
    #[serde(default = "default_one")]
    pub opacity: f32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Serialized material: base surface plus ordered layers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialData {
    #[serde(default)]
    pub base: BaseSurfaceData,
    #[serde(default)]
    pub layers: Vec<LayerData>,
}

impl MaterialData {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize material")
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse material JSON")
    }
}

/// Convert a material spec to plain data.
pub fn serialize(spec: &MaterialSpec) -> MaterialData {
    MaterialData {
        base: BaseSurfaceData::from(&spec.base),
        layers: spec
            .layers
            .iter()
            .map(|layer| LayerData {
                kind: layer.kind_id().to_string(),
                params: layer.params().entries().into_iter().collect(),
                blend_mode: layer.blend_mode().id().to_string(),
                opacity: layer.layer_opacity(),
                enabled: layer.is_enabled(),
            })
            .collect(),
    }
}

/// Rebuild a material spec from plain data.
///
/// Every value passes through the same clamping and schema validation as an
/// edit. Unknown pattern kinds are kept so they survive another round trip.
pub fn deserialize(data: &MaterialData) -> (MaterialSpec, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();

    let mut base = BaseSurface::default();
    for property in BaseProperty::ALL {
        let value = data.base.value(property);
        if let Err(e) = base.set(property, &value) {
            diagnostics.push(Diagnostic::validation(None, e));
        } else if base.get(property) != value {
            diagnostics.push(Diagnostic::validation(
                None,
                format!("base '{}' adjusted to {:?}", property.uniform_name(), base.get(property)),
            ));
        }
    }

    let mut spec = MaterialSpec::new(base);
    for (index, layer_data) in data.layers.iter().enumerate() {
        let params = match PatternKind::from_id(&layer_data.kind) {
            Some(kind) => {
                let (params, issues) = PatternParams::from_values(kind, &layer_data.params);
                diagnostics.extend(
                    issues
                        .into_iter()
                        .map(|issue| Diagnostic::validation(Some(index), issue)),
                );
                params
            }
            None => {
                diagnostics.push(Diagnostic::unknown_pattern_kind(index, &layer_data.kind));
                PatternParams::Unknown {
                    kind: layer_data.kind.clone(),
                    params: layer_data.params.clone(),
                }
            }
        };

        let blend_mode = BlendMode::from_id(&layer_data.blend_mode).unwrap_or_else(|| {
            diagnostics.push(Diagnostic::unknown_blend_mode(index, &layer_data.blend_mode));
            BlendMode::Mix
        });

        let layer = LayerSpec::with_params(params)
            .blend(blend_mode)
            .opacity(layer_data.opacity)
            .enabled(layer_data.enabled);
        if layer.layer_opacity() != layer_data.opacity {
            diagnostics.push(Diagnostic::validation(
                Some(index),
                format!("opacity {} adjusted to {}", layer_data.opacity, layer.layer_opacity()),
            ));
        }
        spec.layers.push(layer);
    }

    (spec, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternKind;
    use glam::Vec3;

    #[test]
    fn test_missing_fields_use_defaults() {
        let data = MaterialData::from_json(r#"{"layers": [{"kind": "checker"}]}"#).unwrap();
        assert_eq!(data.base, BaseSurfaceData::default());
        assert_eq!(data.layers[0].blend_mode, "mix");
        assert!(data.layers[0].enabled);

        let (spec, diagnostics) = deserialize(&data);
        assert!(diagnostics.is_empty());
        assert_eq!(spec.layers[0].params(), &PatternParams::defaults(PatternKind::Checker));
    }

    #[test]
    fn test_type_alias_accepted() {
        let data = MaterialData::from_json(r#"{"layers": [{"type": "dots"}]}"#).unwrap();
        assert_eq!(data.layers[0].kind, "dots");
    }

    #[test]
    fn test_invalid_values_reported_and_fixed() {
        let json = r#"{
            "base": {"roughness": 3.0},
            "layers": [
                {"kind": "stripes", "params": {"direction": "sideways", "scale": 1000.0},
                 "blendMode": "dodge", "opacity": 2.0}
            ]
        }"#;
        let (spec, diagnostics) = deserialize(&MaterialData::from_json(json).unwrap());

        assert_eq!(spec.base.roughness(), 1.0);
        let layer = &spec.layers[0];
        assert_eq!(layer.blend_mode(), BlendMode::Mix);
        assert_eq!(layer.layer_opacity(), 1.0);
        assert_eq!(layer.params().get("direction"), Some(ParamValue::Choice("vertical".into())));
        assert_eq!(layer.params().get("scale"), Some(ParamValue::Scalar(64.0)));

        let blend_issues = diagnostics
            .iter()
            .filter(|d| d.kind == crate::diagnostics::DiagnosticKind::UnknownBlendMode)
            .count();
        assert_eq!(blend_issues, 1);
        // roughness, direction, scale, opacity
        assert_eq!(diagnostics.len(), 5);
    }

    #[test]
    fn test_unknown_kind_survives_round_trip() {
        let json = r#"{"layers": [{"kind": "marble", "params": {"veins": 3.0}}]}"#;
        let (spec, diagnostics) = deserialize(&MaterialData::from_json(json).unwrap());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(spec.layers[0].kind(), None);

        let data = serialize(&spec);
        assert_eq!(data.layers[0].kind, "marble");
        assert_eq!(data.layers[0].params.get("veins"), Some(&ParamValue::Scalar(3.0)));
    }

    #[test]
    fn test_json_round_trip() {
        let spec = MaterialSpec::new(BaseSurface::new(Vec3::new(0.1, 0.2, 0.3)).with_clearcoat(0.7))
            .layer(LayerSpec::new(PatternKind::Gradient).blend(BlendMode::Overlay).opacity(0.4))
            .layer(LayerSpec::new(PatternKind::WoodGrain).enabled(false));

        let json = serialize(&spec).to_json().unwrap();
        let (restored, diagnostics) = deserialize(&MaterialData::from_json(&json).unwrap());
        assert!(diagnostics.is_empty());
        assert_eq!(restored, spec);
    }
}
