//! Composer configuration.
//!
//! Shading constants are baked into generated source as literals, so two
//! compiles with the same material and the same config produce the same bytes.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Shading constants and lighting fallbacks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposerConfig {
    /// Lower bound applied to the ambient term so no surface renders pure black.
    #[serde(default = "default_ambient_floor")]
    pub ambient_floor: f32,

    /// Ambient color used when the scene has no ambient light.
    #[serde(default = "default_ambient_fallback")]
    pub ambient_fallback: [f32; 3],

    /// Specular exponent at roughness 1.
    #[serde(default = "default_rough_exponent")]
    pub rough_exponent: f32,

    /// Specular exponent at roughness 0.
    #[serde(default = "default_shiny_exponent")]
    pub shiny_exponent: f32,

    /// Specular tint of non-metals.
    #[serde(default = "default_dielectric_specular")]
    pub dielectric_specular: f32,

    /// Falloff exponent of the clearcoat rim.
    #[serde(default = "default_rim_power")]
    pub rim_power: f32,

    /// Rim brightness at clearcoat 1.
    #[serde(default = "default_clearcoat_strength")]
    pub clearcoat_strength: f32,

    /// Depth bias used when a shadow descriptor does not carry one.
    #[serde(default = "default_shadow_bias")]
    pub default_shadow_bias: f32,
}

fn default_ambient_floor() -> f32 {
    0.03
}

fn default_ambient_fallback() -> [f32; 3] {
    [0.1, 0.1, 0.1]
}

fn default_rough_exponent() -> f32 {
    4.0
}

fn default_shiny_exponent() -> f32 {
    256.0
}

fn default_dielectric_specular() -> f32 {
    0.04
}

fn default_rim_power() -> f32 {
    3.0
}

fn default_clearcoat_strength() -> f32 {
    0.6
}

fn default_shadow_bias() -> f32 {
    0.005
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            ambient_floor: default_ambient_floor(),
            ambient_fallback: default_ambient_fallback(),
            rough_exponent: default_rough_exponent(),
            shiny_exponent: default_shiny_exponent(),
            dielectric_specular: default_dielectric_specular(),
            rim_power: default_rim_power(),
            clearcoat_strength: default_clearcoat_strength(),
            default_shadow_bias: default_shadow_bias(),
        }
    }
}

impl ComposerConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config.sanitized())
    }

    /// Replace non-finite or negative values with their defaults.
    ///
    /// Exponents must stay positive for `pow` in generated code.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let positive = |v: f32, d: f32| if v.is_finite() && v > 0.0 { v } else { d };
        let non_negative = |v: f32, d: f32| if v.is_finite() && v >= 0.0 { v } else { d };
        let fallback = if self.ambient_fallback.iter().all(|c| c.is_finite()) {
            self.ambient_fallback.map(|c| c.clamp(0.0, 1.0))
        } else {
            defaults.ambient_fallback
        };
        Self {
            ambient_floor: non_negative(self.ambient_floor, defaults.ambient_floor),
            ambient_fallback: fallback,
            rough_exponent: positive(self.rough_exponent, defaults.rough_exponent),
            shiny_exponent: positive(self.shiny_exponent, defaults.shiny_exponent),
            dielectric_specular: non_negative(self.dielectric_specular, defaults.dielectric_specular),
            rim_power: positive(self.rim_power, defaults.rim_power),
            clearcoat_strength: non_negative(self.clearcoat_strength, defaults.clearcoat_strength),
            default_shadow_bias: non_negative(self.default_shadow_bias, defaults.default_shadow_bias),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ComposerConfig = serde_json::from_str(r#"{"rimPower": 5.0}"#).unwrap();
        assert_eq!(config.rim_power, 5.0);
        assert_eq!(config.ambient_floor, 0.03);
        assert_eq!(config.ambient_fallback, [0.1, 0.1, 0.1]);
    }

    #[test]
    fn test_sanitized_restores_invalid_exponents() {
        let config = ComposerConfig {
            rough_exponent: 0.0,
            shiny_exponent: f32::NAN,
            ambient_floor: -1.0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.rough_exponent, 4.0);
        assert_eq!(config.shiny_exponent, 256.0);
        assert_eq!(config.ambient_floor, 0.03);
    }
}
