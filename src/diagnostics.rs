//! Structured material diagnostics.
//!
//! Data-shape problems never fail an operation. They are corrected with a
//! deterministic fallback and reported as JSON-serializable diagnostics that
//! an editor can surface without reading logs.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Parameter out of range, wrong shape, not a valid option, or not in the schema.
    ValidationError,
    /// Layer kind missing from the catalog; the layer is skipped when composing.
    UnknownPatternKind,
    /// Blend mode name not recognised; Mix is used instead.
    UnknownBlendMode,
    /// The backend rejected the generated program; the base surface is used.
    CompileTargetUnavailable,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Index of the layer in the material's layer list, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    pub fn validation(layer: Option<usize>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::ValidationError, layer, message.into())
    }

    pub fn unknown_pattern_kind(layer: usize, kind: &str) -> Self {
        Self::new(
            DiagnosticKind::UnknownPatternKind,
            Some(layer),
            format!("Unknown pattern kind '{}', layer skipped", kind),
        )
    }

    pub fn unknown_blend_mode(layer: usize, mode: &str) -> Self {
        Self::new(
            DiagnosticKind::UnknownBlendMode,
            Some(layer),
            format!("Unknown blend mode '{}', using mix", mode),
        )
    }

    pub fn compile_rejected(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::CompileTargetUnavailable, None, message.into())
    }

    fn new(kind: DiagnosticKind, layer: Option<usize>, message: String) -> Self {
        match layer {
            Some(i) => log::warn!("Layer {}: {}", i, message),
            None => log::warn!("{}", message),
        }
        Self {
            kind,
            layer,
            message,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.layer {
            Some(i) => write!(f, "[{:?}] layer {}: {}", self.kind, i, self.message),
            None => write!(f, "[{:?}] {}", self.kind, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_snake_case_kind() {
        let diag = Diagnostic::unknown_blend_mode(2, "dodge");
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["kind"], "unknown_blend_mode");
        assert_eq!(json["layer"], 2);
    }

    #[test]
    fn test_layerless_diagnostic_omits_layer() {
        let json = serde_json::to_value(Diagnostic::validation(None, "roughness clamped")).unwrap();
        assert!(json.get("layer").is_none());
    }
}
