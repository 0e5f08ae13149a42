//! Compiled artifacts: the uniform table, the composed WGSL program and the
//! fixed-function parameter block.
//!
//! A uniform table is rebuilt from scratch on every recompile. Names are only
//! meaningful for the artifact that produced them; a [`UniformSlot`] taken from
//! one generation cannot write into the next.

use std::collections::HashMap;

use serde::Serialize;

use crate::backend::ProgramHandle;
use crate::material::BaseSurface;

/// Opaque handle to a texture owned by the rendering subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TextureHandle(pub u64);

/// Shape of a uniform in the generated program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UniformKind {
    Float,
    Vec3,
    Mat4,
    Bool,
    /// Bound separately, not part of the uniform struct.
    Texture,
}

impl UniformKind {
    /// WGSL member type, or `None` for resources bound outside the struct.
    pub fn wgsl_type(&self) -> Option<&'static str> {
        match self {
            UniformKind::Float => Some("f32"),
            UniformKind::Vec3 => Some("vec3<f32>"),
            UniformKind::Mat4 => Some("mat4x4<f32>"),
            UniformKind::Bool => Some("u32"),
            UniformKind::Texture => None,
        }
    }

    /// (alignment, size) in the uniform address space.
    fn layout(&self) -> Option<(u32, u32)> {
        match self {
            UniformKind::Float | UniformKind::Bool => Some((4, 4)),
            UniformKind::Vec3 => Some((16, 12)),
            UniformKind::Mat4 => Some((16, 64)),
            UniformKind::Texture => None,
        }
    }
}

/// Current value of a uniform.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UniformValue {
    Float(f32),
    Vec3([f32; 3]),
    Mat4([[f32; 4]; 4]),
    Bool(bool),
    Texture(Option<TextureHandle>),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Mat4(_) => UniformKind::Mat4,
            UniformValue::Bool(_) => UniformKind::Bool,
            UniformValue::Texture(_) => UniformKind::Texture,
        }
    }

    /// Get as float, returning 0.0 for other kinds.
    pub fn as_float(&self) -> f32 {
        match self {
            UniformValue::Float(v) => *v,
            _ => 0.0,
        }
    }

    /// Get as vec3, returning zeros for other kinds.
    pub fn as_vec3(&self) -> [f32; 3] {
        match self {
            UniformValue::Vec3(v) => *v,
            _ => [0.0; 3],
        }
    }

    fn write_bytes(&self, out: &mut [u8]) {
        match self {
            UniformValue::Float(v) => out.copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec3(v) => out.copy_from_slice(bytemuck::cast_slice(v)),
            UniformValue::Mat4(m) => out.copy_from_slice(bytemuck::cast_slice(m)),
            UniformValue::Bool(b) => out.copy_from_slice(bytemuck::bytes_of(&(*b as u32))),
            UniformValue::Texture(_) => {}
        }
    }
}

/// One named entry of a uniform table.
#[derive(Clone, Debug, Serialize)]
pub struct UniformEntry {
    pub name: String,
    pub value: UniformValue,
    /// Byte offset inside the uniform struct; `None` for textures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

/// Handle to a uniform that is valid only for the table generation it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformSlot {
    generation: u64,
    index: usize,
}

/// Name-keyed uniforms of one compiled program, laid out as a WGSL struct.
#[derive(Clone, Debug, Serialize)]
pub struct UniformTable {
    generation: u64,
    entries: Vec<UniformEntry>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    size: u32,
}

const STRUCT_ALIGNMENT: u32 = 16;

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

impl UniformTable {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            entries: Vec::new(),
            index: HashMap::new(),
            size: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Append a uniform. Names are unique: a duplicate is refused.
    pub fn push(&mut self, name: impl Into<String>, value: UniformValue) -> bool {
        let name = name.into();
        if self.index.contains_key(&name) {
            log::error!("Duplicate uniform name '{}' refused", name);
            return false;
        }
        let offset = value.kind().layout().map(|(align, size)| {
            let offset = align_to(self.size, align);
            self.size = offset + size;
            offset
        });
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(UniformEntry { name, value, offset });
        true
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.index.get(name).map(|&i| &self.entries[i].value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Overwrite a uniform in place. The kind must match the declared one.
    pub fn set(&mut self, name: &str, value: UniformValue) -> bool {
        match self.index.get(name) {
            Some(&i) => self.write_index(i, value),
            None => false,
        }
    }

    /// Resolve a name to a slot bound to this table's generation.
    pub fn slot(&self, name: &str) -> Option<UniformSlot> {
        self.index.get(name).map(|&index| UniformSlot {
            generation: self.generation,
            index,
        })
    }

    /// Write through a slot. Slots from another generation are rejected.
    pub fn write(&mut self, slot: UniformSlot, value: UniformValue) -> bool {
        if slot.generation != self.generation {
            log::warn!(
                "Stale uniform slot from generation {} used on generation {}",
                slot.generation,
                self.generation
            );
            return false;
        }
        self.write_index(slot.index, value)
    }

    fn write_index(&mut self, index: usize, value: UniformValue) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        if entry.value.kind() != value.kind() {
            log::warn!(
                "Uniform '{}' is {:?}, refusing {:?} value",
                entry.name,
                entry.value.kind(),
                value.kind()
            );
            return false;
        }
        entry.value = value;
        true
    }

    pub fn entries(&self) -> &[UniformEntry] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Size of the packed uniform struct in bytes.
    pub fn byte_size(&self) -> u32 {
        align_to(self.size.max(1), STRUCT_ALIGNMENT)
    }

    /// Pack all struct members for upload, honoring WGSL uniform layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; self.byte_size() as usize];
        for entry in &self.entries {
            if let (Some(offset), Some((_, size))) = (entry.offset, entry.value.kind().layout()) {
                let start = offset as usize;
                entry.value.write_bytes(&mut data[start..start + size as usize]);
            }
        }
        data
    }

    /// WGSL struct declaration with one member per non-texture entry.
    pub fn wgsl_struct(&self, struct_name: &str) -> String {
        let mut out = format!("struct {} {{\n", struct_name);
        for entry in &self.entries {
            if let Some(ty) = entry.value.kind().wgsl_type() {
                out.push_str(&format!("    {}: {},\n", entry.name, ty));
            }
        }
        out.push_str("};\n");
        out
    }
}

/// Entry point of the generated vertex stage.
pub const VERTEX_ENTRY: &str = "vs_main";
/// Entry point of the generated fragment stage.
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Generated source for both stages.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ProgramSource {
    pub vertex: String,
    pub fragment: String,
}

/// A layered program produced by the composer.
#[derive(Clone, Debug, Serialize)]
pub struct ComposedProgram {
    pub source: ProgramSource,
    pub uniforms: UniformTable,
    /// Number of layers that contributed a pattern function.
    pub layer_count: usize,
    #[serde(skip)]
    pub handle: Option<ProgramHandle>,
}

impl ComposedProgram {
    pub fn generation(&self) -> u64 {
        self.uniforms.generation()
    }

    pub fn opacity(&self) -> f32 {
        self.uniforms.get("opacity").map(|v| v.as_float()).unwrap_or(1.0)
    }
}

/// Parameter block for the fixed-function path: only the base surface.
#[derive(Clone, Debug, PartialEq)]
pub struct FixedFunctionParams {
    pub surface: BaseSurface,
    /// Set when this block stands in for a program the backend rejected.
    pub fallback: bool,
}

impl FixedFunctionParams {
    pub fn new(surface: BaseSurface) -> Self {
        Self {
            surface,
            fallback: false,
        }
    }

    pub fn fallback(surface: BaseSurface) -> Self {
        Self {
            surface,
            fallback: true,
        }
    }
}

/// The one live compiled artifact of a material instance.
#[derive(Clone, Debug)]
pub enum Artifact {
    Program(ComposedProgram),
    FixedFunction(FixedFunctionParams),
}

impl Artifact {
    pub fn program(&self) -> Option<&ComposedProgram> {
        match self {
            Artifact::Program(p) => Some(p),
            Artifact::FixedFunction(_) => None,
        }
    }

    pub fn program_mut(&mut self) -> Option<&mut ComposedProgram> {
        match self {
            Artifact::Program(p) => Some(p),
            Artifact::FixedFunction(_) => None,
        }
    }

    pub fn fixed_function(&self) -> Option<&FixedFunctionParams> {
        match self {
            Artifact::FixedFunction(f) => Some(f),
            Artifact::Program(_) => None,
        }
    }

    pub fn is_fixed_function(&self) -> bool {
        matches!(self, Artifact::FixedFunction(_))
    }

    pub fn handle(&self) -> Option<ProgramHandle> {
        self.program().and_then(|p| p.handle)
    }

    pub fn opacity(&self) -> f32 {
        match self {
            Artifact::Program(p) => p.opacity(),
            Artifact::FixedFunction(f) => f.surface.opacity(),
        }
    }

    /// Opacity below one needs a transparency-aware render path.
    pub fn is_transparent(&self) -> bool {
        self.opacity() < 1.0
    }

    /// Color target blend state for drawing this artifact.
    pub fn blend_state(&self) -> wgpu::BlendState {
        if self.is_transparent() {
            wgpu::BlendState::ALPHA_BLENDING
        } else {
            wgpu::BlendState::REPLACE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_follow_wgsl_layout() {
        let mut table = UniformTable::new(0);
        table.push("base_color", UniformValue::Vec3([1.0, 0.0, 0.0]));
        table.push("roughness", UniformValue::Float(0.5));
        table.push("metalness", UniformValue::Float(0.0));
        table.push("shadow_map", UniformValue::Texture(None));
        table.push("light_space", UniformValue::Mat4([[0.0; 4]; 4]));
        table.push("shadow_enabled", UniformValue::Bool(true));

        let offsets: Vec<Option<u32>> = table.entries().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![Some(0), Some(12), Some(16), None, Some(32), Some(96)]);
        assert_eq!(table.byte_size(), 112);
    }

    #[test]
    fn test_to_bytes_packs_values() {
        let mut table = UniformTable::new(0);
        table.push("base_color", UniformValue::Vec3([0.25, 0.5, 0.75]));
        table.push("opacity", UniformValue::Float(0.5));
        table.push("flag", UniformValue::Bool(true));

        let bytes = table.to_bytes();
        assert_eq!(bytes.len(), 32);
        let floats: Vec<f32> = bytes[..16]
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();
        assert_eq!(floats, vec![0.25, 0.5, 0.75, 0.5]);
        let flag: u32 = bytemuck::pod_read_unaligned(&bytes[16..20]);
        assert_eq!(flag, 1);
    }

    #[test]
    fn test_duplicate_names_refused() {
        let mut table = UniformTable::new(0);
        assert!(table.push("opacity", UniformValue::Float(1.0)));
        assert!(!table.push("opacity", UniformValue::Float(0.5)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("opacity"), Some(&UniformValue::Float(1.0)));
    }

    #[test]
    fn test_set_rejects_kind_mismatch() {
        let mut table = UniformTable::new(0);
        table.push("roughness", UniformValue::Float(0.5));
        assert!(!table.set("roughness", UniformValue::Vec3([0.0; 3])));
        assert!(table.set("roughness", UniformValue::Float(0.2)));
        assert!(!table.set("missing", UniformValue::Float(0.2)));
    }

    #[test]
    fn test_stale_slot_rejected() {
        let mut old = UniformTable::new(1);
        old.push("opacity", UniformValue::Float(1.0));
        let slot = old.slot("opacity").unwrap();

        let mut new = UniformTable::new(2);
        new.push("opacity", UniformValue::Float(1.0));
        assert!(!new.write(slot, UniformValue::Float(0.5)));
        assert!(old.write(slot, UniformValue::Float(0.5)));
    }

    #[test]
    fn test_wgsl_struct_skips_textures() {
        let mut table = UniformTable::new(0);
        table.push("base_color", UniformValue::Vec3([1.0; 3]));
        table.push("shadow_map", UniformValue::Texture(None));
        let wgsl = table.wgsl_struct("MaterialUniforms");
        assert!(wgsl.contains("base_color: vec3<f32>,"));
        assert!(!wgsl.contains("shadow_map"));
    }

    #[test]
    fn test_fixed_function_blend_state() {
        let opaque = Artifact::FixedFunction(FixedFunctionParams::new(BaseSurface::default()));
        assert!(!opaque.is_transparent());
        assert_eq!(opaque.blend_state(), wgpu::BlendState::REPLACE);

        let glass = Artifact::FixedFunction(FixedFunctionParams::new(
            BaseSurface::default().with_opacity(0.4),
        ));
        assert!(glass.is_transparent());
        assert_eq!(glass.blend_state(), wgpu::BlendState::ALPHA_BLENDING);
    }
}
