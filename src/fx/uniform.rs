//! Uniform block layout shared by every effect program.
//!
//! The block starts with a 16 byte header (`resolution`, `time`,
//! `delta_time`), followed by one 16 byte slot per declared parameter in
//! schema order. Every slot starts on a 16 byte boundary, which satisfies
//! WGSL uniform alignment for all supported parameter types.

use std::fmt::Write;

use super::param::{ParamSchema, ParamType, ParamValue};

pub const HEADER_WORDS: usize = 4;
pub const SLOT_WORDS: usize = 4;

/// Per-frame values written into the uniform header.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameInfo {
    pub resolution: [f32; 2],
    pub time: f32,
    pub delta_time: f32,
}

#[derive(Clone, Debug, PartialEq)]
struct Field {
    name: String,
    ty: ParamType,
    word_offset: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UniformLayout {
    fields: Vec<Field>,
}

impl UniformLayout {
    pub fn new(schema: &ParamSchema) -> Self {
        let fields = schema
            .iter()
            .enumerate()
            .map(|(i, p)| Field {
                name: p.name.clone(),
                ty: p.ty,
                word_offset: HEADER_WORDS + i * SLOT_WORDS,
            })
            .collect();
        Self { fields }
    }

    pub fn word_len(&self) -> usize {
        HEADER_WORDS + self.fields.len() * SLOT_WORDS
    }

    pub fn byte_len(&self) -> u64 {
        (self.word_len() * std::mem::size_of::<u32>()) as u64
    }

    /// Byte offset of a parameter inside the block.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.field(name).map(|f| f.word_offset * 4)
    }

    fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// WGSL declaration of `FxUniforms` matching this layout.
    pub fn wgsl_struct(&self) -> String {
        let mut out = String::from("struct FxUniforms {\n");
        out.push_str("    resolution: vec2<f32>,\n");
        out.push_str("    time: f32,\n");
        out.push_str("    delta_time: f32,\n");
        for f in &self.fields {
            let (ty, pad, pad_ty) = match f.ty {
                ParamType::Float => ("f32", 3, "f32"),
                ParamType::Int => ("i32", 3, "i32"),
                ParamType::Texture => ("u32", 3, "u32"),
                ParamType::Vec2 => ("vec2<f32>", 2, "f32"),
                ParamType::Vec3 => ("vec3<f32>", 1, "f32"),
                ParamType::Vec4 | ParamType::Color => ("vec4<f32>", 0, "f32"),
            };
            let _ = writeln!(out, "    {}: {},", f.name, ty);
            for i in 0..pad {
                let _ = writeln!(out, "    _{}_pad{}: {},", f.name, i, pad_ty);
            }
        }
        out.push_str("};\n");
        out
    }

    /// Pack header and values (in schema order) into uniform words.
    pub fn pack(&self, values: &[ParamValue], frame: &FrameInfo) -> Vec<u32> {
        let mut words = vec![0u32; self.word_len()];
        words[0] = frame.resolution[0].to_bits();
        words[1] = frame.resolution[1].to_bits();
        words[2] = frame.time.to_bits();
        words[3] = frame.delta_time.to_bits();

        for (field, value) in self.fields.iter().zip(values) {
            let slot = &mut words[field.word_offset..field.word_offset + SLOT_WORDS];
            match value {
                ParamValue::Float(v) => slot[0] = v.to_bits(),
                ParamValue::Int(v) => slot[0] = *v as u32,
                ParamValue::Texture(h) => slot[0] = h.0,
                ParamValue::Vec2(v) => write_floats(slot, v),
                ParamValue::Vec3(v) => write_floats(slot, v),
                ParamValue::Vec4(v) | ParamValue::Color(v) => write_floats(slot, v),
            }
        }
        words
    }
}

fn write_floats(slot: &mut [u32], values: &[f32]) {
    for (w, v) in slot.iter_mut().zip(values) {
        *w = v.to_bits();
    }
}

/// Read access to an uploaded uniform block, the way a shader sees it.
pub struct UniformView<'a> {
    layout: &'a UniformLayout,
    words: &'a [u32],
}

impl<'a> UniformView<'a> {
    pub fn new(layout: &'a UniformLayout, words: &'a [u32]) -> Self {
        Self { layout, words }
    }

    fn word(&self, index: usize) -> u32 {
        self.words.get(index).copied().unwrap_or(0)
    }

    pub fn resolution(&self) -> [f32; 2] {
        [f32::from_bits(self.word(0)), f32::from_bits(self.word(1))]
    }

    pub fn time(&self) -> f32 {
        f32::from_bits(self.word(2))
    }

    pub fn delta_time(&self) -> f32 {
        f32::from_bits(self.word(3))
    }

    /// Undeclared names read as zero, like an unbound uniform.
    pub fn float(&self, name: &str) -> f32 {
        self.layout
            .field(name)
            .map_or(0.0, |f| f32::from_bits(self.word(f.word_offset)))
    }

    pub fn int(&self, name: &str) -> i32 {
        self.layout.field(name).map_or(0, |f| self.word(f.word_offset) as i32)
    }

    pub fn vec4(&self, name: &str) -> [f32; 4] {
        self.layout.field(name).map_or([0.0; 4], |f| {
            let o = f.word_offset;
            [
                f32::from_bits(self.word(o)),
                f32::from_bits(self.word(o + 1)),
                f32::from_bits(self.word(o + 2)),
                f32::from_bits(self.word(o + 3)),
            ]
        })
    }
}
