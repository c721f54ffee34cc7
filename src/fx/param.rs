use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::error::ParameterError;

/// Declared type of an effect parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Color,
    Texture,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::Float => "float",
            ParamType::Int => "int",
            ParamType::Vec2 => "vec2",
            ParamType::Vec3 => "vec3",
            ParamType::Vec4 => "vec4",
            ParamType::Color => "color",
            ParamType::Texture => "texture",
        };
        f.write_str(name)
    }
}

/// Handle into the host's texture table. Shaders receive the raw index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TextureHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Color([f32; 4]),
    Texture(TextureHandle),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Float(_) => ParamType::Float,
            ParamValue::Int(_) => ParamType::Int,
            ParamValue::Vec2(_) => ParamType::Vec2,
            ParamValue::Vec3(_) => ParamType::Vec3,
            ParamValue::Vec4(_) => ParamType::Vec4,
            ParamValue::Color(_) => ParamType::Color,
            ParamValue::Texture(_) => ParamType::Texture,
        }
    }

    /// Scalar value used for range checks.
    fn scalar(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v as f64),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Parse a command-line value for a parameter of type `ty`.
    ///
    /// Vectors and colors are written as `x:y[:z[:w]]`; colors also accept
    /// `#rrggbb` / `#rrggbbaa`.
    pub fn parse(name: &str, ty: ParamType, raw: &str) -> Result<Self, ParameterError> {
        let unparsable = || ParameterError::Unparsable {
            name: name.to_string(),
            expected: ty,
            raw: raw.to_string(),
        };
        let raw = raw.trim();

        let components = |n: usize| -> Option<Vec<f32>> {
            let parts: Vec<f32> = raw
                .split(':')
                .map(|s| s.trim().parse::<f32>())
                .collect::<Result<_, _>>()
                .ok()?;
            (parts.len() == n).then_some(parts)
        };

        let value = match ty {
            ParamType::Float => ParamValue::Float(raw.parse().map_err(|_| unparsable())?),
            ParamType::Int => ParamValue::Int(raw.parse().map_err(|_| unparsable())?),
            ParamType::Vec2 => {
                let v = components(2).ok_or_else(unparsable)?;
                ParamValue::Vec2([v[0], v[1]])
            }
            ParamType::Vec3 => {
                let v = components(3).ok_or_else(unparsable)?;
                ParamValue::Vec3([v[0], v[1], v[2]])
            }
            ParamType::Vec4 => {
                let v = components(4).ok_or_else(unparsable)?;
                ParamValue::Vec4([v[0], v[1], v[2], v[3]])
            }
            ParamType::Color => {
                if let Some(hex) = raw.strip_prefix('#') {
                    ParamValue::Color(parse_hex_color(hex).ok_or_else(unparsable)?)
                } else if let Some(v) = components(3) {
                    ParamValue::Color([v[0], v[1], v[2], 1.0])
                } else {
                    let v = components(4).ok_or_else(unparsable)?;
                    ParamValue::Color([v[0], v[1], v[2], v[3]])
                }
            }
            ParamType::Texture => {
                ParamValue::Texture(TextureHandle(raw.parse().map_err(|_| unparsable())?))
            }
        };
        Ok(value)
    }

    /// Convert a TOML config value for a parameter of type `ty`.
    pub fn from_toml(name: &str, ty: ParamType, value: &toml::Value) -> Result<Self, ParameterError> {
        let unparsable = || ParameterError::Unparsable {
            name: name.to_string(),
            expected: ty,
            raw: value.to_string(),
        };

        let floats = |n: usize| -> Option<Vec<f32>> {
            let arr = value.as_array()?;
            if arr.len() != n {
                return None;
            }
            arr.iter()
                .map(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
                .map(|v| v.map(|f| f as f32))
                .collect()
        };

        let parsed = match ty {
            ParamType::Float => value
                .as_float()
                .or_else(|| value.as_integer().map(|i| i as f64))
                .map(|f| ParamValue::Float(f as f32)),
            ParamType::Int => value
                .as_integer()
                .and_then(|i| i32::try_from(i).ok())
                .map(ParamValue::Int),
            ParamType::Vec2 => floats(2).map(|v| ParamValue::Vec2([v[0], v[1]])),
            ParamType::Vec3 => floats(3).map(|v| ParamValue::Vec3([v[0], v[1], v[2]])),
            ParamType::Vec4 => floats(4).map(|v| ParamValue::Vec4([v[0], v[1], v[2], v[3]])),
            ParamType::Color => match value.as_str() {
                Some(s) => s.strip_prefix('#').and_then(parse_hex_color).map(ParamValue::Color),
                None => floats(4)
                    .map(|v| [v[0], v[1], v[2], v[3]])
                    .or_else(|| floats(3).map(|v| [v[0], v[1], v[2], 1.0]))
                    .map(ParamValue::Color),
            },
            ParamType::Texture => value
                .as_integer()
                .and_then(|i| u32::try_from(i).ok())
                .map(|i| ParamValue::Texture(TextureHandle(i))),
        };
        parsed.ok_or_else(unparsable)
    }
}

fn parse_hex_color(hex: &str) -> Option<[f32; 4]> {
    if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok().map(|c| c as f32 / 255.0);
    let alpha = if hex.len() == 8 { channel(6)? } else { 1.0 };
    Some([channel(0)?, channel(2)?, channel(4)?, alpha])
}

/// One declared parameter: name, type, default and optional scalar range.
#[derive(Clone, Debug, Serialize)]
pub struct ParamDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub default: ParamValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ParamDecl {
    pub fn new(name: &str, default: ParamValue) -> Self {
        Self {
            name: name.to_string(),
            ty: default.param_type(),
            default,
            min: None,
            max: None,
        }
    }

    pub fn float(name: &str, default: f32) -> Self {
        Self::new(name, ParamValue::Float(default))
    }

    pub fn int(name: &str, default: i32) -> Self {
        Self::new(name, ParamValue::Int(default))
    }

    pub fn color(name: &str, default: [f32; 4]) -> Self {
        Self::new(name, ParamValue::Color(default))
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn at_least(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    fn check(&self, value: &ParamValue) -> Result<(), ParameterError> {
        if value.param_type() != self.ty {
            return Err(ParameterError::TypeMismatch {
                name: self.name.clone(),
                expected: self.ty,
                found: value.param_type(),
            });
        }
        if let Some(v) = value.scalar() {
            let min = self.min.unwrap_or(f64::NEG_INFINITY);
            let max = self.max.unwrap_or(f64::INFINITY);
            if !(min..=max).contains(&v) {
                return Err(ParameterError::OutOfRange {
                    name: self.name.clone(),
                    value: v,
                    min,
                    max,
                });
            }
        }
        Ok(())
    }
}

/// Names claimed by the generated uniform header or by WGSL itself.
const RESERVED: &[&str] = &[
    "resolution", "time", "delta_time", "fx", "in", "out", "fn", "let", "var", "const",
    "struct", "return", "if", "else", "loop", "for", "while", "break", "continue", "true",
    "false", "switch", "case", "default", "discard", "enable", "alias", "override",
];

/// Ordered parameter declarations. Order defines the uniform layout.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct ParamSchema {
    params: Vec<ParamDecl>,
}

impl ParamSchema {
    pub fn new(params: Vec<ParamDecl>) -> Self {
        Self { params }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ParamDecl> {
        self.params.iter().find(|p| p.name == name)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamDecl> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn validate(&self) -> Result<(), String> {
        for (i, p) in self.params.iter().enumerate() {
            if !is_identifier(&p.name) {
                return Err(format!("'{}' is not a valid parameter name", p.name));
            }
            if RESERVED.contains(&p.name.as_str()) {
                return Err(format!("'{}' is a reserved name", p.name));
            }
            if self.params[..i].iter().any(|q| q.name == p.name) {
                return Err(format!("parameter '{}' is declared twice", p.name));
            }
            p.check(&p.default).map_err(|e| format!("bad default: {}", e))?;
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !name.contains("__")
}

/// Current parameter values of one effect instance.
#[derive(Clone, Debug)]
pub struct ParamStore {
    owner: String,
    schema: Arc<ParamSchema>,
    values: Vec<ParamValue>,
}

impl ParamStore {
    pub fn new(owner: &str, schema: Arc<ParamSchema>) -> Self {
        let values = schema.iter().map(|p| p.default).collect();
        Self {
            owner: owner.to_string(),
            schema,
            values,
        }
    }

    /// Checked write. On error the stored values are untouched.
    pub fn set(&mut self, name: &str, value: ParamValue) -> Result<(), ParameterError> {
        let index = self.schema.index_of(name).ok_or_else(|| ParameterError::Unknown {
            effect: self.owner.clone(),
            name: name.to_string(),
        })?;
        self.schema.params[index].check(&value)?;
        self.values[index] = value;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.schema.index_of(name).map(|i| self.values[i])
    }

    pub fn values(&self) -> &[ParamValue] {
        &self.values
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ParamValue)> {
        self.schema.iter().map(|p| p.name.as_str()).zip(self.values.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ParamStore {
        let schema = ParamSchema::new(vec![
            ParamDecl::int("steps", 10).at_least(1.0),
            ParamDecl::float("amount", 0.5).range(0.0, 1.0),
            ParamDecl::color("tint", [1.0, 1.0, 1.0, 1.0]),
        ]);
        ParamStore::new("test", Arc::new(schema))
    }

    #[test]
    fn starts_at_defaults() {
        let s = store();
        assert_eq!(s.get("steps"), Some(ParamValue::Int(10)));
        assert_eq!(s.get("amount"), Some(ParamValue::Float(0.5)));
        assert_eq!(s.get("missing"), None);
    }

    #[test]
    fn accepts_declared_name_with_matching_type() {
        let mut s = store();
        s.set("steps", ParamValue::Int(4)).unwrap();
        s.set("tint", ParamValue::Color([0.5, 0.2, 0.1, 1.0])).unwrap();
        assert_eq!(s.get("steps"), Some(ParamValue::Int(4)));
        assert_eq!(s.get("tint"), Some(ParamValue::Color([0.5, 0.2, 0.1, 1.0])));
    }

    #[test]
    fn rejects_unknown_name_without_mutation() {
        let mut s = store();
        let before = s.values().to_vec();
        let err = s.set("levels", ParamValue::Int(4)).unwrap_err();
        assert!(matches!(err, ParameterError::Unknown { .. }));
        assert_eq!(s.values(), &before[..]);
    }

    #[test]
    fn rejects_type_mismatch_without_coercion() {
        let mut s = store();
        let err = s.set("steps", ParamValue::Float(4.0)).unwrap_err();
        assert_eq!(
            err,
            ParameterError::TypeMismatch {
                name: "steps".into(),
                expected: ParamType::Int,
                found: ParamType::Float,
            }
        );
        assert_eq!(s.get("steps"), Some(ParamValue::Int(10)));
    }

    #[test]
    fn rejects_out_of_range() {
        let mut s = store();
        assert!(matches!(
            s.set("steps", ParamValue::Int(0)),
            Err(ParameterError::OutOfRange { .. })
        ));
        assert!(s.set("amount", ParamValue::Float(1.5)).is_err());
        assert_eq!(s.get("amount"), Some(ParamValue::Float(0.5)));
    }

    #[test]
    fn schema_validation_catches_bad_names() {
        let dup = ParamSchema::new(vec![ParamDecl::float("a", 0.0), ParamDecl::float("a", 1.0)]);
        assert!(dup.validate().is_err());
        let reserved = ParamSchema::new(vec![ParamDecl::float("time", 0.0)]);
        assert!(reserved.validate().is_err());
        let empty_name = ParamSchema::new(vec![ParamDecl::float("", 0.0)]);
        assert!(empty_name.validate().is_err());
        let bad_default = ParamSchema::new(vec![ParamDecl::int("steps", 0).at_least(1.0)]);
        assert!(bad_default.validate().is_err());
    }

    #[test]
    fn parses_cli_values() {
        assert_eq!(ParamValue::parse("s", ParamType::Int, "12").unwrap(), ParamValue::Int(12));
        assert_eq!(
            ParamValue::parse("c", ParamType::Color, "1:0.5:0").unwrap(),
            ParamValue::Color([1.0, 0.5, 0.0, 1.0])
        );
        assert_eq!(
            ParamValue::parse("c", ParamType::Color, "#ff0000").unwrap(),
            ParamValue::Color([1.0, 0.0, 0.0, 1.0])
        );
        assert!(ParamValue::parse("s", ParamType::Int, "0.1").is_err());
        assert!(ParamValue::parse("v", ParamType::Vec2, "1:2:3").is_err());
    }

    #[test]
    fn converts_toml_values() {
        let v: toml::Value = toml::Value::Integer(4);
        assert_eq!(ParamValue::from_toml("steps", ParamType::Int, &v).unwrap(), ParamValue::Int(4));
        assert_eq!(
            ParamValue::from_toml("amount", ParamType::Float, &v).unwrap(),
            ParamValue::Float(4.0)
        );
        let f = toml::Value::Float(0.1);
        assert!(ParamValue::from_toml("steps", ParamType::Int, &f).is_err());
    }
}
