//! Built-in screen-space effects.
//!
//! Every effect ships a WGSL body (run by the GPU backend) and a per-pixel
//! kernel with the same math (run by the CPU backend).

use serde::Serialize;

use crate::render::frame::CpuFrame;

use super::backend::{Backend, CpuKernel};
use super::error::{EffectError, ParameterError};
use super::instance::EffectInstance;
use super::param::{ParamDecl, ParamSchema, ParamType, ParamValue};
use super::program::ProgramDesc;
use super::uniform::UniformView;

pub struct EffectDef {
    pub kind: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub schema: fn() -> ParamSchema,
    pub body: &'static str,
    pub kernel: CpuKernel,
}

impl EffectDef {
    pub fn program_desc(&self) -> ProgramDesc {
        ProgramDesc {
            name: self.kind.to_string(),
            body: self.body.to_string(),
            schema: (self.schema)(),
            kernel: Some(self.kernel),
        }
    }
}

/// Catalog entry as printed by `--list-effects`.
#[derive(Serialize)]
pub struct EffectInfo {
    pub kind: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub parameters: ParamSchema,
}

pub fn catalog() -> Vec<EffectInfo> {
    EFFECTS
        .iter()
        .map(|def| EffectInfo {
            kind: def.kind,
            display_name: def.display_name,
            description: def.description,
            parameters: (def.schema)(),
        })
        .collect()
}

pub fn lookup(kind: &str) -> Option<&'static EffectDef> {
    EFFECTS.iter().find(|def| def.kind == kind)
}

/// Expand preset names into effect kinds, in order.
pub fn expand_presets(names: &[String]) -> Vec<String> {
    let mut result = Vec::new();
    for name in names {
        match name.as_str() {
            "none" => return Vec::new(),
            "retro" => {
                result.extend_from_slice(&[
                    "posterize".into(),
                    "vignette".into(),
                    "film_grain".into(),
                ]);
            }
            other => result.push(other.to_string()),
        }
    }
    result
}

/// Build an effect of `kind` with `options` (parameter name to TOML value)
/// applied over its defaults.
pub fn instantiate<B: Backend>(
    backend: &B,
    kind: &str,
    options: &toml::Table,
) -> Result<EffectInstance<B>, EffectError> {
    let def = lookup(kind).ok_or_else(|| EffectError::UnknownEffect(kind.to_string()))?;
    let mut effect = EffectInstance::create(backend, def.program_desc())?;
    for (name, raw) in options {
        let ty = declared_type(&effect, name)?;
        effect.set_parameter(name, ParamValue::from_toml(name, ty, raw)?)?;
    }
    Ok(effect)
}

/// Set a parameter from its command-line spelling.
pub fn set_from_str<B: Backend>(
    effect: &mut EffectInstance<B>,
    name: &str,
    raw: &str,
) -> Result<(), ParameterError> {
    let ty = declared_type(effect, name)?;
    effect.set_parameter(name, ParamValue::parse(name, ty, raw)?)
}

fn declared_type<B: Backend>(effect: &EffectInstance<B>, name: &str) -> Result<ParamType, ParameterError> {
    effect
        .program()
        .schema()
        .get(name)
        .map(|decl| decl.ty)
        .ok_or_else(|| ParameterError::Unknown {
            effect: effect.kind().to_string(),
            name: name.to_string(),
        })
}

static EFFECTS: &[EffectDef] = &[
    EffectDef {
        kind: "posterize",
        display_name: "Posterize",
        description: "Quantize each color channel to a fixed number of levels",
        schema: posterize_schema,
        body: POSTERIZE_WGSL,
        kernel: posterize_kernel,
    },
    EffectDef {
        kind: "invert",
        display_name: "Invert",
        description: "Invert colors with blend control",
        schema: invert_schema,
        body: INVERT_WGSL,
        kernel: invert_kernel,
    },
    EffectDef {
        kind: "vignette",
        display_name: "Vignette",
        description: "Darken the frame towards its corners",
        schema: vignette_schema,
        body: VIGNETTE_WGSL,
        kernel: vignette_kernel,
    },
    EffectDef {
        kind: "color_grading",
        display_name: "Color Grading",
        description: "Contrast, saturation and tint",
        schema: color_grading_schema,
        body: COLOR_GRADING_WGSL,
        kernel: color_grading_kernel,
    },
    EffectDef {
        kind: "chromatic_aberration",
        display_name: "Chromatic Aberration",
        description: "Radial red/blue channel split",
        schema: chromatic_aberration_schema,
        body: CHROMATIC_ABERRATION_WGSL,
        kernel: chromatic_aberration_kernel,
    },
    EffectDef {
        kind: "film_grain",
        display_name: "Film Grain",
        description: "Animated luminance noise",
        schema: film_grain_schema,
        body: FILM_GRAIN_WGSL,
        kernel: film_grain_kernel,
    },
];

// -- posterize --

fn posterize_schema() -> ParamSchema {
    ParamSchema::new(vec![ParamDecl::int("steps", 10).at_least(1.0)])
}

const POSTERIZE_WGSL: &str = r#"
@fragment
fn fs_main(vin: VertexOutput) -> @location(0) vec4<f32> {
    let color = sample_input(vin.uv);
    let levels = f32(max(fx.steps, 1));
    let top = max(levels - 1.0, 1.0);
    let bucket = min(floor(color.rgb * levels), vec3<f32>(levels - 1.0));
    let quantized = clamp(bucket / top, vec3<f32>(0.0), vec3<f32>(1.0));
    return vec4<f32>(quantized, color.a);
}
"#;

fn posterize_kernel(input: &CpuFrame, uv: [f32; 2], u: &UniformView) -> [f32; 4] {
    let c = input.sample(uv);
    let levels = u.int("steps").max(1) as f32;
    let top = (levels - 1.0).max(1.0);
    let q = |v: f32| ((v * levels).floor().min(levels - 1.0) / top).clamp(0.0, 1.0);
    [q(c[0]), q(c[1]), q(c[2]), c[3]]
}

// -- invert --

fn invert_schema() -> ParamSchema {
    ParamSchema::new(vec![ParamDecl::float("amount", 1.0).range(0.0, 1.0)])
}

const INVERT_WGSL: &str = r#"
@fragment
fn fs_main(vin: VertexOutput) -> @location(0) vec4<f32> {
    let color = sample_input(vin.uv);
    let inverted = vec3<f32>(1.0) - color.rgb;
    return vec4<f32>(mix(color.rgb, inverted, fx.amount), color.a);
}
"#;

fn invert_kernel(input: &CpuFrame, uv: [f32; 2], u: &UniformView) -> [f32; 4] {
    let c = input.sample(uv);
    let t = u.float("amount");
    let m = |v: f32| mix(v, 1.0 - v, t);
    [m(c[0]), m(c[1]), m(c[2]), c[3]]
}

// -- vignette --

fn vignette_schema() -> ParamSchema {
    ParamSchema::new(vec![ParamDecl::float("intensity", 1.0).range(0.0, 2.0)])
}

const VIGNETTE_WGSL: &str = r#"
@fragment
fn fs_main(vin: VertexOutput) -> @location(0) vec4<f32> {
    let color = sample_input(vin.uv);
    let dist = distance(vin.uv, vec2<f32>(0.5, 0.5)) * 1.4142;
    let shade = 1.0 - smoothstep(0.4, 1.2, dist) * 0.7 * fx.intensity;
    return vec4<f32>(color.rgb * shade, color.a);
}
"#;

fn vignette_kernel(input: &CpuFrame, uv: [f32; 2], u: &UniformView) -> [f32; 4] {
    let c = input.sample(uv);
    let dist = ((uv[0] - 0.5).powi(2) + (uv[1] - 0.5).powi(2)).sqrt() * 1.4142;
    let shade = 1.0 - smoothstep(0.4, 1.2, dist) * 0.7 * u.float("intensity");
    [c[0] * shade, c[1] * shade, c[2] * shade, c[3]]
}

// -- color grading --

fn color_grading_schema() -> ParamSchema {
    ParamSchema::new(vec![
        ParamDecl::float("contrast", 1.15).range(0.0, 4.0),
        ParamDecl::float("saturation", 1.1).range(0.0, 4.0),
        ParamDecl::color("tint", [1.02, 1.0, 0.98, 1.0]),
    ])
}

const COLOR_GRADING_WGSL: &str = r#"
@fragment
fn fs_main(vin: VertexOutput) -> @location(0) vec4<f32> {
    let source = sample_input(vin.uv);
    var color = (source.rgb - vec3<f32>(0.5)) * fx.contrast + vec3<f32>(0.5);
    color = color * fx.tint.rgb;
    let gray = dot(color, vec3<f32>(0.2126, 0.7152, 0.0722));
    color = mix(vec3<f32>(gray), color, fx.saturation);
    return vec4<f32>(clamp(color, vec3<f32>(0.0), vec3<f32>(1.0)), source.a);
}
"#;

fn color_grading_kernel(input: &CpuFrame, uv: [f32; 2], u: &UniformView) -> [f32; 4] {
    let c = input.sample(uv);
    let contrast = u.float("contrast");
    let saturation = u.float("saturation");
    let tint = u.vec4("tint");
    let mut rgb = [0.0f32; 3];
    for i in 0..3 {
        rgb[i] = ((c[i] - 0.5) * contrast + 0.5) * tint[i];
    }
    let gray = rgb[0] * 0.2126 + rgb[1] * 0.7152 + rgb[2] * 0.0722;
    let g = |v: f32| mix(gray, v, saturation).clamp(0.0, 1.0);
    [g(rgb[0]), g(rgb[1]), g(rgb[2]), c[3]]
}

// -- chromatic aberration --

fn chromatic_aberration_schema() -> ParamSchema {
    ParamSchema::new(vec![ParamDecl::float("strength", 1.0).range(0.0, 10.0)])
}

const CHROMATIC_ABERRATION_WGSL: &str = r#"
@fragment
fn fs_main(vin: VertexOutput) -> @location(0) vec4<f32> {
    let dir = vin.uv - vec2<f32>(0.5, 0.5);
    let offset = dir * length(dir) * 0.008 * fx.strength;
    let center = sample_input(vin.uv);
    let r = sample_input(vin.uv + offset).r;
    let b = sample_input(vin.uv - offset).b;
    return vec4<f32>(r, center.g, b, center.a);
}
"#;

fn chromatic_aberration_kernel(input: &CpuFrame, uv: [f32; 2], u: &UniformView) -> [f32; 4] {
    let dir = [uv[0] - 0.5, uv[1] - 0.5];
    let len = (dir[0] * dir[0] + dir[1] * dir[1]).sqrt();
    let k = len * 0.008 * u.float("strength");
    let offset = [dir[0] * k, dir[1] * k];
    let center = input.sample(uv);
    let r = input.sample([uv[0] + offset[0], uv[1] + offset[1]])[0];
    let b = input.sample([uv[0] - offset[0], uv[1] - offset[1]])[2];
    [r, center[1], b, center[3]]
}

// -- film grain --

fn film_grain_schema() -> ParamSchema {
    ParamSchema::new(vec![ParamDecl::float("intensity", 1.0).range(0.0, 4.0)])
}

const FILM_GRAIN_WGSL: &str = r#"
fn grain_hash(p: vec2<f32>) -> f32 {
    var p3 = fract(vec3<f32>(p.x, p.y, p.x) * 0.1031);
    p3 = p3 + vec3<f32>(dot(p3, vec3<f32>(p3.y + 33.33, p3.z + 33.33, p3.x + 33.33)));
    return fract((p3.x + p3.y) * p3.z);
}

@fragment
fn fs_main(vin: VertexOutput) -> @location(0) vec4<f32> {
    let color = sample_input(vin.uv);
    let t = select(0.0, fx.time, TIME_EXISTS);
    let noise = grain_hash(vin.uv * fx.resolution + vec2<f32>(t * 1000.0, t * 573.0));
    let grain = (noise - 0.5) * 0.08 * fx.intensity;
    return vec4<f32>(color.rgb + vec3<f32>(grain), color.a);
}
"#;

fn grain_hash(p: [f32; 2]) -> f32 {
    let mut p3 = [
        (p[0] * 0.1031).fract(),
        (p[1] * 0.1031).fract(),
        (p[0] * 0.1031).fract(),
    ];
    let d = p3[0] * (p3[1] + 33.33) + p3[1] * (p3[2] + 33.33) + p3[2] * (p3[0] + 33.33);
    for v in &mut p3 {
        *v += d;
    }
    ((p3[0] + p3[1]) * p3[2]).fract()
}

fn film_grain_kernel(input: &CpuFrame, uv: [f32; 2], u: &UniformView) -> [f32; 4] {
    let c = input.sample(uv);
    let res = u.resolution();
    let t = u.time();
    let noise = grain_hash([uv[0] * res[0] + t * 1000.0, uv[1] * res[1] + t * 573.0]);
    let grain = (noise - 0.5) * 0.08 * u.float("intensity");
    [c[0] + grain, c[1] + grain, c[2] + grain, c[3]]
}

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::cpu_backend::CpuBackend;

    #[test]
    fn every_builtin_compiles() {
        let backend = CpuBackend::new();
        for def in EFFECTS {
            let result = EffectInstance::create(&backend, def.program_desc());
            assert!(result.is_ok(), "{}: {}", def.kind, result.err().map(|e| e.to_string()).unwrap_or_default());
        }
        assert_eq!(backend.live_programs(), 0);
    }

    #[test]
    fn presets_expand_in_order() {
        let names = vec!["retro".to_string(), "invert".to_string()];
        assert_eq!(
            expand_presets(&names),
            vec!["posterize", "vignette", "film_grain", "invert"]
        );
        assert!(expand_presets(&["posterize".into(), "none".into()]).is_empty());
    }

    #[test]
    fn catalog_lists_parameters() {
        let json = serde_json::to_value(catalog()).unwrap();
        let posterize = &json[0];
        assert_eq!(posterize["kind"], "posterize");
        assert_eq!(posterize["parameters"][0]["name"], "steps");
        assert_eq!(posterize["parameters"][0]["type"], "int");
        assert_eq!(posterize["parameters"][0]["default"], 10);
    }

    #[test]
    fn instantiate_applies_options() {
        let backend = CpuBackend::new();
        let mut options = toml::Table::new();
        options.insert("steps".into(), toml::Value::Integer(4));
        let fx = instantiate(&backend, "posterize", &options).unwrap();
        assert_eq!(fx.parameter("steps"), Some(ParamValue::Int(4)));
    }

    #[test]
    fn instantiate_rejects_bad_options() {
        let backend = CpuBackend::new();
        let mut options = toml::Table::new();
        options.insert("levels".into(), toml::Value::Integer(4));
        assert!(matches!(
            instantiate(&backend, "posterize", &options),
            Err(EffectError::Parameter(ParameterError::Unknown { .. }))
        ));
        assert!(matches!(
            instantiate(&backend, "bloom", &toml::Table::new()),
            Err(EffectError::UnknownEffect(_))
        ));
        assert_eq!(backend.live_programs(), 0);
    }

    #[test]
    fn set_from_str_uses_declared_type() {
        let backend = CpuBackend::new();
        let mut fx = instantiate(&backend, "color_grading", &toml::Table::new()).unwrap();
        set_from_str(&mut fx, "tint", "1:0.5:0.25").unwrap();
        assert_eq!(fx.parameter("tint"), Some(ParamValue::Color([1.0, 0.5, 0.25, 1.0])));
        assert!(set_from_str(&mut fx, "contrast", "high").is_err());
    }

    #[test]
    fn unknown_effect_is_not_found() {
        assert!(lookup("bloom").is_none());
        assert!(lookup("posterize").is_some());
    }
}
