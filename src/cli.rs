use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

use crate::config;

#[derive(Parser, Debug)]
#[command(name = "postfx", about = "Offline city renderer with a post-processing effect chain")]
pub struct Cli {
    /// Output video file
    #[arg(short, long, default_value = "output.mp4")]
    pub output: PathBuf,

    /// Render a single frame to this PNG instead of encoding a video
    #[arg(long)]
    pub still: Option<PathBuf>,

    /// Frame width in pixels
    #[arg(long, default_value_t = config::default_width())]
    pub width: u32,

    /// Frame height in pixels
    #[arg(long, default_value_t = config::default_height())]
    pub height: u32,

    /// Frames per second
    #[arg(long, default_value_t = config::default_fps())]
    pub fps: u32,

    /// Number of frames to render
    #[arg(long, default_value_t = config::default_frames())]
    pub frames: u32,

    /// Effects in apply order (comma-separated kinds or preset names, "none" for no effects)
    #[arg(long, value_delimiter = ',')]
    pub effects: Vec<String>,

    /// Effect parameter override, e.g. posterize.steps=4 (repeatable)
    #[arg(long = "param")]
    pub params: Vec<ParamOverride>,

    /// Where effect passes run
    #[arg(long, value_enum, default_value_t = BackendKind::Gpu)]
    pub backend: BackendKind,

    /// Print the effect catalog as JSON and exit
    #[arg(long)]
    pub list_effects: bool,

    /// Config file (defaults to postfx.toml, then the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// CRF quality (0-51, lower = better)
    #[arg(long, default_value_t = config::default_crf())]
    pub crf: u32,

    /// FFmpeg video codec
    #[arg(long, default_value_t = config::default_codec())]
    pub codec: String,

    /// FFmpeg pixel format
    #[arg(long, default_value = "yuv420p")]
    pub pix_fmt: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Gpu,
    Cpu,
}

/// `kind.name=value` from the command line. The value stays raw until the
/// parameter's declared type is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamOverride {
    pub kind: String,
    pub name: String,
    pub raw: String,
}

impl FromStr for ParamOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, raw) = s
            .split_once('=')
            .ok_or_else(|| format!("expected kind.name=value, got '{}'", s))?;
        let (kind, name) = key
            .split_once('.')
            .ok_or_else(|| format!("expected kind.name before '=', got '{}'", key))?;
        let (kind, name) = (kind.trim(), name.trim());
        if kind.is_empty() || name.is_empty() {
            return Err(format!("empty effect kind or parameter name in '{}'", s));
        }
        Ok(Self {
            kind: kind.to_string(),
            name: name.to_string(),
            raw: raw.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_param_override() {
        let p: ParamOverride = "color_grading.tint=1:0.9:0.8".parse().unwrap();
        assert_eq!(p.kind, "color_grading");
        assert_eq!(p.name, "tint");
        assert_eq!(p.raw, "1:0.9:0.8");
        assert!("posterize=4".parse::<ParamOverride>().is_err());
        assert!("posterize.steps".parse::<ParamOverride>().is_err());
        assert!(".steps=4".parse::<ParamOverride>().is_err());
        assert!(" .steps=4".parse::<ParamOverride>().is_err());
        assert!("posterize. =4".parse::<ParamOverride>().is_err());
        let padded: ParamOverride = " posterize . steps =4".parse().unwrap();
        assert_eq!((padded.kind.as_str(), padded.name.as_str()), ("posterize", "steps"));
    }

    #[test]
    fn cli_accepts_effect_list_and_params() {
        let cli = Cli::try_parse_from([
            "postfx",
            "--effects",
            "retro,invert",
            "--param",
            "posterize.steps=4",
            "--backend",
            "cpu",
        ])
        .unwrap();
        assert_eq!(cli.effects, vec!["retro", "invert"]);
        assert_eq!(cli.params[0].name, "steps");
        assert_eq!(cli.backend, BackendKind::Cpu);
    }
}
