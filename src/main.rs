mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use cli::{BackendKind, Cli, ParamOverride};
use config::EffectConfig;
use postfx::encode::ffmpeg::{EncoderSettings, FfmpegEncoder};
use postfx::fx::{builtin, Backend, EffectChain};
use postfx::render::cpu_backend::CpuBackend;
use postfx::render::wgpu_backend::WgpuBackend;
use postfx::scene::city;
use postfx::scene::driver::SceneDriver;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    let mut config_effects = Vec::new();
    if let Some(path) = config::find_config(cli.config.as_deref()) {
        match config::load_config(&path) {
            Ok(cfg) => {
                log::info!("Loaded config from {}", path.display());
                // Config values apply only where the CLI is at its default
                if cli.width == config::default_width() { cli.width = cfg.output.width; }
                if cli.height == config::default_height() { cli.height = cfg.output.height; }
                if cli.fps == config::default_fps() { cli.fps = cfg.output.fps; }
                if cli.frames == config::default_frames() { cli.frames = cfg.output.frames; }
                if cli.crf == config::default_crf() { cli.crf = cfg.output.crf; }
                if cli.codec == config::default_codec() { cli.codec = cfg.output.codec; }
                config_effects = cfg.effects;
            }
            Err(err) if cli.config.is_some() => return Err(err),
            Err(err) => log::warn!("Ignoring config {}: {:#}", path.display(), err),
        }
    }

    if cli.list_effects {
        println!("{}", serde_json::to_string_pretty(&builtin::catalog())?);
        return Ok(());
    }

    if cli.width == 0 || cli.height == 0 {
        anyhow::bail!("Frame size must be non-zero, got {}x{}", cli.width, cli.height);
    }
    if cli.fps == 0 {
        anyhow::bail!("--fps must be at least 1");
    }

    let effects = resolve_effects(&cli.effects, config_effects);

    log::info!("postfx - city scene with post-processing");
    log::info!("Resolution: {}x{} @ {}fps", cli.width, cli.height, cli.fps);

    match cli.backend {
        BackendKind::Gpu => {
            log::info!("Initializing GPU...");
            let backend = WgpuBackend::new()?;
            log::info!("Effect passes run on {}", backend.adapter_name());
            run(&backend, &cli, &effects)
        }
        BackendKind::Cpu => run(&CpuBackend::new(), &cli, &effects),
    }
}

/// CLI names win over config entries; nothing at all means the default chain.
fn resolve_effects(cli_effects: &[String], config_effects: Vec<EffectConfig>) -> Vec<EffectConfig> {
    if !cli_effects.is_empty() {
        return builtin::expand_presets(cli_effects)
            .iter()
            .map(|kind| EffectConfig::new(kind))
            .collect();
    }
    if !config_effects.is_empty() {
        return config_effects;
    }
    config::default_effects()
}

fn build_chain<B: Backend>(
    backend: &B,
    effects: &[EffectConfig],
    overrides: &[ParamOverride],
) -> Result<EffectChain<B>> {
    let mut chain = EffectChain::new();
    for effect in effects {
        let instance = builtin::instantiate(backend, &effect.kind, &effect.options)
            .with_context(|| format!("Failed to create effect '{}'", effect.kind))?;
        chain.append(instance)?;
    }

    for o in overrides {
        let mut matched = 0;
        for id in chain.ids() {
            let Some(effect) = chain.get_mut(id) else {
                continue;
            };
            if effect.kind() == o.kind {
                builtin::set_from_str(effect, &o.name, &o.raw)
                    .with_context(|| format!("Invalid --param {}.{}", o.kind, o.name))?;
                matched += 1;
            }
        }
        if matched == 0 {
            log::warn!("--param {}.{}: no '{}' effect in the chain", o.kind, o.name, o.kind);
        }
    }
    Ok(chain)
}

fn run<B: Backend>(backend: &B, cli: &Cli, effects: &[EffectConfig]) -> Result<()> {
    let chain = build_chain(backend, effects, &cli.params)?;
    if chain.is_empty() {
        log::info!("Post-processing disabled");
    } else {
        let kinds: Vec<&str> = chain.iter().map(|e| e.kind()).collect();
        log::info!("Post-processing effects: {:?}", kinds);
    }

    let mut driver = SceneDriver::new(backend, city::build(), chain, cli.width, cli.height, cli.fps)?;

    if let Some(ref path) = cli.still {
        let frame = driver.render(backend)?;
        frame.save_png(path)?;
        log::info!("Done! Still: {}", path.display());
        return Ok(());
    }

    log::info!("Starting FFmpeg encoder...");
    let mut encoder = FfmpegEncoder::new(
        &cli.output,
        &EncoderSettings {
            width: cli.width,
            height: cli.height,
            fps: cli.fps,
            codec: &cli.codec,
            pix_fmt: &cli.pix_fmt,
            crf: cli.crf,
        },
    )?;

    let pb = ProgressBar::new(cli.frames as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames ({eta} remaining)")?
            .progress_chars("=>-"),
    );

    for frame_idx in 0..cli.frames {
        let frame = driver.tick(backend)?;
        encoder.write_frame(frame.data())?;
        pb.set_position(frame_idx as u64 + 1);
    }

    pb.finish_with_message("Rendering complete");

    log::info!("Finishing encoding...");
    encoder.finish()?;

    log::info!("Done! Output: {}", cli.output.display());
    Ok(())
}
