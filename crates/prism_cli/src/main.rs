//! Headless prism renderer.
//!
//! Loads a scene (and optionally an environment) through the same background
//! load path an interactive host uses, accumulates until the iteration cap and
//! writes the result as a PNG.
//!
//! ```text
//! prism <scene.obj> [--env sky.hdr] [--output out.png] [--iterations N]
//!       [--size WxH] [--config session.json] [--renderer path|normals]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use prism_core::FileLoader;
use prism_gpu::Extent2d;
use prism_math::{Camera, Vec3};
use prism_render::{FrameOutcome, LoadEvent, RenderSession, RendererKind, SessionConfig};

const DEFAULT_ITERATIONS: i32 = 256;
const LOAD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct Args {
    scene: PathBuf,
    environment: Option<PathBuf>,
    output: PathBuf,
    iterations: Option<i32>,
    size: Extent2d,
    config: Option<PathBuf>,
    renderer: Option<RendererKind>,
}

fn usage() -> &'static str {
    "usage: prism <scene.obj> [--env sky.hdr] [--output out.png] [--iterations N] \
     [--size WxH] [--config session.json] [--renderer path|normals]"
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut scene = None;
    let mut parsed = Args {
        scene: PathBuf::new(),
        environment: None,
        output: PathBuf::from("render.png"),
        iterations: None,
        size: Extent2d::new(640, 480),
        config: None,
        renderer: None,
    };

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| args.next().ok_or_else(|| anyhow!("{flag} needs a value"));
        match arg.as_str() {
            "--env" => parsed.environment = Some(value("--env")?.into()),
            "--output" | "-o" => parsed.output = value("--output")?.into(),
            "--iterations" | "-n" => {
                let n = value("--iterations")?;
                parsed.iterations = Some(n.parse().with_context(|| format!("bad iteration count '{n}'"))?);
            }
            "--size" => parsed.size = parse_size(&value("--size")?)?,
            "--config" => parsed.config = Some(value("--config")?.into()),
            "--renderer" => {
                parsed.renderer = Some(match value("--renderer")?.as_str() {
                    "path" => RendererKind::PathTracer,
                    "normals" => RendererKind::NormalPreview,
                    other => bail!("unknown renderer '{other}'"),
                })
            }
            "--help" | "-h" => bail!(usage()),
            flag if flag.starts_with('-') => bail!("unknown option '{flag}'\n{}", usage()),
            path => scene = Some(PathBuf::from(path)),
        }
    }

    parsed.scene = scene.ok_or_else(|| anyhow!(usage()))?;
    Ok(parsed)
}

fn parse_size(text: &str) -> Result<Extent2d> {
    let (w, h) = text
        .split_once('x')
        .ok_or_else(|| anyhow!("size must look like 640x480, got '{text}'"))?;
    let size = Extent2d::new(w.parse()?, h.parse()?);
    if size.is_empty() {
        bail!("size must be non-zero");
    }
    Ok(size)
}

/// Request a load and block until it is swapped in.
fn load(session: &mut RenderSession, path: &Path) -> Result<()> {
    let start = Instant::now();
    session
        .request_load(path)
        .with_context(|| format!("cannot load {}", path.display()))?;

    match session.wait_for_load(LOAD_TIMEOUT)? {
        Some(LoadEvent::Swapped(kind)) => {
            log::info!("{:?} {} ready in {:?}", kind, path.display(), start.elapsed());
            Ok(())
        }
        Some(LoadEvent::Failed(reason)) => bail!("failed to load {}: {}", path.display(), reason),
        None => bail!("timed out loading {}", path.display()),
    }
}

fn scene_camera(session: &RenderSession, aspect: f32) -> Camera {
    let mut camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, aspect);
    match session.scene().and_then(|s| s.cameras.first()) {
        Some(stored) => {
            log::info!("Using scene camera '{}'", stored.name);
            camera.position = stored.eye;
            camera.target = stored.center;
            camera.up = stored.up;
            camera.fov_y = stored.fov_y;
        }
        None => camera.fit_bounds(&session.scene_bounds()),
    }
    camera
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = parse_args(std::env::args().skip(1))?;

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig {
            max_iterations: DEFAULT_ITERATIONS,
            ..Default::default()
        },
    };
    if let Some(iterations) = args.iterations {
        config.max_iterations = iterations;
    }
    if let Some(renderer) = args.renderer {
        config.renderer = renderer;
    }

    let mut session = RenderSession::new(config, Arc::new(FileLoader::new()), args.size)?;
    load(&mut session, &args.scene)?;
    if let Some(environment) = &args.environment {
        load(&mut session, environment)?;
    }

    let camera = scene_camera(&session, args.size.aspect());
    let start = Instant::now();
    let mut frames = 0;
    loop {
        match session.frame(&camera)? {
            FrameOutcome::Rendered { frame } => {
                frames += 1;
                if frame % 32 == 0 {
                    log::info!("Frame {} ({:?})", frame, start.elapsed());
                }
            }
            FrameOutcome::Converged => break,
            FrameOutcome::Busy => std::thread::sleep(Duration::from_millis(5)),
        }
    }
    log::info!("Accumulated {} frames in {:?}", frames, start.elapsed());

    let size = session.output_size();
    let pixels = image::RgbaImage::from_raw(size.width, size.height, session.output_rgba8())
        .ok_or_else(|| anyhow!("output buffer does not match {}x{}", size.width, size.height))?;
    pixels
        .save(&args.output)
        .with_context(|| format!("cannot write {}", args.output.display()))?;
    log::info!("Saved {}", args.output.display());

    session.shutdown()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["scene.obj", "--env", "sky.hdr", "-n", "16", "--size", "32x24"]).unwrap();
        assert_eq!(parsed.scene, PathBuf::from("scene.obj"));
        assert_eq!(parsed.environment, Some(PathBuf::from("sky.hdr")));
        assert_eq!(parsed.iterations, Some(16));
        assert_eq!(parsed.size, Extent2d::new(32, 24));
        assert_eq!(parsed.output, PathBuf::from("render.png"));
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(args(&[]).is_err());
        assert!(args(&["scene.obj", "--size", "32"]).is_err());
        assert!(args(&["scene.obj", "--renderer", "raster"]).is_err());
        assert!(args(&["scene.obj", "--iterations"]).is_err());
    }
}
