//! Headless scene loader
//!
//! Loads one or more glTF files into a scene, streams their meshes and
//! textures on the worker pool and runs frames until every mesh group has
//! its BLAS and the TLAS covers all instances.
//!
//! Usage:
//!     rtscene [OPTIONS] <ASSET>...
//!
//! Options:
//!     -c, --config <FILE>     JSON engine config (default: built-in defaults)
//!     -f, --frames <N>        Frame limit (default: 10000)
//!     -h, --help              Show this help message

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rtscene::asset::{GltfParser, ImageTranscoder};
use rtscene::core::{EngineConfig, logging};
use rtscene::frame::FrameDriver;
use rtscene::gpu::{GpuBackend, HeadlessBackend};
use rtscene::scene::Scene;
use rtscene::streaming::{LoadDispatcher, WorkerPool};

fn print_help() {
    eprintln!("rtscene - Headless scene loader");
    eprintln!();
    eprintln!("Usage: rtscene [OPTIONS] <ASSET>...");
    eprintln!();
    eprintln!("Options:");
    eprintln!("    -c, --config <FILE>     JSON engine config (default: built-in defaults)");
    eprintln!("    -f, --frames <N>        Frame limit (default: 10000)");
    eprintln!("    -h, --help              Show this help message");
    eprintln!();
    eprintln!("Example:");
    eprintln!("    rtscene assets/sponza/Sponza.gltf");
    eprintln!("    rtscene -c scene.json -f 500 a.gltf b.glb");
}

#[derive(Debug)]
struct Args {
    config: Option<PathBuf>,
    frames: u64,
    assets: Vec<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut config = None;
    let mut frames: u64 = 10_000;
    let mut assets = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --config".to_string());
                }
                config = Some(PathBuf::from(&args[i]));
            }
            "-f" | "--frames" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --frames".to_string());
                }
                frames = args[i].parse().map_err(|_| format!("Invalid frame count: {}", args[i]))?;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            asset => assets.push(PathBuf::from(asset)),
        }
        i += 1;
    }

    if assets.is_empty() {
        return Err("Missing asset path".to_string());
    }
    Ok(Args { config, frames, assets })
}

fn run(args: Args) -> rtscene::core::Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let backend = Arc::new(HeadlessBackend::default());
    let pool = Arc::new(WorkerPool::new(&config.workers)?);
    let loads = LoadDispatcher::new(pool.clone(), Arc::new(ImageTranscoder::new()));
    let mut scene = Scene::new(config.scene.clone(), backend.clone())?;
    let parser = GltfParser::new();

    let start = Instant::now();
    for asset in &args.assets {
        let root_path = asset.parent().unwrap_or_else(|| Path::new("."));
        let Some(name) = asset.file_name().and_then(|n| n.to_str()) else {
            log::error!("Skipping {}: not a file path", asset.display());
            continue;
        };
        match scene.load_manifest(&parser, root_path, name, &loads) {
            Ok(root) => log::info!("Loaded {} as entity {}", asset.display(), root.index()),
            Err(e) => log::error!("Failed to load {}: {}", asset.display(), e),
        }
    }

    let mut driver = FrameDriver::new();
    let mut blas_built = 0;
    while driver.frame() < args.frames {
        let stats = driver.run_frame(&mut scene)?;
        blas_built += stats.blas_built;
        if pool.outstanding() == 0 && scene.is_settled() {
            break;
        }
        if stats.mesh_uploads + stats.texture_uploads + stats.blas_built == 0 {
            std::thread::yield_now();
        }
    }

    let sizes = scene.manifest().sizes();
    log::info!(
        "Settled after {} frames in {:.2}s: {} entities, {} mesh groups, {} meshes, {} materials, {} textures",
        driver.frame(),
        start.elapsed().as_secs_f64(),
        scene.entities().len(),
        sizes.mesh_groups,
        sizes.meshes,
        sizes.materials,
        sizes.textures
    );
    log::info!(
        "{} BLAS built, {} load jobs completed, {} failed, {:.1} MiB device memory",
        blas_built,
        scene.uploads().completed(),
        scene.uploads().failed(),
        backend.allocated_bytes() as f64 / (1024.0 * 1024.0)
    );
    if !scene.is_settled() {
        log::warn!("Frame limit {} reached before the scene settled", args.frames);
    }

    scene.shutdown();
    pool.wait_idle();
    backend.wait_idle();
    Ok(())
}

fn main() {
    logging::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_help();
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
