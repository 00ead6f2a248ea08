//! Command-line interface for the normal pipeline.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{ClusterSpace, ConfigChange, NormalEstimationMethod};
use crate::pipeline::{FramePipeline, FrameRateCounter};
use crate::processors::normals::IntegralImageEstimator;
use crate::sensor;
use crate::visualization;
use crate::PipelineConfig;

/// Consumer poll interval when no new snapshot is waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Parser)]
#[command(name = "normal-pipeline")]
#[command(about = "Depth sensor normal estimation and normal-field clustering", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream frames from a device through the pipeline
    Run {
        /// Device id ("", "#1" or "synthetic"); overrides the config
        #[arg(short, long)]
        device: Option<String>,
        /// Normal estimation method (name or key 1-4)
        #[arg(short, long, value_parser = parse_method)]
        method: Option<NormalEstimationMethod>,
        /// Clustering radius
        #[arg(long)]
        radius: Option<f32>,
        /// Neighbors required for a core point
        #[arg(long)]
        min_neighbors: Option<usize>,
        /// Cluster over "normals" or "positions"
        #[arg(long, value_parser = parse_space)]
        space: Option<ClusterSpace>,
        /// Stop after consuming this many snapshots
        #[arg(long)]
        frames: Option<u64>,
        /// Stop after this many seconds
        #[arg(long, value_parser = parse_seconds)]
        duration: Option<Duration>,
        /// Write every consumed snapshot as a PNG into this directory
        #[arg(long)]
        render_dir: Option<PathBuf>,
        /// Output pixels per point when rendering
        #[arg(long, default_value_t = 4)]
        render_scale: u32,
        /// Do not read method keys (1-4, q) from stdin
        #[arg(long)]
        no_keys: bool,
    },

    /// List available devices
    Devices,

    /// List normal estimation methods and their keys
    Methods,
}

fn parse_method(s: &str) -> Result<NormalEstimationMethod, String> {
    let mut chars = s.chars();
    if let (Some(key), None) = (chars.next(), chars.next()) {
        if let Some(method) = NormalEstimationMethod::from_key(key) {
            return Ok(method);
        }
    }
    NormalEstimationMethod::ALL
        .iter()
        .copied()
        .find(|m| m.name().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("unknown method '{}', expected 1-4 or a method name", s))
}

fn parse_space(s: &str) -> Result<ClusterSpace, String> {
    match s.to_ascii_lowercase().as_str() {
        "normals" => Ok(ClusterSpace::Normals),
        "positions" => Ok(ClusterSpace::Positions),
        _ => Err(format!("unknown cluster space '{}', expected normals or positions", s)),
    }
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("invalid seconds '{}': {}", s, e))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid seconds '{}': {}", s, e))
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<60} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 38 {
            let head: String = value.chars().take(35).collect();
            format!("{}...", head)
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<38} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}, using defaults",
                    path.display(),
                    e
                );
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    let result = match cli.command {
        Commands::Run {
            device,
            method,
            radius,
            min_neighbors,
            space,
            frames,
            duration,
            render_dir,
            render_scale,
            no_keys,
        } => {
            let overrides = [
                method.map(ConfigChange::Method),
                radius.map(ConfigChange::ClusterRadius),
                min_neighbors.map(ConfigChange::MinNeighbors),
                space.map(ConfigChange::ClusterSpace),
            ];
            let options = RunOptions {
                device,
                frames,
                duration,
                render_dir,
                render_scale,
                keys: !no_keys,
            };
            cmd_run(config, overrides.into_iter().flatten(), options)
        }
        Commands::Devices => {
            cmd_devices();
            Ok(())
        }
        Commands::Methods => {
            cmd_methods(&config);
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

struct RunOptions {
    device: Option<String>,
    frames: Option<u64>,
    duration: Option<Duration>,
    render_dir: Option<PathBuf>,
    render_scale: u32,
    keys: bool,
}

fn cmd_run(
    mut config: PipelineConfig,
    overrides: impl Iterator<Item = ConfigChange>,
    options: RunOptions,
) -> anyhow::Result<()> {
    for change in overrides {
        config
            .apply(change)
            .with_context(|| format!("invalid command-line override {:?}", change))?;
    }
    if let Some(device) = &options.device {
        config.sensor.device_id = device.clone();
    }
    if options.render_scale == 0 {
        bail!("--render-scale must be at least 1");
    }
    if let Some(dir) = &options.render_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating render directory {}", dir.display()))?;
    }

    let start = Instant::now();

    let mut grabber = sensor::open_device(&config.sensor.device_id, &config.sensor)?;
    let pipeline = Arc::new(FramePipeline::new(
        config.clone(),
        Box::new(IntegralImageEstimator),
    )?);
    grabber.register_callback(pipeline.frame_callback());
    grabber.start()?;

    let quit = Arc::new(AtomicBool::new(false));
    if options.keys {
        spawn_key_reader(Arc::clone(&pipeline), Arc::clone(&quit))?;
        println!("Keys: 1-4 switch normal estimation method, q quits (press Enter after each)");
    }

    let spinner = create_spinner(&format!(
        "Waiting for frames from '{}'...",
        grabber.device_id()
    ));

    let handoff = pipeline.handoff();
    let mut rate = FrameRateCounter::new("visualization");
    let mut consumed = 0u64;
    let mut rendered = 0u64;
    let mut last = None;

    loop {
        if quit.load(Ordering::Acquire) {
            info!("quit requested");
            break;
        }
        if options.frames.is_some_and(|n| consumed >= n) {
            break;
        }
        if options.duration.is_some_and(|d| start.elapsed() >= d) {
            break;
        }
        if !grabber.is_running() && !handoff.has_pending() {
            warn!("device '{}' stopped delivering frames", grabber.device_id());
            break;
        }

        let Some(snapshot) = handoff.take_latest() else {
            thread::sleep(POLL_INTERVAL);
            continue;
        };

        consumed += 1;
        rate.tick();
        spinner.set_message(format!(
            "frame {} | {} | {} clusters | {} noise | {:.1} ms",
            snapshot.sequence,
            snapshot.method,
            snapshot.num_clusters(),
            snapshot.labeling.noise_count(),
            snapshot.processing_time.as_secs_f64() * 1000.0
        ));

        if let Some(dir) = &options.render_dir {
            if render_frame(dir, &snapshot, options.render_scale) {
                rendered += 1;
            }
        }
        last = Some(snapshot);
    }

    grabber.stop();
    pipeline.shutdown();
    spinner.finish_and_clear();

    let stats = pipeline.stats();
    let handoff_stats = handoff.stats();
    let final_config = pipeline.config();

    let mut items = vec![
        ("Device", grabber.device_id().to_string()),
        ("Method", final_config.normals.method.to_string()),
        ("Cluster space", format!("{:?}", final_config.clustering.space)),
        ("Radius", final_config.clustering.radius.to_string()),
        ("Min neighbors", final_config.clustering.min_neighbors.to_string()),
        ("Frames received", stats.received.to_string()),
        ("Frames published", stats.published.to_string()),
        ("Frames dropped", stats.dropped.to_string()),
        ("Frames superseded", stats.superseded.to_string()),
        ("Snapshots shown", consumed.to_string()),
        ("Snapshots skipped", handoff_stats.overwritten.to_string()),
    ];
    if let Some(snapshot) = &last {
        items.push(("Last clusters", snapshot.num_clusters().to_string()));
    }
    if let Some(dir) = &options.render_dir {
        items.push(("PNGs written", format!("{} in {}", rendered, dir.display())));
    }
    items.push(("Duration", format!("{:.2?}", start.elapsed())));

    print_summary("Pipeline Run Complete", &items);
    Ok(())
}

fn render_frame(dir: &Path, snapshot: &crate::core::FrameSnapshot, scale: u32) -> bool {
    let path = dir.join(format!("frame_{:06}.png", snapshot.sequence));
    match visualization::render_snapshot(&path, snapshot, scale) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to render {}: {}", path.display(), e);
            false
        }
    }
}

/// Read method keys from stdin on a detached thread.
fn spawn_key_reader(pipeline: Arc<FramePipeline>, quit: Arc<AtomicBool>) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("key-reader".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                for key in line.trim().chars() {
                    if key == 'q' || key == 'Q' {
                        quit.store(true, Ordering::Release);
                        return;
                    }
                    match NormalEstimationMethod::from_key(key) {
                        Some(method) => match pipeline.apply(ConfigChange::Method(method)) {
                            Ok(()) => println!("Normal estimation method: {}", method),
                            Err(e) => warn!("method change rejected: {}", e),
                        },
                        None => warn!("unbound key '{}'", key),
                    }
                }
            }
        })
        .context("spawning key reader thread")?;
    Ok(())
}

fn cmd_devices() {
    let devices = sensor::list_devices();
    let items: Vec<(&str, String)> = devices
        .iter()
        .map(|d| (d.id, d.description.to_string()))
        .collect();
    print_summary("Available Devices", &items);
}

fn cmd_methods(config: &PipelineConfig) {
    let keys = ["1", "2", "3", "4"];
    let items: Vec<(&str, String)> = keys
        .iter()
        .zip(NormalEstimationMethod::ALL)
        .map(|(key, method)| {
            let marker = if method == config.normals.method {
                " (active)"
            } else {
                ""
            };
            (*key, format!("{}{}", method, marker))
        })
        .collect();
    print_summary("Normal Estimation Methods", &items);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method() {
        assert_eq!(
            parse_method("1").unwrap(),
            NormalEstimationMethod::CovarianceMatrix
        );
        assert_eq!(
            parse_method("simple_3d_gradient").unwrap(),
            NormalEstimationMethod::Simple3DGradient
        );
        assert_eq!(
            parse_method("AVERAGE_DEPTH_CHANGE").unwrap(),
            NormalEstimationMethod::AverageDepthChange
        );
        assert!(parse_method("5").is_err());
        assert!(parse_method("sobel").is_err());
    }

    #[test]
    fn test_parse_space() {
        assert_eq!(parse_space("Normals").unwrap(), ClusterSpace::Normals);
        assert_eq!(parse_space("positions").unwrap(), ClusterSpace::Positions);
        assert!(parse_space("colors").is_err());
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("1.5").unwrap(), Duration::from_millis(1500));
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "normal-pipeline",
            "-vv",
            "run",
            "--method",
            "2",
            "--radius",
            "0.2",
            "--frames",
            "10",
            "--no-keys",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run {
                method,
                radius,
                frames,
                no_keys,
                ..
            } => {
                assert_eq!(method, Some(NormalEstimationMethod::Average3DGradient));
                assert_eq!(radius, Some(0.2));
                assert_eq!(frames, Some(10));
                assert!(no_keys);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cmd_run_with_synthetic_device() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.sensor.width = 32;
        config.sensor.height = 24;
        config.sensor.fps = 200.0;
        let options = RunOptions {
            device: Some("synthetic".to_string()),
            frames: Some(2),
            duration: Some(Duration::from_secs(20)),
            render_dir: Some(dir.path().to_path_buf()),
            render_scale: 1,
            keys: false,
        };
        cmd_run(
            config,
            [ConfigChange::Method(NormalEstimationMethod::CovarianceMatrix)].into_iter(),
            options,
        )
        .unwrap();
        let pngs = std::fs::read_dir(dir.path()).unwrap().count();
        assert!(pngs >= 1);
    }

    #[test]
    fn test_cmd_run_rejects_bad_override() {
        let options = RunOptions {
            device: None,
            frames: Some(1),
            duration: None,
            render_dir: None,
            render_scale: 1,
            keys: false,
        };
        let result = cmd_run(
            PipelineConfig::default(),
            [ConfigChange::ClusterRadius(-1.0)].into_iter(),
            options,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_cmd_run_unknown_device() {
        let options = RunOptions {
            device: Some("kinect-2".to_string()),
            frames: Some(1),
            duration: None,
            render_dir: None,
            render_scale: 1,
            keys: false,
        };
        assert!(cmd_run(PipelineConfig::default(), std::iter::empty(), options).is_err());
    }
}
