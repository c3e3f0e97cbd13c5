//! CLI driver for the real-time preprocessing pipeline.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use dotenv::dotenv;
use ndarray::{ArrayD, IxDyn};
use rtfmri_preprocess::providers::{
    IdentityRegistration, InMemoryManifestStore, StaticArtifacts, StaticGeometry,
};
use rtfmri_preprocess::{
    Frame, Pipeline, PipelineConfig, PipelineSpec, StepRegistry, Value, Volume, read_manifests,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Real-time scan preprocessing pipeline",
    long_about = "Runs a declarative preprocessing pipeline over a stream of volumes.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  RUST_LOG    Overrides --log-level\n\n\
                  EXAMPLES:\n  \
                  # Run a pipeline over recorded frames\n  \
                  rtfmri-preprocess --spec pipeline.json --geometry masks.json --frames run01.jsonl --emit gm_z\n\n  \
                  # Drive the pipeline with random volumes\n  \
                  rtfmri-preprocess --spec pipeline.json --synthetic 30 --shape 4,4,4 --emit mean,std\n\n  \
                  # List the step types the pipeline understands\n  \
                  rtfmri-preprocess --list-steps"
)]
struct Args {
    /// Pipeline specification (JSON)
    #[arg(short, long, required_unless_present = "list_steps")]
    spec: Option<PathBuf>,

    /// Geometry tables: masks, regions and reference volumes (JSON)
    #[arg(short, long)]
    geometry: Option<PathBuf>,

    /// Detrending models (JSON)
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// Frames to process, one JSON object per line
    #[arg(short, long, conflicts_with = "synthetic")]
    frames: Option<PathBuf>,

    /// Generate this many random volumes instead of reading frames
    #[arg(long)]
    synthetic: Option<usize>,

    /// Shape of synthetic volumes, comma separated
    #[arg(long, value_delimiter = ',', default_value = "4,4,4")]
    shape: Vec<usize>,

    /// Frame keys to print after each frame, comma separated
    #[arg(short, long, value_delimiter = ',')]
    emit: Vec<String>,

    /// Surface identifier added to the global parameters
    #[arg(long)]
    surface: Option<String>,

    /// Transform identifier added to the global parameters
    #[arg(long)]
    transform: Option<String>,

    /// Root directory for per-recording output
    #[arg(long, default_value = "recordings")]
    recording_root: PathBuf,

    /// Recording identifier (defaults to a timestamp)
    #[arg(long)]
    recording_id: Option<String>,

    /// Fail frames whose steps return a different number of values than
    /// they declare output keys
    #[arg(long)]
    strict: bool,

    /// Print the registered step manifests after building
    #[arg(long)]
    show_manifest: bool,

    /// List the available step types and exit
    #[arg(long)]
    list_steps: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Only show warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

/// One line of a frames file.
#[derive(Debug, Deserialize)]
struct FrameRecord {
    image_number: i64,
    volume: Volume,
    #[serde(default)]
    extra: BTreeMap<String, Value>,
}

/// Initialize the tracing subscriber for logging.
fn init_logging(level: &str, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.quiet);
    dotenv().ok();

    if args.list_steps {
        for name in StepRegistry::default().type_names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let spec_path = args
        .spec
        .as_deref()
        .ok_or_else(|| anyhow!("--spec is required"))?;
    let mut spec: PipelineSpec = read_json(spec_path)?;
    if let Some(surface) = &args.surface {
        spec.global_parameters
            .insert("surface".to_string(), surface.clone().into());
    }
    if let Some(transform) = &args.transform {
        spec.global_parameters
            .insert("transform".to_string(), transform.clone().into());
    }

    let mut config_builder = PipelineConfig::builder()
        .recording_root(&args.recording_root)
        .strict_output_arity(args.strict);
    if let Some(ref id) = args.recording_id {
        config_builder = config_builder.recording_id(id);
    }
    let config = config_builder.build()?;

    let store = Arc::new(InMemoryManifestStore::new());
    let mut builder = Pipeline::builder()
        .spec(spec)
        .config(config)
        .registration(Arc::new(IdentityRegistration))
        .manifest_store(store.clone());
    if let Some(path) = &args.geometry {
        let geometry: StaticGeometry = read_json(path)?;
        builder = builder.geometry(Arc::new(geometry));
    }
    if let Some(path) = &args.artifacts {
        let artifacts: StaticArtifacts = read_json(path)?;
        builder = builder.artifacts(Arc::new(artifacts));
    }

    let mut pipeline = builder.build().context("Failed to build pipeline")?;

    if args.show_manifest {
        for manifest in read_manifests(store.as_ref(), pipeline.id())? {
            println!("{}", serde_json::to_string(&manifest)?);
        }
    }

    let (processed, failed) = if let Some(path) = &args.frames {
        run_frames(&mut pipeline, path, &args.emit)?
    } else if let Some(count) = args.synthetic {
        run_synthetic(&mut pipeline, count, &args.shape, &args.emit)?
    } else {
        warn!("No frames given; use --frames or --synthetic");
        (0, 0)
    };

    info!(
        "Done: {} frames processed, {} failed ({})",
        processed,
        failed,
        pipeline.key()
    );
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn run_frames(pipeline: &mut Pipeline, path: &Path, emit: &[String]) -> Result<(usize, usize)> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut processed = 0;
    let mut failed = 0;

    for (line_number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: FrameRecord = serde_json::from_str(&line)
            .with_context(|| format!("Invalid frame on line {}", line_number + 1))?;

        let mut frame = Frame::new(record.image_number).with("volume", record.volume);
        for (key, value) in record.extra {
            frame.insert(key, value);
        }

        if handle_frame(pipeline, frame, emit)? {
            processed += 1;
        } else {
            failed += 1;
        }
    }
    Ok((processed, failed))
}

fn run_synthetic(
    pipeline: &mut Pipeline,
    count: usize,
    shape: &[usize],
    emit: &[String],
) -> Result<(usize, usize)> {
    let voxels: usize = shape.iter().product();
    info!("Generating {} synthetic volumes of shape {:?}", count, shape);

    let mut processed = 0;
    let mut failed = 0;
    for image_number in 0..count {
        let data: Vec<f64> = (0..voxels).map(|_| rand::random::<f64>()).collect();
        let volume = Volume::identity(ArrayD::from_shape_vec(IxDyn(shape), data)?);
        let frame = Frame::new(image_number as i64).with("volume", volume);

        if handle_frame(pipeline, frame, emit)? {
            processed += 1;
        } else {
            failed += 1;
        }
    }
    Ok((processed, failed))
}

/// Run one frame; frame errors are logged and the stream continues.
fn handle_frame(pipeline: &mut Pipeline, frame: Frame, emit: &[String]) -> Result<bool> {
    let image_number = frame.image_number();
    match pipeline.process(frame) {
        Ok(frame) => {
            debug!("Frame {:?} produced keys {:?}", image_number, frame.keys().collect::<Vec<_>>());
            if !emit.is_empty() {
                let selected: BTreeMap<&str, &Value> = emit
                    .iter()
                    .filter_map(|key| frame.get(key).map(|value| (key.as_str(), value)))
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({ "image_number": image_number, "values": selected })
                );
            }
            Ok(true)
        }
        Err(e) if e.is_frame_error() => {
            error!("[{}] {}", e.error_code(), e);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
