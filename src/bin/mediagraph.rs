//! Mediagraph CLI - Command-line interface for Mediagraph
//!
//! Commands:
//! - validate: Check a detector configuration and its graph description
//! - simulate: Drive a landmark detector session on the loopback engine

use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::unbounded;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use mediagraph::engine::Calculator;
use mediagraph::packet::Payload;
use mediagraph::{
    DetectorConfig, DetectorModels, FeatureType, FrameInput, GraphError, InputType, Landmark,
    LandmarkDetector, LandmarkOutput, LoopbackEngine, OutputDecl, MEDIAGRAPH_VERSION,
};

/// Mediagraph - bounded result exchange for on-device media graphs
#[derive(Parser)]
#[command(name = "mediagraph")]
#[command(version = MEDIAGRAPH_VERSION)]
#[command(about = "Validate and simulate media graph detector sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a detector configuration (JSON) and its graph
    Validate {
        /// Config file path (use - for stdin)
        #[arg(short, long)]
        config: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a detector session against the loopback engine
    Simulate {
        /// Config file path (use - for stdin)
        #[arg(short, long)]
        config: PathBuf,

        /// Number of frames to submit
        #[arg(long, default_value = "30")]
        frames: u32,

        /// Frame width in pixels
        #[arg(long, default_value = "64")]
        width: u32,

        /// Frame height in pixels
        #[arg(long, default_value = "48")]
        height: u32,

        /// Pixel layout of the synthetic frames
        #[arg(long, default_value = "rgb")]
        input_type: PixelLayout,

        /// Features emitted per output stream and frame
        #[arg(long, default_value = "1")]
        features: usize,

        /// Simulated engine latency in milliseconds
        #[arg(long, default_value = "10")]
        latency_ms: u64,

        /// Pause between frames in milliseconds
        #[arg(long, default_value = "5")]
        interval_ms: u64,

        /// Deliver results through the callback pool
        #[arg(long = "async")]
        use_async: bool,

        /// Pretty-print the JSON report
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PixelLayout {
    Rgb,
    Rgba,
    Bgr,
}

impl From<PixelLayout> for InputType {
    fn from(layout: PixelLayout) -> Self {
        match layout {
            PixelLayout::Rgb => InputType::Rgb,
            PixelLayout::Rgba => InputType::Rgba,
            PixelLayout::Bgr => InputType::Bgr,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), MediagraphCliError> {
    match cli.command {
        Commands::Validate { config, json } => cmd_validate(&config, json),

        Commands::Simulate {
            config,
            frames,
            width,
            height,
            input_type,
            features,
            latency_ms,
            interval_ms,
            use_async,
            pretty,
        } => {
            let options = SimulationOptions {
                frames,
                width,
                height,
                input_type: input_type.into(),
                features,
                latency: Duration::from_millis(latency_ms),
                interval: Duration::from_millis(interval_ms),
                use_async,
            };
            cmd_simulate(&config, &options, pretty)
        }
    }
}

fn read_input(path: &Path) -> Result<String, MediagraphCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn cmd_validate(path: &Path, json: bool) -> Result<(), MediagraphCliError> {
    let config = DetectorConfig::from_json(&read_input(path)?)?;

    let mut errors = Vec::new();
    let graph = match config.validate() {
        Ok(graph) => Some(graph),
        Err(e) => {
            errors.push(e.to_string());
            None
        }
    };

    let mut outputs = Vec::new();
    let mut input_stream = None;
    if let Some(graph) = &graph {
        match config.resolve_input_stream(graph) {
            Ok(stream) => input_stream = Some(stream),
            Err(e) => errors.push(e.to_string()),
        }
        for decl in &config.outputs {
            let observable = graph.is_observable(&decl.stream);
            if !observable {
                errors.push(format!("graph does not produce stream '{}'", decl.stream));
            }
            outputs.push(OutputReport {
                stream: decl.stream.clone(),
                feature_type: decl.feature_type,
                observable,
            });
        }
    }

    let report = ValidationReport {
        valid: errors.is_empty(),
        input_stream,
        input_streams: graph.as_ref().map(|g| g.input_streams.clone()).unwrap_or_default(),
        side_packets: graph.as_ref().map(|g| g.input_side_packets.clone()).unwrap_or_default(),
        nodes: graph.as_ref().map(|g| g.node_count).unwrap_or_default(),
        outputs,
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Input stream:  {}", report.input_stream.as_deref().unwrap_or("-"));
        println!("Side packets:  {}", report.side_packets.join(", "));
        println!("Graph nodes:   {}", report.nodes);
        println!("Outputs:");
        for output in &report.outputs {
            println!(
                "  - {} ({:?}){}",
                output.stream,
                output.feature_type,
                if output.observable { "" } else { " [not produced]" }
            );
        }

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - {}", err);
            }
        }
    }

    if report.valid {
        Ok(())
    } else {
        Err(MediagraphCliError::ValidationFailed(report.errors.len()))
    }
}

struct SimulationOptions {
    frames: u32,
    width: u32,
    height: u32,
    input_type: InputType,
    features: usize,
    latency: Duration,
    interval: Duration,
    use_async: bool,
}

/// Emits `features` landmark sets on every declared output for each frame
fn synthetic_calculator(outputs: &[OutputDecl], features: usize) -> Calculator {
    let outputs = outputs.to_vec();
    Calculator::new(move |_, packet| {
        let Payload::Image(frame) = packet.payload() else {
            return Vec::new();
        };
        let phase = (packet.timestamp().micros() % 1_000_000) as f32 / 1_000_000.0;
        outputs
            .iter()
            .map(|decl| {
                let feature: Vec<Landmark> = (0..decl.feature_type.landmark_count())
                    .map(|i| {
                        let t = i as f32 / decl.feature_type.landmark_count() as f32;
                        Landmark::new(t, phase, 0.0, 1.0)
                    })
                    .collect();
                log::debug!("Frame {}x{} -> '{}'", frame.width(), frame.height(), decl.stream);
                (decl.stream.clone(), Payload::LandmarkLists(vec![feature; features]))
            })
            .collect()
    })
}

fn synthetic_frame(options: &SimulationOptions, index: u32) -> Vec<u8> {
    let len = options.width as usize * options.height as usize * options.input_type.channels();
    (0..len).map(|i| (i as u32).wrapping_add(index) as u8).collect()
}

fn cmd_simulate(path: &Path, options: &SimulationOptions, pretty: bool) -> Result<(), MediagraphCliError> {
    if options.frames == 0 {
        return Err(MediagraphCliError::NoFrames);
    }
    let config = DetectorConfig::from_json(&read_input(path)?)?;
    let outputs = config.outputs.clone();

    let engine = LoopbackEngine::threaded(synthetic_calculator(&outputs, options.features), options.latency);
    let models = DetectorModels::new(b"simulated-detection".to_vec(), b"simulated-landmark".to_vec())
        .with_hand_models(b"simulated-hand".to_vec(), b"simulated-hand-recrop".to_vec());
    let mut detector = LandmarkDetector::create(Box::new(engine), config.clone(), models)?;

    let started = Instant::now();
    let (tx, rx) = unbounded::<LandmarkOutput>();
    let mut results: Vec<LandmarkOutput> = Vec::new();
    let mut frame_errors = 0u32;

    for index in 0..options.frames {
        let pixels = synthetic_frame(options, index);
        let frame = FrameInput::new(&pixels, options.width, options.height, options.input_type);

        let submitted = if options.use_async {
            let tx = tx.clone();
            detector.process_with(&frame, move |output| {
                let _ = tx.send(output);
            })
        } else {
            detector.process(&frame).map(|output| results.push(output))
        };
        if let Err(e) = submitted {
            log::warn!("Frame {} failed: {}", index, e);
            frame_errors += 1;
        }

        if !options.interval.is_zero() {
            thread::sleep(options.interval);
        }
    }

    let dropped_callbacks = detector.dropped_callbacks();
    detector.dispose();
    drop(tx);
    results.extend(rx.try_iter());

    let mut totals = vec![0u64; outputs.len()];
    for output in &results {
        for (total, count) in totals.iter_mut().zip(&output.counts) {
            *total += u64::from(*count);
        }
    }

    let report = SimulationReport {
        generated_at: chrono::Utc::now(),
        version: MEDIAGRAPH_VERSION.to_string(),
        strategy: config.buffer.strategy.as_str().to_string(),
        capacity: config.buffer.capacity,
        frames_submitted: options.frames,
        frame_errors,
        results_collected: results.len(),
        results_with_landmarks: results.iter().filter(|r| !r.is_empty()).count(),
        dropped_callbacks,
        elapsed_ms: started.elapsed().as_millis() as u64,
        outputs: outputs
            .iter()
            .zip(totals)
            .map(|(decl, total_features)| OutputTotals {
                stream: decl.stream.clone(),
                feature_type: decl.feature_type,
                total_features,
            })
            .collect(),
    };

    let rendered = if pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", rendered);
    Ok(())
}

// Error handling

enum MediagraphCliError {
    Io(io::Error),
    Graph(GraphError),
    Json(serde_json::Error),
    ValidationFailed(usize),
    NoFrames,
}

impl From<io::Error> for MediagraphCliError {
    fn from(e: io::Error) -> Self {
        MediagraphCliError::Io(e)
    }
}

impl From<GraphError> for MediagraphCliError {
    fn from(e: GraphError) -> Self {
        MediagraphCliError::Graph(e)
    }
}

impl From<serde_json::Error> for MediagraphCliError {
    fn from(e: serde_json::Error) -> Self {
        MediagraphCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<MediagraphCliError> for CliError {
    fn from(e: MediagraphCliError) -> Self {
        match e {
            MediagraphCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            MediagraphCliError::Graph(e) if e.is_construction_failure() => CliError {
                code: "SESSION_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'mediagraph validate' for details".to_string()),
            },
            MediagraphCliError::Graph(e) => CliError {
                code: "GRAPH_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            MediagraphCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            MediagraphCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} configuration problems found", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            MediagraphCliError::NoFrames => CliError {
                code: "NO_FRAMES".to_string(),
                message: "Nothing to simulate".to_string(),
                hint: Some("Pass --frames with a value above 0".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    valid: bool,
    input_stream: Option<String>,
    input_streams: Vec<String>,
    side_packets: Vec<String>,
    nodes: usize,
    outputs: Vec<OutputReport>,
    errors: Vec<String>,
}

#[derive(serde::Serialize)]
struct OutputReport {
    stream: String,
    feature_type: FeatureType,
    observable: bool,
}

#[derive(serde::Serialize)]
struct SimulationReport {
    generated_at: chrono::DateTime<chrono::Utc>,
    version: String,
    strategy: String,
    capacity: usize,
    frames_submitted: u32,
    frame_errors: u32,
    results_collected: usize,
    results_with_landmarks: usize,
    dropped_callbacks: u64,
    elapsed_ms: u64,
    outputs: Vec<OutputTotals>,
}

#[derive(serde::Serialize)]
struct OutputTotals {
    stream: String,
    feature_type: FeatureType,
    total_features: u64,
}
