use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thisisme_core::normalizer::crop_window;
use thisisme_core::types::{FACE_HEIGHT, FACE_WIDTH};
use thisisme_core::{
    Channel, CombinationPolicy, FaceDetector, FaceLocator, FsArtifactStore, GrayFrame, LabelTable, LocatedFace,
    Recognizer, ScrfdDetector,
};

#[derive(Parser)]
#[command(name = "thisisme", about = "thisisme face identification diagnostics")]
struct Cli {
    /// Directory containing the model artifacts
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// SCRFD ONNX model (default: <model-dir>/det_10g.onnx)
    #[arg(long, global = true)]
    detector: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the dominant face in an image and print the top-5 ranking
    Predict {
        image: PathBuf,
        /// Projection dimensionality to use
        #[arg(short, long)]
        n_components: u32,
        /// Identity label file (default: <model-dir>/target_names.json)
        #[arg(long)]
        labels: Option<PathBuf>,
        /// Feature combination policy
        #[arg(long, default_value_t = CombinationPolicy::default())]
        policy: CombinationPolicy,
    },
    /// Print every detected face box, the chosen one and its crop window
    Detect { image: PathBuf },
    /// Write one feature channel of the dominant face as a 94x125 PNG
    Filter {
        image: PathBuf,
        /// Channel to render: original, histograma, sobel, canny, gabor, log, lbp, dog
        #[arg(short, long)]
        kind: Channel,
        #[arg(short, long)]
        output: PathBuf,
    },
}

impl Cli {
    fn model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(thisisme_core::default_model_dir)
    }

    fn detector(&self) -> Result<ScrfdDetector> {
        let path = self.detector.clone().unwrap_or_else(|| self.model_dir().join("det_10g.onnx"));
        Ok(ScrfdDetector::load(&path)?)
    }
}

fn load_frame(path: &Path) -> Result<GrayFrame> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(GrayFrame::decode(&bytes)?)
}

fn locate(detector: ScrfdDetector, frame: &GrayFrame) -> Result<LocatedFace> {
    match FaceLocator::new(Arc::new(detector)).locate(frame)? {
        Some(face) => Ok(face),
        None => bail!("no face detected"),
    }
}

/// Map channel values from their domain onto 0..=255 grey levels.
fn to_grey_levels(values: &[f32], (lo, hi): (f32, f32)) -> Vec<u8> {
    values
        .iter()
        .map(|&v| (((v - lo) / (hi - lo)) * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect()
}

fn channel_output(face: &LocatedFace, channel: Channel) -> (Vec<f32>, (f32, f32)) {
    match channel {
        Channel::Original => (face.face.values().to_vec(), (0.0, 1.0)),
        Channel::Filtered(kind) => (kind.apply(&face.face).values, kind.domain()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Predict {
            image,
            n_components,
            labels,
            policy,
        } => {
            let model_dir = cli.model_dir();
            let labels_path = labels.clone().unwrap_or_else(|| model_dir.join("target_names.json"));
            tracing::debug!(model_dir = %model_dir.display(), labels = %labels_path.display(), %policy, "loading recognizer");
            let recognizer = Recognizer::new(
                Arc::new(cli.detector()?),
                Arc::new(FsArtifactStore::new(&model_dir)),
                LabelTable::load(&labels_path)?,
                *policy,
            );

            let frame = load_frame(image)?;
            let recognition = recognizer.recognize(&frame, *n_components)?;
            let b = recognition.bbox;
            println!(
                "face at ({}, {}) {}x{}, n_components={}, policy={}",
                b.x, b.y, b.width, b.height, recognition.n_components, recognition.policy
            );
            for (i, entry) in recognition.ranking.iter().enumerate() {
                println!("Top {}  {:<32} {:>7.2}%", i + 1, entry.label, entry.probability * 100.0);
            }
        }
        Commands::Detect { image } => {
            let detector = cli.detector()?;
            let frame = load_frame(image)?;
            let boxes = detector.detect(&frame)?;
            println!("{} face(s) in {}x{} frame", boxes.len(), frame.width, frame.height);
            for b in &boxes {
                println!(
                    "  ({}, {}) {}x{}  confidence {:.3}  area {}",
                    b.x, b.y, b.width, b.height, b.confidence, b.area()
                );
            }
            match thisisme_core::locator::select_largest(&boxes) {
                Some(b) => {
                    let w = crop_window(&b);
                    println!("chosen: ({}, {}) {}x{}", b.x, b.y, b.width, b.height);
                    println!("crop window: x {}..{}, y {}..{}", w.x_min, w.x_max, w.y_min, w.y_max);
                }
                None => println!("no face detected"),
            }
        }
        Commands::Filter { image, kind, output } => {
            let frame = load_frame(image)?;
            let face = locate(cli.detector()?, &frame)?;
            let (values, domain) = channel_output(&face, *kind);
            let levels = to_grey_levels(&values, domain);
            let img = image::GrayImage::from_raw(FACE_WIDTH as u32, FACE_HEIGHT as u32, levels)
                .context("channel output has the wrong size")?;
            img.save(output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("wrote {kind} channel to {}", output.display());
        }
    }

    Ok(())
}
