//! trainscan CLI — runs the train detector over a directory of frames.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use image::codecs::gif::{GifEncoder, Repeat};
use trainscan::{Config, Train, TrainDetector};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "trainscan")]
#[command(about = "Detect, measure and stitch passing trains from a directory of camera frames")]
#[command(version)]
struct Cli {
    /// Directory with frame images (png/jpeg), processed in
    /// lexicographic order.
    #[arg(long)]
    frames: PathBuf,

    /// Output directory for stitched trains.
    #[arg(long)]
    out: PathBuf,

    /// Frame rate the images were captured at.
    #[arg(long, default_value = "30.0")]
    fps: f64,

    /// Pixels per meter at the track distance.
    #[arg(long, default_value = "45.0")]
    px_per_m: f64,

    /// Minimum plausible train speed, km/h.
    #[arg(long, default_value = "25.0")]
    min_speed_kph: f64,

    /// Maximum plausible train speed, km/h.
    #[arg(long, default_value = "160.0")]
    max_speed_kph: f64,

    /// Minimum train length, m.
    #[arg(long, default_value = "5.0")]
    min_len_m: f64,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    run(&cli)
}

fn run(cli: &Cli) -> CliResult<()> {
    let config = Config {
        pixels_per_m: cli.px_per_m,
        min_speed_kph: cli.min_speed_kph,
        max_speed_kph: cli.max_speed_kph,
        min_length_m: cli.min_len_m,
    };
    let mut detector = TrainDetector::new(config)?;

    let mut paths: Vec<PathBuf> = fs::read_dir(&cli.frames)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("png" | "jpg" | "jpeg")
            )
        })
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(format!("no frame images found in {}", cli.frames.display()).into());
    }

    tracing::info!(frames = paths.len(), fps = cli.fps, "processing frames");
    fs::create_dir_all(&cli.out)?;

    let mut n_trains = 0usize;
    for (i, path) in paths.iter().enumerate() {
        let frame = image::open(path)?.into_rgba8();
        if let Some(train) = detector.frame(frame, i as f64 / cli.fps) {
            write_train(&cli.out, n_trains, &train)?;
            n_trains += 1;
        }
    }
    if let Some(train) = detector.finalize() {
        write_train(&cli.out, n_trains, &train)?;
        n_trains += 1;
    }

    println!(
        "{} frames processed, {} trains detected",
        paths.len(),
        n_trains
    );
    Ok(())
}

fn write_train(out: &Path, index: usize, train: &Train) -> CliResult<()> {
    let stem = out.join(format!("train_{:03}", index));

    train.image.save(stem.with_extension("png"))?;

    let json = fs::File::create(stem.with_extension("json"))?;
    serde_json::to_writer_pretty(json, train)?;

    let gif = fs::File::create(stem.with_extension("gif"))?;
    let mut encoder = GifEncoder::new(gif);
    encoder.set_repeat(Repeat::Infinite)?;
    encoder.encode_frames(train.preview.iter().cloned())?;

    println!(
        "train {:03}: {:.1} m long, {:.1} km/h, {:+.2} m/s^2, heading {}",
        index,
        train.length_m(),
        train.speed_km_h(),
        train.accel_m_s2(),
        train.direction()
    );
    Ok(())
}
