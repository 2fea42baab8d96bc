#![warn(unused_extern_crates)]
use anyhow::{Context, Result};
use clap::Parser;
use facemetric::{Config, Pipeline};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{Level, debug, info, span};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CmdArgs {
    /// Front facing photograph
    #[arg(short, long, value_name = "FILE")]
    front: PathBuf,

    /// Profile photograph
    #[arg(short, long, value_name = "FILE")]
    side: PathBuf,

    /// Directory for result.json and annotated images
    #[arg(short, long, default_value = "tmp")]
    out: PathBuf,

    /// Manual trichion x, normalized to the front image width
    #[arg(long, requires = "tr_y")]
    tr_x: Option<f64>,

    /// Manual trichion y, normalized to the front image height
    #[arg(long, requires = "tr_x")]
    tr_y: Option<f64>,

    /// male, female, nonbinary or prefer_not_to_say
    #[arg(short, long)]
    gender: Option<String>,

    /// JSON config file to read from
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Skip the hairline debug images
    #[arg(long)]
    no_debug: bool,
}

fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env();
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let args = CmdArgs::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if args.no_debug {
        config.debug_images = false;
    }
    debug!("{config:?}");

    let pipeline = Pipeline::from_config(&config)?;

    let front = fs::read(&args.front)
        .with_context(|| format!("reading {}", args.front.display()))?;
    let side = fs::read(&args.side).with_context(|| format!("reading {}", args.side.display()))?;
    let manual_tr = args.tr_x.zip(args.tr_y);

    let start = Instant::now();
    let result = pipeline.analyze(&front, &side, manual_tr, args.gender.as_deref())?;
    debug!("Took {:?}", start.elapsed());

    let span = span!(Level::DEBUG, "write_results");
    let _guard = span.enter();

    fs::create_dir_all(&args.out)?;
    let json_path = args.out.join("result.json");
    fs::write(&json_path, serde_json::to_string_pretty(&result)?)?;
    for (name, png) in &result.annotated_images {
        fs::write(args.out.join(format!("{name}.png")), png)?;
    }

    for warning in &result.warnings {
        println!("warning: {warning}");
    }
    info!("Result at {}", json_path.display());

    Ok(())
}
