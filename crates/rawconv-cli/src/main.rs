// rawconv - command-line front end for rawconv-core

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use rawconv_core::encode::encode_image;
use rawconv_core::{
    ConvertOptions, ConverterTask, OutputFormat, Output, OutputSelection, RawMetadata, Request,
};

#[derive(Parser, Debug)]
#[command(name = "rawconv", version, about = "Convert camera RAW files")]
struct Cli {
    /// Log every conversion stage
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML file with conversion settings; flags override it
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print capture metadata
    Metadata {
        file: PathBuf,

        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract the embedded preview
    Thumbnail {
        file: PathBuf,

        /// Output file; the extension picks JPEG or PNG
        #[arg(short, long)]
        output: PathBuf,

        /// Downscale so the longest edge is at most this many pixels
        #[arg(long)]
        max_edge: Option<u32>,
    },

    /// Develop RAW files into a directory
    Convert {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Target directory, created when missing
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Args, Debug, Default)]
struct Overrides {
    /// Output format: jpeg or png
    #[arg(long)]
    format: Option<OutputFormat>,

    /// JPEG quality (1-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,

    /// Develop at half resolution by binning 2x2 blocks
    #[arg(long)]
    half_size: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    debug!(?cli, "parsed arguments");

    let options = load_options(cli.config.as_deref())?;
    match cli.command {
        Command::Metadata { file, json } => metadata(&file, json, options).await,
        Command::Thumbnail {
            file,
            output,
            max_edge,
        } => thumbnail(&file, &output, max_edge, options).await,
        Command::Convert {
            files,
            output,
            overrides,
        } => convert(&files, &output, apply_overrides(options, &overrides)).await,
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_options(config: Option<&Path>) -> Result<ConvertOptions> {
    match config {
        Some(path) => ConvertOptions::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(ConvertOptions::default()),
    }
}

fn apply_overrides(mut options: ConvertOptions, overrides: &Overrides) -> ConvertOptions {
    if let Some(format) = overrides.format {
        options.format = format;
    }
    if let Some(quality) = overrides.quality {
        options.quality = quality;
    }
    if overrides.half_size {
        options.develop.half_size = true;
    }
    options
}

/// Format implied by a file name, JPEG when unknown.
fn format_for(path: &Path) -> OutputFormat {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| ext.parse().ok())
        .unwrap_or_default()
}

async fn metadata(file: &Path, json: bool, options: ConvertOptions) -> Result<()> {
    let task = ConverterTask::open(file, options).await?;
    let metadata = match task.run(Request::Metadata).await.result? {
        Output::Metadata(metadata) => metadata,
        other => bail!("unexpected output {:?}", other),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
    } else {
        print!("{}", render_metadata(&metadata));
    }
    Ok(())
}

fn render_metadata(metadata: &RawMetadata) -> String {
    let mut out = String::new();
    for (key, value) in [("Make", &metadata.make), ("Model", &metadata.model)] {
        if let Some(value) = value {
            out.push_str(&format!("{:<13}{}\n", key, value));
        }
    }
    for (key, value) in metadata.to_map() {
        out.push_str(&format!("{:<13}{}\n", key.as_str(), value.as_f64()));
    }
    if let Some(date) = &metadata.date_taken {
        out.push_str(&format!("{:<13}{}\n", "DateTaken", date));
    }
    out
}

async fn thumbnail(
    file: &Path,
    output: &Path,
    max_edge: Option<u32>,
    mut options: ConvertOptions,
) -> Result<()> {
    if max_edge.is_some() {
        options.thumbnail_max_edge = max_edge;
    }
    let quality = options.quality;
    let task = ConverterTask::open(file, options).await?;
    let image = match task.run(Request::Thumbnail).await.result? {
        Output::Image(image) => image,
        other => bail!("unexpected output {:?}", other),
    };

    let bytes = encode_image(&image, format_for(output), quality)?;
    std::fs::write(output, bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        "{} -> {} ({}x{})",
        file.display(),
        output.display(),
        image.width,
        image.height
    );
    Ok(())
}

async fn convert(files: &[PathBuf], directory: &Path, options: ConvertOptions) -> Result<()> {
    let mut failures = 0;
    for file in files {
        match convert_one(file, directory, options.clone()).await {
            Ok(path) => info!("{} -> {}", file.display(), path.display()),
            Err(e) => {
                error!("{}: {:#}", file.display(), e);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{} of {} files failed to convert", failures, files.len());
    }
    Ok(())
}

async fn convert_one(file: &Path, directory: &Path, options: ConvertOptions) -> Result<PathBuf> {
    let task = ConverterTask::open(file, options).await?;
    let outcome = task
        .run(Request::ToDirectory {
            directory: directory.to_path_buf(),
            outputs: OutputSelection::NONE,
        })
        .await;
    debug!(state = %outcome.state, "conversion finished");
    match outcome.result? {
        Output::Directory(conversion) => Ok(conversion.path),
        other => bail!("unexpected output {:?}", other),
    }
}
