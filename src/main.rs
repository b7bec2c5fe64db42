use clap::{Parser, Subcommand};
use slicekit::imaging::{CancelToken, ImageBackend, RustBackend};
use slicekit::preview::Previewer;
use slicekit::transport::Reply;
use slicekit::{CropPayload, LayoutRequest, Slicer, config, output};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "slicekit")]
#[command(about = "Slice one image into grid, carousel or custom tiles")]
#[command(long_about = "\
Slice one image into grid, carousel or custom tiles

Modes:

  Grid      3 columns x N rows of 1080x1350, cut from bands stretched to a
            seamless profile-grid composite (--gap with-gap | without-gap)
  Carousel  N side-by-side 4:5 segments, each resized to 1080x1350
  Custom    R x C equal cells at native resolution

Slices are numbered band-major (row by row, left to right) starting at 001.

Run 'slicekit gen-config' to generate a documented slicekit.toml.")]
#[command(version)]
struct Cli {
    /// Config file; stock defaults are used when it does not exist
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// Layout selection shared by every command that takes an image.
#[derive(clap::Args, Clone)]
struct LayoutArgs {
    /// Image to slice
    image: PathBuf,

    /// Grid, Carousel or Custom
    #[arg(long, default_value = "Grid")]
    mode: String,

    /// Number of rows (Grid, Custom)
    #[arg(long, allow_negative_numbers = true)]
    rows: Option<i64>,

    /// Number of columns (Carousel, Custom)
    #[arg(long, allow_negative_numbers = true)]
    cols: Option<i64>,

    /// Grid gap style: with-gap or without-gap
    #[arg(long)]
    gap: Option<String>,

    /// Whole request as JSON, e.g. '{"mode":"Custom","rows":2,"cols":2}'.
    /// Replaces the individual layout and encoding flags.
    #[arg(long)]
    payload: Option<String>,
}

/// Encoding flags for `slice`.
#[derive(clap::Args, Clone)]
struct EncodeArgs {
    /// png, jpeg, webp or avif (default from config)
    #[arg(long)]
    format: Option<String>,

    /// Lossy quality 1-100 (default from config)
    #[arg(long, allow_negative_numbers = true)]
    quality: Option<i64>,

    /// Lossless webp (maximum quality avif)
    #[arg(long)]
    lossless: bool,

    /// Drop slices that fail to encode instead of failing the run
    #[arg(long)]
    best_effort: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Slice an image and write the tiles
    Slice {
        #[command(flatten)]
        layout: LayoutArgs,
        #[command(flatten)]
        encode: EncodeArgs,
        /// Directory the slices are written to
        #[arg(long, default_value = "slices")]
        out: PathBuf,
        /// Print the JSON response (data URIs) instead of writing files
        #[arg(long)]
        json: bool,
    },
    /// Show the slice geometry without decoding the image
    Plan {
        #[command(flatten)]
        layout: LayoutArgs,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Draw the slicing guides onto the image
    Preview {
        #[command(flatten)]
        layout: LayoutArgs,
        /// Output image (format from the extension)
        #[arg(long, default_value = "preview.png")]
        out: PathBuf,
        /// Shrink the preview to fit a square box of this many pixels
        #[arg(long)]
        max_size: Option<u32>,
    },
    /// Print a stock slicekit.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Slice {
            layout,
            encode,
            out,
            json,
        } => {
            let slicer = Slicer::new(config::load_config(&cli.config)?)?;
            let request = build_request(&layout, Some(&encode), &slicer.config().output)?;
            let bytes = std::fs::read(&layout.image)?;

            if json {
                let result = slicer.slice(bytes, &request);
                let reply = Reply::from_result(&result);
                println!("{}", serde_json::to_string_pretty(&reply.body)?);
                result?;
                return Ok(());
            }

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_slice_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            // After a timeout or cancel the abandoned worker may still hold the
            // sender, so only wait for the printer on success.
            let slices = slicer.slice_with(bytes, &request, &CancelToken::new(), Some(tx))?;
            printer.join().ok();

            std::fs::create_dir_all(&out)?;
            let extension = request.encode.format.extension();
            let mut written = Vec::with_capacity(slices.len());
            for slice in &slices {
                let path = out.join(format!("slice-{:03}.{}", slice.index + 1, extension));
                std::fs::write(&path, &slice.bytes)?;
                written.push((slice.index, path));
            }
            output::print_written(&written, request.layout.slice_count() as usize);
        }
        Command::Plan { layout, json } => {
            let slicer = Slicer::new(config::load_config(&cli.config)?)?;
            let request = build_request(&layout, None, &slicer.config().output)?;
            let bytes = std::fs::read(&layout.image)?;
            let plan = slicer.plan(&bytes, &request)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                output::print_plan(&plan);
            }
        }
        Command::Preview {
            layout,
            out,
            max_size,
        } => {
            let config = config::load_config(&cli.config)?;
            let request = build_request(&layout, None, &config.output)?;
            let image = decode_file(&layout.image)?;
            let previewer = Previewer::with_max_slices(config.limits.max_slices);
            let rendered =
                previewer.render(&image, &request.layout, max_size.map(|m| (m, m)))?;
            rendered.into_pixels().save(&out)?;
            println!(
                "{} \u{2192} {}",
                output::layout_label(&request.layout),
                out.display()
            );
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Turn CLI flags (or `--payload`) into a validated request.
fn build_request(
    layout: &LayoutArgs,
    encode: Option<&EncodeArgs>,
    defaults: &config::OutputConfig,
) -> Result<LayoutRequest, slicekit::SliceError> {
    if let Some(json) = &layout.payload {
        return LayoutRequest::from_json(json, defaults);
    }
    let mut payload = CropPayload {
        mode: layout.mode.clone(),
        rows: layout.rows,
        cols: layout.cols,
        gap: layout.gap.clone(),
        ..CropPayload::default()
    };
    if let Some(encode) = encode {
        payload.format = encode.format.clone();
        payload.quality = encode.quality;
        payload.lossless = encode.lossless.then_some(true);
        payload.best_effort = encode.best_effort.then_some(true);
    }
    LayoutRequest::from_payload(&payload, defaults)
}

fn decode_file(path: &Path) -> Result<slicekit::imaging::SourceImage, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    Ok(RustBackend::new().decode(&bytes)?)
}
