use argh::FromArgs;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use pano::image::Image;
use pano::io::functional::{read_image_any_rgb8, write_image};
use pano::io::IoError;
use pano::stitching::{
    StageTimings, StitchContext, StitchError, StitchReport, Stitcher, StitcherConfig,
};

/// Stitch overlapping photos taken from a single viewpoint into a panorama.
#[derive(FromArgs)]
struct Args {
    /// input images, in capture order
    #[argh(positional)]
    images: Vec<PathBuf>,

    /// path of the resulting panorama (jpg or png)
    #[argh(option, short = 'o', default = "PathBuf::from(\"result.jpg\")")]
    output: PathBuf,

    /// json file with the stitcher configuration
    #[argh(option)]
    config: Option<PathBuf>,

    /// projection surface: spherical or cylindrical
    #[argh(option)]
    surface: Option<String>,

    /// seam finder: graph_cut or voronoi
    #[argh(option)]
    seam: Option<String>,

    /// blender: multi_band or feather
    #[argh(option)]
    blender: Option<String>,

    /// number of bands of the multi-band blender
    #[argh(option)]
    bands: Option<usize>,

    /// abort the run after this many seconds
    #[argh(option)]
    timeout_secs: Option<u64>,
}

/// Parses a configuration enum from its snake case name.
fn parse_kind<T: DeserializeOwned>(name: &str) -> Result<T, Box<dyn std::error::Error>> {
    serde_json::from_value(serde_json::Value::String(name.to_string()))
        .map_err(|e| format!("invalid option value {name:?}: {e}").into())
}

fn load_config(args: &Args) -> Result<StitcherConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => StitcherConfig::default(),
    };

    if let Some(surface) = &args.surface {
        config.warper.surface = parse_kind(surface)?;
    }
    if let Some(seam) = &args.seam {
        config.seam.finder = parse_kind(seam)?;
    }
    if let Some(blender) = &args.blender {
        config.blender.kind = parse_kind(blender)?;
    }
    if let Some(bands) = args.bands {
        config.blender.num_bands = bands;
    }

    Ok(config)
}

/// Images decoded from the command line paths.
struct Inputs {
    /// Paths of the decoded images, in input order.
    paths: Vec<PathBuf>,
    images: Vec<Image<u8, 3>>,
    /// Paths that could not be decoded.
    unreadable: Vec<(PathBuf, IoError)>,
}

impl Inputs {
    fn read(paths: &[PathBuf]) -> Self {
        let mut inputs = Inputs {
            paths: Vec::with_capacity(paths.len()),
            images: Vec::with_capacity(paths.len()),
            unreadable: Vec::new(),
        };
        for path in paths {
            match read_image_any_rgb8(path) {
                Ok(image) => {
                    inputs.paths.push(path.clone());
                    inputs.images.push(image);
                }
                Err(e) => {
                    log::warn!("Can't read {}: {e}", path.display());
                    inputs.unreadable.push((path.clone(), e));
                }
            }
        }
        inputs
    }

    /// Fails like the stitcher when fewer than two images are usable.
    fn check_count(&self) -> Result<(), StitchError> {
        if self.images.len() < 2 {
            return Err(StitchError::InsufficientImages {
                usable: self.images.len(),
            });
        }
        Ok(())
    }

    fn print_unreadable(&self) {
        for (path, e) in &self.unreadable {
            println!("Skipping {}: {e}", path.display());
        }
    }
}

fn print_report(report: &StitchReport, images: &[PathBuf]) {
    for (index, reason) in &report.dropped {
        println!("Skipping {}: {reason}", images[*index].display());
    }
    if !report.used.is_empty() {
        let used = report
            .used
            .iter()
            .map(|i| images[*i].display().to_string())
            .collect::<Vec<_>>();
        println!("Used images: {}", used.join(", "));
    }
}

fn print_timings(timings: &StageTimings) {
    let secs = |d: Duration| d.as_secs_f64();
    println!("Finding features, time: {:.3} sec", secs(timings.features));
    println!(
        "Registering images, time: {:.3} sec (matching: {:.3} sec, adjusting: {:.3} sec)",
        secs(timings.registration),
        secs(timings.matching),
        secs(timings.adjusting)
    );
    println!(
        "Composing, time: {:.3} sec (seam search: {:.3} sec, blending: {:.3} sec)",
        secs(timings.composing),
        secs(timings.seam_search),
        secs(timings.blending)
    );
    println!("Total time: {:.3} sec", secs(timings.total));
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();
    let config = load_config(&args)?;

    // unreadable files are skipped, the rest keeps its order
    let inputs = Inputs::read(&args.images);
    inputs.print_unreadable();
    inputs.check_count()?;

    let cancel_token = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler({
        let cancel_token = cancel_token.clone();
        move || {
            println!("Received Ctrl-C signal. Cancelling the stitching !!");
            cancel_token.store(true, Ordering::SeqCst);
        }
    })?;

    let stitcher = Stitcher::new(config);
    let mut timings = StageTimings::default();
    let mut ctx = StitchContext::new()
        .with_telemetry(&mut timings)
        .with_cancel_flag(cancel_token);
    if let Some(secs) = args.timeout_secs {
        ctx = ctx.with_deadline(Instant::now() + Duration::from_secs(secs));
    }

    let result = stitcher.stitch(&inputs.images, &mut ctx);
    drop(ctx);

    let output = match result {
        Ok(output) => output,
        Err(failure) => {
            print_report(&failure.report, &inputs.paths);
            print_timings(&timings);
            return Err(failure.error.into());
        }
    };

    print_report(&output.report, &inputs.paths);

    let size = output.panorama.image.size();
    log::info!(
        "Panorama {}x{} at scale {:.1}",
        size.width,
        size.height,
        output.panorama_scale
    );
    write_image(&args.output, &output.panorama.image)?;

    print_timings(&timings);
    println!("Done");

    Ok(())
}
