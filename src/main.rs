use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use volreg::config::{Config, load_config};
use volreg::voxel::Voxel;
use volreg::{
    Atlas, BrainRegistration, LoaderOptions, Orientation, RegistrationOptions, RegistrationParams,
    RegistrationRun, SampleProcessor, SampleSpacing, SampleType, SliceRange, SortBy, VolumeLoader,
};

/// Register a reference atlas to a whole brain microscopy volume.
#[derive(Parser, Debug)]
#[command(name = "volreg", version)]
struct Cli {
    /// The path to the brain to analyse (folder of planes, text file of plane
    /// paths, TIFF stack or NIfTI file)
    #[arg(value_name = "TARGET_BRAIN_PATH")]
    target_brain_path: PathBuf,

    /// The name of the sample, used as a prefix for every output file
    #[arg(value_name = "SAMPLE_NAME")]
    sample_name: String,

    /// The folder in which to save the intermediate and final outputs
    #[arg(value_name = "OUTPUT_FOLDER")]
    output_folder: PathBuf,

    /// Sort the paths of a text file input naturally (plane_2 before plane_10)
    #[arg(long)]
    sort_input_file: bool,

    /// Load the planes on several threads
    #[arg(long)]
    load_parallel: bool,

    /// Downsample and filter the target brain before registration
    #[arg(short, long)]
    preprocess: bool,

    /// Suffix of the preprocessed (downsampled and filtered) image
    #[arg(short = 's', long, default_value = "downsampled_filtered")]
    preprocessed_suffix: String,

    /// Pixel spacing of the data along the first dimension, in mm
    #[arg(short = 'x', long = "x-pixel-mm", default_value_t = 0.001)]
    x_pixel_mm: f64,

    /// Pixel spacing of the data along the second dimension, in mm
    #[arg(short = 'y', long = "y-pixel-mm", default_value_t = 0.001)]
    y_pixel_mm: f64,

    /// Pixel spacing of the data along the third dimension, in mm
    #[arg(short = 'z', long = "z-pixel-mm", default_value_t = 0.005)]
    z_pixel_mm: f64,

    /// Orientation of the sample planes (coronal, sagittal or horizontal)
    #[arg(short, long, default_value = "coronal")]
    orientation: Orientation,

    /// Flip the sample along the first dimension
    #[arg(long)]
    flip_x: bool,

    /// Flip the sample along the second dimension
    #[arg(long)]
    flip_y: bool,

    /// Flip the sample along the third dimension
    #[arg(long)]
    flip_z: bool,

    /// Also save the downsampled brain before filtering
    #[arg(long)]
    save_unfiltered: bool,

    /// Also register the hemispheres atlas
    #[arg(long)]
    left_right: bool,

    /// Save the boundaries of the registered atlas regions
    #[arg(long)]
    generate_outlines: bool,

    /// Delete the intermediate images and error logs once registration succeeds
    #[arg(long)]
    erase_intermediate_files: bool,

    /// Delete the registration logs once registration succeeds
    #[arg(long)]
    delete_logs: bool,

    /// Register the atlas to the sample
    #[arg(short, long)]
    register: bool,

    /// Only register atlas planes in [START, END); the other planes are masked
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    atlas_mask_planes: Option<Vec<usize>>,

    /// Configuration file, searched for in the usual places when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            sort_by: if self.sort_input_file {
                SortBy::Natural
            } else {
                SortBy::None
            },
            parallel: self.load_parallel,
            ..LoaderOptions::default()
        }
    }

    fn sample_spacing(&self) -> SampleSpacing {
        SampleSpacing {
            x: self.x_pixel_mm,
            y: self.y_pixel_mm,
            z: self.z_pixel_mm,
        }
    }

    fn atlas_mask(&self) -> Option<SliceRange> {
        match self.atlas_mask_planes.as_deref() {
            Some([start, end]) => Some(SliceRange::new(*start, *end)),
            _ => None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let handle = load_config(cli.config.as_deref())?;
    for warning in &handle.warnings {
        warn!("{warning}");
    }
    if let Some(source) = &handle.source {
        info!("Using config {}", source.display());
    }
    let config = handle.config;

    let registered_atlas = process(&cli, &config)?;
    info!(
        "Segmentation finished. Results can be found here: {}",
        registered_atlas.display()
    );

    let run = RegistrationRun::new(&cli.sample_name, &cli.target_brain_path, &cli.output_folder);
    if cli.erase_intermediate_files {
        remove_files(&run.error_files())?;
        remove_files(&run.intermediate_files(&cli.preprocessed_suffix))?;
    }
    if cli.delete_logs {
        remove_files(&run.log_files())?;
    }
    Ok(())
}

fn process(cli: &Cli, config: &Config) -> Result<PathBuf> {
    if !cli.output_folder.exists() {
        info!("Creating output folder {}", cli.output_folder.display());
        fs::create_dir_all(&cli.output_folder).with_context(|| {
            format!(
                "Could not create output folder {}",
                cli.output_folder.display()
            )
        })?;
    }

    let atlas = Atlas::new(config.atlas.clone())?;

    let dataset_path = if cli.preprocess {
        info!("Preprocessing");
        let options = cli.loader_options();
        match VolumeLoader::sample_type(&cli.target_brain_path, &options)? {
            SampleType::U8 => preprocess::<u8>(cli, &atlas, &options)?,
            SampleType::U16 => preprocess::<u16>(cli, &atlas, &options)?,
            SampleType::U32 => preprocess::<u32>(cli, &atlas, &options)?,
            SampleType::F32 => preprocess::<f32>(cli, &atlas, &options)?,
            SampleType::F64 => preprocess::<f64>(cli, &atlas, &options)?,
        }
    } else {
        cli.target_brain_path.clone()
    };

    let params = RegistrationParams::new(config, &atlas);
    let run = RegistrationRun::new(&cli.sample_name, &dataset_path, &cli.output_folder);
    let mut registration = BrainRegistration::new(params, run);

    if !cli.register {
        info!("Registration not requested");
        return Ok(registration.run().registered_atlas_path.clone());
    }

    info!("Registering");
    let options = RegistrationOptions {
        atlas_mask: cli.atlas_mask(),
        hemispheres: cli.left_right,
        outlines: cli.generate_outlines,
    };
    let registered_atlas = registration.run_all(options)?;
    info!("Done");
    Ok(registered_atlas)
}

/// Downsample, reorient and filter the sample, returning the path of the
/// filtered image.
fn preprocess<T: Voxel>(cli: &Cli, atlas: &Atlas, options: &LoaderOptions) -> Result<PathBuf> {
    let mut sample = SampleProcessor::<T>::load(
        &cli.target_brain_path,
        cli.sample_spacing(),
        cli.orientation,
        atlas.pixel_sizes(),
        options,
    )?;
    sample.flip((cli.flip_x, cli.flip_y, cli.flip_z));

    if cli.save_unfiltered {
        let path = output_path(cli, "downsampled");
        sample.cast::<u16>().save(&path)?;
    }

    let filtered_path = output_path(cli, &cli.preprocessed_suffix);
    sample.filter().save(&filtered_path)?;
    Ok(filtered_path)
}

fn output_path(cli: &Cli, suffix: &str) -> PathBuf {
    cli.output_folder
        .join(format!("{}_{suffix}.nii", cli.sample_name))
}

fn remove_files(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        remove_file(path)?;
    }
    Ok(())
}

fn remove_file(path: &Path) -> Result<()> {
    if !path.exists() {
        warn!("Cannot delete {}, file not found", path.display());
        return Ok(());
    }
    fs::remove_file(path).with_context(|| format!("Could not delete {}", path.display()))
}
