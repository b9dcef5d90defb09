//! Quick commandline utility to turn a nifti time series into a binary series directory.
//!
//! Each 3D volume of a 4D NIfTI file is one image. The volumes are cut into single
//! slices along one spatial axis, regrouped per voxel across time, and written as
//! one binary file per slice plus a `conf.json` manifest.

use std::fmt::Display;
use std::path::Path;

use clap::Parser;
use ndarray::{ArrayD, Axis};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use tracing_subscriber::EnvFilter;

use seriesnii::{with_value_type, BlockingStrategy, Element, Images, Threaded};

// use clap to create commandline interface
#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// the input nifti file, 3D or 4D with time as the 4th axis
    #[arg(short, long)]
    input: String,

    /// the directory to write the binary series to. It is created if needed.
    #[arg(short, long)]
    output: String,

    /// Number for the axis to group the output files along:
    ///     0 -> X, 1 -> Y, 2 -> Z,
    ///     or 3 -> seriesnii will guess.
    #[arg(short, long, default_value_t = 3)]
    axis: usize,

    /// value type stored in the series (uint8, int16, int32, float32, float64, ...)
    #[arg(short, long, default_value = "float32")]
    dtype: String,

    /// number of worker threads, 0 uses one per core
    #[arg(short, long, default_value_t = 0)]
    threads: usize,
}

fn fail(e: impl Display) -> ! {
    eprintln!("Error! {}", e);
    std::process::exit(-2);
}

/// Splits a 4D array into its 3D volumes along the last axis.
///
/// A 3D array is returned as a single volume.
fn split_vols<T: Clone>(img: ArrayD<T>) -> Vec<ArrayD<T>> {
    if img.ndim() != 4 {
        return vec![img];
    }
    img.axis_iter(Axis(3)).map(|vol| vol.to_owned()).collect()
}

/// Guesses the slice direction: the axis with the fewest voxels and/or the
/// coarsest spacing.
fn guess_axis(dims: [u16; 8], pixdims: [f32; 8]) -> usize {
    let dimensions = [
        (dims[1], pixdims[1]),
        (dims[2], pixdims[2]),
        (dims[3], pixdims[3]),
    ];
    let mut scores = [0, 0, 0];
    for i in 0..3 {
        for j in (i + 1)..3 {
            // increase chance if dim is smaller and/or pixdim is larger
            if dimensions[i].0 < dimensions[j].0 {
                scores[i] += 1;
            } else if dimensions[i].0 > dimensions[j].0 {
                scores[j] += 1;
            }
            if dimensions[i].1 > dimensions[j].1 {
                scores[i] += 1;
            } else if dimensions[i].1 < dimensions[j].1 {
                scores[j] += 1;
            }
        }
    }

    match scores.iter().enumerate().max_by_key(|&(_, score)| score) {
        Some((axis, _)) => axis,
        None => 2,
    }
}

fn write_series<T: Element>(
    vols: Vec<ArrayD<T>>,
    axis: usize,
    output: &Path,
    executor: Threaded,
) -> seriesnii::Result<()> {
    let images = Images::from_arrays(vols, executor)?;
    println!("Images: {} of shape {}", images.nimages(), images.dims());
    let strategy = BlockingStrategy::along_axis(images.dims(), axis)?;
    images.to_blocks(strategy)?.save_binary_series(output)?;
    Ok(())
}

/// Main function that parses commandline arguments and runs the program.
///
/// Reads the input NIfTI file, splits it into volumes across time, and writes the
/// per-voxel series grouped into one file per slice along the chosen axis.
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Args::parse();
    let output_path = Path::new(&cli.output);

    let obj = ReaderOptions::new()
        .read_file(&cli.input)
        .unwrap_or_else(|e| fail(e));
    // gather header information
    let header = obj.header();
    let dim = header.dim;
    let pixdim = header.pixdim;
    println!("Dims: {:?}", &dim[1..=dim[0] as usize]);

    let guessed_axis = guess_axis(dim, pixdim);
    let axis = match cli.axis {
        0..=2 => cli.axis,
        _ => {
            println!("Axis not specified. Guessing axis: {}", guessed_axis);
            guessed_axis
        }
    };
    if guessed_axis != axis {
        println!("Warning! The axis specified might not be along the slice direction");
    }
    println!("Grouping series on axis: {}", axis);

    let executor = Threaded::new(cli.threads).unwrap_or_else(|e| fail(e));
    let volume = obj.into_volume();
    let result: seriesnii::Result<()> = with_value_type!(cli.dtype.as_str(), T => {
        let img = volume.into_ndarray::<T>().unwrap_or_else(|e| fail(e));
        if img.ndim() != 3 && img.ndim() != 4 {
            fail("Input nifti file must be 3D or 4D.");
        }
        write_series(split_vols(img), axis, output_path, executor)
    });
    result.unwrap_or_else(|e| fail(e));
    println!("Output: {}", output_path.display());
}
