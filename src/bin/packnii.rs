//! Quick commandline utility to pack a binary series directory back into a nifti file.
//!
//! The series is read with the value type recorded in its manifest, packed into one
//! dense array and written with time as the last axis.

use std::fmt::Display;
use std::path::Path;

use clap::Parser;
use ndarray::ArrayD;
use nifti::writer::WriterOptions;
use nifti::{NiftiObject, ReaderOptions};
use tracing_subscriber::EnvFilter;

use seriesnii::binary::Manifest;
use seriesnii::{with_value_type, Element, PackOptions, Series, Threaded};

// use clap to create commandline interface
#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// the binary series directory written by seriesnii
    #[arg(short, long)]
    input: String,

    /// the name of the output nifti file
    #[arg(short, long, default_value = "packed.nii")]
    output: String,

    /// an optional nifti file whose header is used for the output
    #[arg(short, long)]
    reference: Option<String>,

    /// sort the series by key before packing
    #[arg(short, long)]
    sorting: bool,

    /// number of worker threads, 0 uses one per core
    #[arg(short, long, default_value_t = 0)]
    threads: usize,
}

fn fail(e: impl Display) -> ! {
    eprintln!("Error! {}", e);
    std::process::exit(-2);
}

/// Moves the leading image axis of a packed series to the end.
fn time_last<T>(packed: ArrayD<T>, nimages: usize) -> ArrayD<T> {
    if nimages == 1 {
        return packed;
    }
    let ndim = packed.ndim();
    let axes: Vec<usize> = (1..ndim).chain(std::iter::once(0)).collect();
    packed.permuted_axes(axes)
}

fn load_and_pack<T: Element>(
    input_dir: &Path,
    sorting: bool,
    executor: Threaded,
) -> seriesnii::Result<ArrayD<T>> {
    let series = Series::<T, _>::load_binary(input_dir, executor)?;
    println!(
        "Series: {} keys over {} with {} images",
        series.len(),
        series.dims(),
        series.nimages()
    );
    let options = if sorting {
        PackOptions::default().sorted()
    } else {
        PackOptions::default()
    };
    let packed = series.pack(options)?;
    Ok(time_last(packed, series.nimages()))
}

// main function parses commandline arguments and runs the program
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Args::parse();
    let input_dir = Path::new(&cli.input);
    let output_filename = Path::new(&cli.output);

    // check that input directory exists
    if !input_dir.exists() {
        eprintln!("Error! Did not find input directory. Use -i to pass an existing directory.");
        std::process::exit(-2);
    } else if !input_dir.is_dir() {
        eprintln!("Error! Input is not a directory!");
        std::process::exit(-2);
    }
    if output_filename.exists() {
        eprintln!(
            "Error! Output file already exists. \
             Please specify a different output file or remove existing file."
        );
        std::process::exit(-2);
    }

    let reference = cli.reference.as_ref().map(|reference| {
        let reference_filename = Path::new(reference);
        if !reference_filename.exists() {
            eprintln!("Error! Did not find reference nifti file. Use -r to pass an existing file.");
            std::process::exit(-2);
        }
        ReaderOptions::new()
            .read_file(reference_filename)
            .unwrap_or_else(|e| fail(e))
    });

    let manifest = Manifest::read(input_dir).unwrap_or_else(|e| fail(e));
    println!("Value type: {}", manifest.valuetype);
    let executor = Threaded::new(cli.threads).unwrap_or_else(|e| fail(e));

    let written: seriesnii::Result<()> = with_value_type!(manifest.valuetype.as_str(), T => {
        let packed = load_and_pack::<T>(input_dir, cli.sorting, executor)
            .unwrap_or_else(|e| fail(e));
        println!("Final shape: {:?}", packed.shape());

        // save with the reference header when there is one
        let writer = WriterOptions::new(output_filename);
        let writer = match &reference {
            Some(obj) => writer.reference_header(obj.header()),
            None => writer,
        };
        writer.write_nifti(&packed).unwrap_or_else(|e| fail(e));
        Ok(())
    });
    written.unwrap_or_else(|e| fail(e));
    println!("Output: {}", output_filename.display());
}
