//! Flat binary series format.
//!
//! A series directory holds one `*.bin` file per slice along the grouping axis, a
//! `conf.json` manifest and a zero-length `SUCCESS` marker written last. Each file
//! is a run of fixed-width little-endian records: `nkeys` `int16` keys followed by
//! `nvalues` values of the manifest's `valuetype`, with no padding between fields.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glob::{glob, Pattern};
use ndarray::{Array1, ArrayBase, Data, Ix1};
use serde::{Deserialize, Serialize};

use crate::collection::{Executor, Keyed};
use crate::common::Key;
use crate::dims::Dimensions;
use crate::element::Element;
use crate::error::{Result, SeriesError};
use crate::series::Series;
use crate::strategy::BlockingStrategy;

pub const MANIFEST_FILE: &str = "conf.json";
pub const SUCCESS_MARKER: &str = "SUCCESS";
pub const KEY_TYPE: &str = "int16";
const KEY_SIZE: usize = 2;

/// Contents of `conf.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Directory the series was written to.
    pub input: String,
    pub dims: Vec<usize>,
    pub nkeys: usize,
    pub nvalues: usize,
    pub valuetype: String,
    pub keytype: String,
}

impl Manifest {
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let file = File::open(&path).map_err(SeriesError::at(&path))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let file = File::create(&path).map_err(SeriesError::at(&path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush().map_err(SeriesError::at(&path))?;
        Ok(())
    }

    /// Bytes per record for values `value_size` bytes wide.
    pub fn record_size(&self, value_size: usize) -> usize {
        record_size(self.nkeys, self.nvalues, value_size)
    }
}

pub fn record_size(nkeys: usize, nvalues: usize, value_size: usize) -> usize {
    nkeys * KEY_SIZE + nvalues * value_size
}

/// Appends one record to `writer`.
pub fn encode_record<T, S, W>(
    key: &[usize],
    values: &ArrayBase<S, Ix1>,
    writer: &mut W,
) -> Result<()>
where
    T: Element,
    S: Data<Elem = T>,
    W: Write,
{
    for &k in key {
        let k = i16::try_from(k)
            .map_err(|_| SeriesError::config(format!("key {key:?} does not fit in {KEY_TYPE}")))?;
        writer.write_i16::<LittleEndian>(k)?;
    }
    for value in values.iter() {
        value.write_le(writer)?;
    }
    Ok(())
}

/// Reads one record from `reader`.
pub fn decode_record<T, R>(
    reader: &mut R,
    nkeys: usize,
    nvalues: usize,
) -> Result<(Key, Array1<T>)>
where
    T: Element,
    R: Read,
{
    let mut key = Vec::with_capacity(nkeys);
    for _ in 0..nkeys {
        let k = reader.read_i16::<LittleEndian>()?;
        let k = usize::try_from(k)
            .map_err(|_| SeriesError::ShapeMismatch(format!("negative key {k} in record")))?;
        key.push(k);
    }
    let values = (0..nvalues)
        .map(|_| T::read_le(reader))
        .collect::<std::io::Result<Vec<T>>>()?;
    Ok((key, Array1::from_vec(values)))
}

fn data_file_name(coordinate: usize) -> String {
    format!("key-{coordinate:05}.bin")
}

/// Writes `series` to `dir` as a binary series.
///
/// The series must have been blocked into unit slices along a single axis, with one
/// partition per slice. Both the blocking and the partitions themselves are checked
/// before any file is touched. The completion marker and every data file from an
/// earlier write are removed first. The marker is written again only after every
/// data file and the manifest succeeded.
///
/// # Arguments
///
/// * `series` - The series to write. Its strategy determines the grouping axis.
/// * `dir` - The output directory. It is created if it does not exist.
///
/// # Returns
///
/// `Ok(())` once the marker is written. On a `Configuration` error nothing was
/// touched; on an I/O error the directory is left without a marker.
pub fn save_binary_series<T, E>(series: &Series<T, E>, dir: &Path) -> Result<()>
where
    T: Element,
    E: Executor,
{
    let dims = series.dims();
    let strategy = series.strategy().ok_or_else(|| {
        SeriesError::config("series has no blocking to derive a grouping axis from")
    })?;
    let grouping = strategy.grouping_dim(dims)?;
    if let Some((axis, n)) = dims
        .count()
        .iter()
        .enumerate()
        .find(|(_, &n)| n > i16::MAX as usize + 1)
    {
        return Err(SeriesError::config(format!(
            "axis {axis} of extent {n} cannot be keyed with {KEY_TYPE}"
        )));
    }
    check_partitions(dims, grouping, series.records().partitions())?;

    fs::create_dir_all(dir).map_err(SeriesError::at(dir))?;
    let marker = dir.join(SUCCESS_MARKER);
    if marker.exists() {
        fs::remove_file(&marker).map_err(SeriesError::at(&marker))?;
    }
    for stale in data_files(dir)? {
        if stale.is_file() {
            fs::remove_file(&stale).map_err(SeriesError::at(&stale))?;
        }
    }

    let nkeys = dims.ndim();
    let nvalues = series.nimages();
    let size = record_size(nkeys, nvalues, T::SIZE);
    let written = series
        .records()
        .run_partitions(|_, part| write_partition(dir, grouping, part, size))
        .into_iter()
        .collect::<Result<Vec<usize>>>()?;

    let manifest = Manifest {
        input: dir.display().to_string(),
        dims: dims.count().to_vec(),
        nkeys,
        nvalues,
        valuetype: T::NAME.to_string(),
        keytype: KEY_TYPE.to_string(),
    };
    manifest.write(dir)?;
    File::create(&marker).map_err(SeriesError::at(&marker))?;

    tracing::info!(
        "Wrote {} series in {} files to {}",
        written.iter().sum::<usize>(),
        written.len(),
        dir.display()
    );
    Ok(())
}

/// Sorted `*.bin` paths in `dir`.
fn data_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*.bin", Pattern::escape(&dir.to_string_lossy()));
    let mut paths: Vec<PathBuf> = glob(&pattern)?.filter_map(|entry| entry.ok()).collect();
    paths.sort();
    Ok(paths)
}

/// Every non-empty partition must be one whole slice along `grouping`, and every
/// slice must appear exactly once.
fn check_partitions<V>(
    dims: &Dimensions,
    grouping: usize,
    partitions: &[Vec<(Key, V)>],
) -> Result<()> {
    let nslices = dims.count()[grouping];
    let per_slice = dims.size() / nslices;
    let mut seen = vec![false; nslices];
    for part in partitions.iter().filter(|part| !part.is_empty()) {
        let coordinate = part[0].0.get(grouping).copied().unwrap_or(usize::MAX);
        let stray = part
            .iter()
            .find(|(k, _)| k.get(grouping) != Some(&coordinate));
        if let Some((key, _)) = stray {
            return Err(SeriesError::config(format!(
                "partition mixes keys {:?} and {key:?} along grouping axis {grouping}",
                part[0].0
            )));
        }
        if coordinate >= nslices {
            return Err(SeriesError::config(format!(
                "slice {coordinate} lies outside grouping axis {grouping} of extent {nslices}"
            )));
        }
        if std::mem::replace(&mut seen[coordinate], true) {
            return Err(SeriesError::config(format!(
                "slice {coordinate} along grouping axis {grouping} spans more than one partition"
            )));
        }
        if part.len() != per_slice {
            return Err(SeriesError::config(format!(
                "slice {coordinate} along grouping axis {grouping} holds {} series, \
                 expected {per_slice}",
                part.len()
            )));
        }
    }
    if let Some(missing) = seen.iter().position(|&s| !s) {
        return Err(SeriesError::config(format!(
            "slice {missing} along grouping axis {grouping} has no series"
        )));
    }
    Ok(())
}

fn write_partition<T: Element>(
    dir: &Path,
    grouping: usize,
    part: &[(Key, Array1<T>)],
    record_size: usize,
) -> Result<usize> {
    let Some((first, _)) = part.first() else {
        return Ok(0);
    };
    let mut buf = Vec::with_capacity(part.len() * record_size);
    for (key, values) in part {
        encode_record(key, values, &mut buf)?;
    }
    let path = dir.join(data_file_name(first[grouping]));
    fs::write(&path, &buf).map_err(SeriesError::at(&path))?;
    tracing::debug!("Wrote {} records to {}", part.len(), path.display());
    Ok(part.len())
}

/// Reads the series stored in `dir`, one partition per data file.
///
/// Files are decoded in parallel on `executor`, in sorted file-name order. The
/// grouping axis is recovered when the files map one to one onto its slices, so
/// the result can be saved again.
///
/// # Arguments
///
/// * `dir` - A directory written by [`save_binary_series`].
/// * `executor` - The executor the returned collection runs on.
///
/// # Returns
///
/// The series, or `SeriesError::Incomplete` when the completion marker is missing
/// and `SeriesError::Truncated` when a file does not hold whole records.
pub fn load_binary_series<T, E>(dir: &Path, executor: E) -> Result<Series<T, E>>
where
    T: Element,
    E: Executor,
{
    fs::metadata(dir).map_err(SeriesError::at(dir))?;
    if !dir.join(SUCCESS_MARKER).is_file() {
        return Err(SeriesError::Incomplete(dir.to_path_buf()));
    }
    let manifest = Manifest::read(dir)?;
    if manifest.keytype != KEY_TYPE {
        return Err(SeriesError::UnsupportedType(format!(
            "key type {}",
            manifest.keytype
        )));
    }
    if manifest.valuetype != T::NAME {
        return Err(SeriesError::ShapeMismatch(format!(
            "series in {} holds {} values, not {}",
            dir.display(),
            manifest.valuetype,
            T::NAME
        )));
    }
    let dims = Dimensions::from_shape(&manifest.dims)?;
    if manifest.nkeys != dims.ndim() {
        return Err(SeriesError::ShapeMismatch(format!(
            "manifest declares {} keys for dimensions {}",
            manifest.nkeys, dims
        )));
    }

    let paths = data_files(dir)?;
    tracing::debug!("Reading {} series files from {}", paths.len(), dir.display());

    let size = manifest.record_size(T::SIZE);
    let (nkeys, nvalues) = (manifest.nkeys, manifest.nvalues);
    let partitions = executor
        .run(paths, |_, path| {
            let bytes = fs::read(&path).map_err(SeriesError::at(&path))?;
            if size == 0 || bytes.len() % size != 0 {
                return Err(SeriesError::Truncated {
                    path,
                    len: bytes.len() as u64,
                    record_size: size,
                });
            }
            let mut reader = bytes.as_slice();
            (0..bytes.len() / size)
                .map(|_| decode_record::<T, _>(&mut reader, nkeys, nvalues))
                .collect::<Result<Vec<_>>>()
        })
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let strategy = infer_grouping(&dims, &partitions);
    let records = Keyed::from_partitions(partitions, executor);
    tracing::info!("Read {} series from {}", records.len(), dir.display());
    Ok(Series::new(dims, nvalues, strategy, records))
}

/// The axis whose slices match the data files one to one, if there is one.
fn infer_grouping<T>(dims: &Dimensions, partitions: &[Vec<(Key, T)>]) -> Option<BlockingStrategy> {
    let axis = (0..dims.ndim()).find(|&d| {
        partitions.len() == dims.count()[d]
            && partitions.iter().all(|part| match part.first() {
                Some((first, _)) => part.iter().all(|(k, _)| k.get(d) == first.get(d)),
                None => false,
            })
    })?;
    BlockingStrategy::along_axis(dims, axis).ok()
}
