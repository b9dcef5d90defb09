//! Partitioning of a spatial extent into rectangular blocks.
//!
//! A [`BlockingStrategy`] turns a [`Dimensions`] into an ordered list of [`Block`]s.
//! `Simple` blocks tile the extent exactly; `Padded` blocks carry an extra halo around
//! the same tiles, clipped at the extent boundary.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use crate::dims::{ColumnMajor, Dimensions};
use crate::error::{Result, SeriesError};

/// One rectangular sub-region of the extent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Block {
    /// Origin of `region`; identifies the block across all images.
    pub spatial_key: Vec<usize>,
    /// Ranges owned by this block. Regions of one strategy never overlap.
    pub region: Vec<Range<usize>>,
    /// `region` grown by the halo. Equal to `region` without padding.
    pub padded_region: Vec<Range<usize>>,
}

impl Block {
    pub fn shape(&self) -> Vec<usize> {
        self.region.iter().map(|r| r.len()).collect()
    }

    pub fn padded_shape(&self) -> Vec<usize> {
        self.padded_region.iter().map(|r| r.len()).collect()
    }

    pub fn is_padded(&self) -> bool {
        self.region != self.padded_region
    }

    /// Position of `region` inside `padded_region`.
    pub fn core_within_padding(&self) -> Vec<Range<usize>> {
        self.region
            .iter()
            .zip(&self.padded_region)
            .map(|(r, p)| (r.start - p.start)..(r.end - p.start))
            .collect()
    }
}

/// How to partition the extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockingStrategy {
    Simple {
        splits: Vec<usize>,
    },
    Padded {
        splits: Vec<usize>,
        padding: Vec<usize>,
    },
}

impl BlockingStrategy {
    pub fn simple(splits: impl Into<Vec<usize>>) -> Self {
        BlockingStrategy::Simple {
            splits: splits.into(),
        }
    }

    pub fn padded(splits: impl Into<Vec<usize>>, padding: impl Into<Vec<usize>>) -> Self {
        BlockingStrategy::Padded {
            splits: splits.into(),
            padding: padding.into(),
        }
    }

    /// Padded strategy using the same halo on every axis.
    pub fn padded_uniform(splits: impl Into<Vec<usize>>, padding: usize) -> Self {
        let splits = splits.into();
        let padding = vec![padding; splits.len()];
        BlockingStrategy::Padded { splits, padding }
    }

    pub fn splits(&self) -> &[usize] {
        match self {
            BlockingStrategy::Simple { splits } | BlockingStrategy::Padded { splits, .. } => {
                splits
            }
        }
    }

    pub fn padding(&self) -> Option<&[usize]> {
        match self {
            BlockingStrategy::Simple { .. } => None,
            BlockingStrategy::Padded { padding, .. } => Some(padding),
        }
    }

    /// Number of blocks this strategy produces.
    pub fn nblocks(&self) -> usize {
        self.splits().iter().product()
    }

    /// Checks the strategy against `dims` without touching any data.
    pub fn validate(&self, dims: &Dimensions) -> Result<()> {
        let splits = self.splits();
        if splits.len() != dims.ndim() {
            return Err(SeriesError::config(format!(
                "{} split counts given for {} dimensions {}",
                splits.len(),
                dims.ndim(),
                dims
            )));
        }
        for (axis, (&s, &n)) in splits.iter().zip(dims.count()).enumerate() {
            if s == 0 {
                return Err(SeriesError::config(format!(
                    "split count along axis {axis} must be positive"
                )));
            }
            if s > n {
                return Err(SeriesError::config(format!(
                    "cannot split axis {axis} of extent {n} into {s} blocks"
                )));
            }
        }
        if let Some(padding) = self.padding() {
            if padding.len() != dims.ndim() {
                return Err(SeriesError::config(format!(
                    "{} padding values given for {} dimensions",
                    padding.len(),
                    dims.ndim()
                )));
            }
            for (axis, (&p, &n)) in padding.iter().zip(dims.count()).enumerate() {
                if p > 0 && 2 * p >= n {
                    return Err(SeriesError::config(format!(
                        "padding {p} along axis {axis} must be less than half the extent {n}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Computes the blocks covering `dims`, block grid enumerated first axis fastest.
    pub fn blocks(&self, dims: &Dimensions) -> Result<Vec<Block>> {
        self.validate(dims)?;
        let splits = self.splits();
        let bounds: Vec<Vec<usize>> = splits
            .iter()
            .zip(dims.count())
            .map(|(&s, &n)| (0..=s).map(|i| i * n / s).collect())
            .collect();

        let blocks: Vec<Block> = ColumnMajor::new(splits.to_vec())
            .map(|grid| {
                let region: Vec<Range<usize>> = grid
                    .iter()
                    .enumerate()
                    .map(|(axis, &i)| bounds[axis][i]..bounds[axis][i + 1])
                    .collect();
                let padded_region = match self.padding() {
                    None => region.clone(),
                    Some(padding) => region
                        .iter()
                        .zip(padding)
                        .zip(dims.count())
                        .map(|((r, &p), &n)| r.start.saturating_sub(p)..(r.end + p).min(n))
                        .collect(),
                };
                Block {
                    spatial_key: region.iter().map(|r| r.start).collect(),
                    region,
                    padded_region,
                }
            })
            .collect();

        tracing::debug!(
            "Blocking {} with splits {:?} into {} blocks",
            dims,
            splits,
            blocks.len()
        );
        Ok(blocks)
    }

    /// Derives a simple strategy whose largest block, across `nimages` images of
    /// `element_size` byte values, fits in `block_size` bytes.
    ///
    /// The axis with the largest block extent is split first; ties go to the last
    /// such axis. The result depends only on the arguments.
    pub fn generate_from_block_size(
        dims: &Dimensions,
        nimages: usize,
        element_size: usize,
        block_size: usize,
    ) -> Result<Self> {
        if block_size == 0 {
            return Err(SeriesError::config("target block size must be positive"));
        }
        let count = dims.count();
        let mut splits = vec![1usize; dims.ndim()];
        let extent = |splits: &[usize], axis: usize| count[axis].div_ceil(splits[axis]);
        let block_bytes = |splits: &[usize]| -> usize {
            (0..count.len()).map(|a| extent(splits, a)).product::<usize>()
                * nimages.max(1)
                * element_size
        };

        while block_bytes(&splits) > block_size {
            let widest = (0..count.len())
                .filter(|&a| extent(&splits, a) > 1)
                .max_by_key(|&a| (extent(&splits, a), a));
            let Some(axis) = widest else {
                tracing::warn!(
                    "Block size of {} bytes is below a single point; using unit blocks",
                    block_size
                );
                break;
            };
            // advance to the next split count that actually shrinks the block
            let current = extent(&splits, axis);
            while extent(&splits, axis) == current {
                splits[axis] += 1;
            }
        }
        Ok(BlockingStrategy::Simple { splits })
    }

    /// The single axis split into unit slices with every other axis whole, if any.
    ///
    /// Binary series output writes one file per slice along this axis.
    pub fn grouping_dim(&self, dims: &Dimensions) -> Result<usize> {
        self.validate(dims)?;
        let splits = self.splits();
        let count = dims.count();
        let candidates = (0..count.len()).filter(|&d| {
            splits[d] == count[d] && splits.iter().enumerate().all(|(e, &s)| e == d || s == 1)
        });
        // max_by_key keeps the last maximum, so walk the axes backwards
        candidates
            .rev()
            .max_by_key(|&d| count[d])
            .ok_or_else(|| {
                SeriesError::config(format!(
                    "splits {:?} over {} do not group along a single axis; \
                     binary series need one axis split into unit slices and all others whole",
                    splits, dims
                ))
            })
    }

    /// Simple strategy that slices `dims` into unit slices along `axis`.
    pub fn along_axis(dims: &Dimensions, axis: usize) -> Result<Self> {
        if axis >= dims.ndim() {
            return Err(SeriesError::config(format!(
                "grouping axis {axis} out of range for {dims}"
            )));
        }
        let mut splits = vec![1; dims.ndim()];
        splits[axis] = dims.count()[axis];
        Ok(BlockingStrategy::Simple { splits })
    }
}

impl fmt::Display for BlockingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockingStrategy::Simple { splits } => write!(f, "Simple(splits={splits:?})"),
            BlockingStrategy::Padded { splits, padding } => {
                write!(f, "Padded(splits={splits:?}, padding={padding:?})")
            }
        }
    }
}

/// A partition request, resolved into a [`BlockingStrategy`] once the image
/// dimensions are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionSpec {
    /// Number of blocks along each axis.
    Splits(Vec<usize>),
    /// Target size in bytes of one grouped block.
    BlockSize(usize),
    Strategy(BlockingStrategy),
}

impl PartitionSpec {
    pub fn resolve(
        &self,
        dims: &Dimensions,
        nimages: usize,
        element_size: usize,
    ) -> Result<BlockingStrategy> {
        let strategy = match self {
            PartitionSpec::Splits(splits) => BlockingStrategy::simple(splits.clone()),
            PartitionSpec::BlockSize(bytes) => BlockingStrategy::generate_from_block_size(
                dims,
                nimages,
                element_size,
                *bytes,
            )?,
            PartitionSpec::Strategy(strategy) => strategy.clone(),
        };
        strategy.validate(dims)?;
        Ok(strategy)
    }
}

impl From<BlockingStrategy> for PartitionSpec {
    fn from(strategy: BlockingStrategy) -> Self {
        PartitionSpec::Strategy(strategy)
    }
}

impl From<Vec<usize>> for PartitionSpec {
    fn from(splits: Vec<usize>) -> Self {
        PartitionSpec::Splits(splits)
    }
}

impl<const N: usize> From<[usize; N]> for PartitionSpec {
    fn from(splits: [usize; N]) -> Self {
        PartitionSpec::Splits(splits.to_vec())
    }
}

impl FromStr for PartitionSpec {
    type Err = SeriesError;

    /// Parses `"150M"`, `"64k"`, `"1G"`, `"4096"` as byte sizes and `"4,1,1"` as splits.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let bad = || SeriesError::config(format!("cannot parse partition spec '{s}'"));
        if s.contains(',') {
            let splits = s
                .split(',')
                .map(|part| part.trim().parse::<usize>().map_err(|_| bad()))
                .collect::<Result<Vec<usize>>>()?;
            return Ok(PartitionSpec::Splits(splits));
        }
        let (digits, multiplier) = match s.chars().last() {
            Some('k') | Some('K') => (&s[..s.len() - 1], 1usize << 10),
            Some('m') | Some('M') => (&s[..s.len() - 1], 1 << 20),
            Some('g') | Some('G') => (&s[..s.len() - 1], 1 << 30),
            _ => (s, 1),
        };
        let value = digits.trim().parse::<usize>().map_err(|_| bad())?;
        let bytes = value.checked_mul(multiplier).ok_or_else(bad)?;
        Ok(PartitionSpec::BlockSize(bytes))
    }
}
