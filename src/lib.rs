//! Convert between image-indexed and series-indexed views of the same data.
//!
//! An [`Images`] collection holds one N-dimensional array per acquisition index.
//! Partitioning it with a [`BlockingStrategy`] gives [`Blocks`], each block holding
//! the same sub-region of every image. Blocks expand into a [`Series`] collection
//! (one vector per spatial point) or reassemble into the original images. A series
//! can be packed into one dense array or written to, and read back from, the flat
//! binary series format in [`binary`].
//!
//! ```no_run
//! use ndarray::ArrayD;
//! use seriesnii::{Images, PackOptions, Serial};
//!
//! # fn main() -> seriesnii::Result<()> {
//! let arrays: Vec<ArrayD<i16>> = vec![ArrayD::zeros(vec![4, 3, 3]); 3];
//! let images = Images::from_arrays(arrays, Serial)?;
//! let blocks = images.to_blocks([4, 1, 1])?;
//! let series = blocks.to_series();
//! let packed = series.pack(PackOptions::default())?;
//! assert_eq!(packed.shape(), &[3, 4, 3, 3]);
//! blocks.save_binary_series("series-out")?;
//! # Ok(())
//! # }
//! ```

pub mod binary;
pub mod blocks;
pub mod collection;
pub mod common;
pub mod dims;
pub mod element;
pub mod error;
pub mod images;
pub mod series;
pub mod strategy;

pub use blocks::Blocks;
pub use collection::{Executor, Keyed, Serial, Threaded};
pub use common::{BlockData, ImageSlice, Key};
pub use dims::Dimensions;
pub use element::Element;
pub use error::{ErrorKind, Result, SeriesError};
pub use images::Images;
pub use series::{PackOptions, Series};
pub use strategy::{Block, BlockingStrategy, PartitionSpec};
