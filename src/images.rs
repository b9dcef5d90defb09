//! Image-indexed collections and the image to block extractor.

use std::ops::Range;
use std::sync::Arc;

use ndarray::{ArrayD, Slice};
use num_traits::AsPrimitive;

use crate::blocks::Blocks;
use crate::collection::{Executor, Keyed};
use crate::common::{ImageSlice, Key};
use crate::dims::Dimensions;
use crate::element::Element;
use crate::error::{Result, SeriesError};
use crate::series::Series;
use crate::strategy::{BlockingStrategy, PartitionSpec};

/// A keyed set of same-shaped arrays, one per acquisition index.
#[derive(Debug, Clone)]
pub struct Images<T, E> {
    dims: Dimensions,
    /// Image indices in ascending order.
    indices: Arc<Vec<usize>>,
    records: Keyed<usize, ArrayD<T>, E>,
}

impl<T, E> Images<T, E>
where
    T: Element,
    E: Executor,
{
    /// Images indexed `0..arrays.len()`.
    pub fn from_arrays(arrays: Vec<ArrayD<T>>, executor: E) -> Result<Self> {
        Self::from_indexed(arrays.into_iter().enumerate().collect(), executor)
    }

    /// Images with explicit indices.
    ///
    /// The first array fixes the dimensions; every other array must share them.
    pub fn from_indexed(images: Vec<(usize, ArrayD<T>)>, executor: E) -> Result<Self> {
        let (_, first) = images
            .first()
            .ok_or_else(|| SeriesError::config("an image collection needs at least one image"))?;
        let dims = Dimensions::from_shape(first.shape())?;
        for (index, array) in &images {
            if array.shape() != dims.count() {
                return Err(SeriesError::ShapeMismatch(format!(
                    "image {index} has shape {:?}, expected {dims}",
                    array.shape()
                )));
            }
        }
        let mut indices: Vec<usize> = images.iter().map(|(index, _)| *index).collect();
        indices.sort_unstable();
        if let Some(pair) = indices.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(SeriesError::config(format!(
                "image index {} appears more than once",
                pair[0]
            )));
        }
        tracing::debug!("Loaded {} images of shape {}", indices.len(), dims);
        Ok(Self {
            dims,
            indices: Arc::new(indices),
            records: Keyed::from_records(images, executor),
        })
    }

    pub(crate) fn from_parts(
        dims: Dimensions,
        indices: Arc<Vec<usize>>,
        records: Keyed<usize, ArrayD<T>, E>,
    ) -> Self {
        Self {
            dims,
            indices,
            records,
        }
    }

    pub fn dims(&self) -> &Dimensions {
        &self.dims
    }

    pub fn nimages(&self) -> usize {
        self.indices.len()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Every image, ordered by index.
    pub fn collect(self) -> Vec<(usize, ArrayD<T>)> {
        let mut images = self.records.collect();
        images.sort_by_key(|(index, _)| *index);
        images
    }

    /// Converts every value to another element type with `as` semantics.
    pub fn cast<U>(self) -> Images<U, E>
    where
        T: AsPrimitive<U>,
        U: Element,
    {
        Images {
            dims: self.dims,
            indices: self.indices,
            records: self.records.map_values(|array| array.mapv(|x| x.as_())),
        }
    }

    /// Cuts every image into the blocks of `strategy`, keyed by block origin.
    ///
    /// Padded strategies cut the padded region.
    pub fn extract(&self, strategy: &BlockingStrategy) -> Result<Keyed<Key, ImageSlice<T>, E>> {
        let blocks: Vec<_> = strategy
            .blocks(&self.dims)?
            .into_iter()
            .map(Arc::new)
            .collect();
        Ok(self.records.flat_map_ref(move |index, array| {
            blocks
                .iter()
                .map(|block| {
                    let slice = slice_region(array, &block.padded_region);
                    (
                        block.spatial_key.clone(),
                        ImageSlice::new(*index, block.clone(), slice),
                    )
                })
                .collect::<Vec<_>>()
        }))
    }

    /// Partitions the images and groups each block across all images.
    ///
    /// The partition request is resolved and validated against the image
    /// dimensions before any slicing happens.
    ///
    /// # Arguments
    ///
    /// * `spec` - Split counts per axis, a target block size in bytes, or a full
    ///   `BlockingStrategy`.
    ///
    /// # Returns
    ///
    /// A `Blocks` collection with one record per block, in block-grid order. Each
    /// record stacks the block of every image along a new leading axis.
    pub fn to_blocks(&self, spec: impl Into<PartitionSpec>) -> Result<Blocks<T, E>> {
        let strategy = spec.into().resolve(&self.dims, self.nimages(), T::SIZE)?;
        tracing::debug!("Partitioning {} images with {}", self.nimages(), strategy);
        let slices = self.extract(&strategy)?;
        Blocks::regroup(
            slices,
            self.dims.clone(),
            self.indices.clone(),
            strategy,
        )
    }

    /// Shortcut for `to_blocks(spec)?.to_series()`.
    pub fn to_series(&self, spec: impl Into<PartitionSpec>) -> Result<Series<T, E>> {
        Ok(self.to_blocks(spec)?.to_series())
    }
}

pub(crate) fn slice_region<T: Clone>(array: &ArrayD<T>, region: &[Range<usize>]) -> ArrayD<T> {
    array
        .slice_each_axis(|ax| Slice::from(region[ax.axis.index()].clone()))
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Serial;
    use crate::error::ErrorKind;
    use ndarray::{Array, IxDyn};

    fn ramp(shape: &[usize], start: i16) -> ArrayD<i16> {
        let n: usize = shape.iter().product();
        Array::from_iter((0..n).map(|i| start + i as i16))
            .into_shape(IxDyn(shape))
            .unwrap()
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let err = Images::from_arrays(vec![ramp(&[4, 3], 0), ramp(&[3, 4], 0)], Serial)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    }

    #[test]
    fn rejects_duplicate_indices_and_empty_input() {
        let err = Images::from_indexed(vec![(2, ramp(&[2], 0)), (2, ramp(&[2], 5))], Serial)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let err = Images::<i16, _>::from_arrays(vec![], Serial).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn extract_slices_every_image() {
        let images =
            Images::from_arrays(vec![ramp(&[2, 4], 0), ramp(&[2, 4], 100)], Serial).unwrap();
        let strategy = BlockingStrategy::simple([1, 2]);
        let slices = images.extract(&strategy).unwrap().collect();
        assert_eq!(slices.len(), 4);
        let (key, slice) = &slices[1];
        assert_eq!(key, &vec![0, 2]);
        assert_eq!(slice.index, 0);
        assert_eq!(slice.slice, ramp(&[2, 4], 0).slice_each_axis(|ax| {
            if ax.axis.index() == 1 {
                Slice::from(2..4usize)
            } else {
                Slice::from(..)
            }
        }));
        assert_eq!(slices[3].1.index, 1);
    }

    #[test]
    fn extract_cuts_padded_regions() {
        let images = Images::from_arrays(vec![ramp(&[6], 0)], Serial).unwrap();
        let strategy = BlockingStrategy::padded([3], [1]);
        let sizes: Vec<usize> = images
            .extract(&strategy)
            .unwrap()
            .collect()
            .into_iter()
            .map(|(_, s)| s.slice.len())
            .collect();
        assert_eq!(sizes, vec![3, 4, 3]);
    }

    #[test]
    fn cast_converts_values() {
        let images = Images::from_arrays(vec![ramp(&[3], 250)], Serial).unwrap();
        let floats = images.cast::<f32>();
        let (_, array) = floats.collect().remove(0);
        assert_eq!(array.as_slice().unwrap(), &[250.0, 251.0, 252.0]);
    }

    #[test]
    fn collect_orders_by_index() {
        let images =
            Images::from_indexed(vec![(7, ramp(&[2], 0)), (3, ramp(&[2], 9))], Serial).unwrap();
        assert_eq!(images.indices(), &[3, 7]);
        let order: Vec<usize> = images.collect().into_iter().map(|(i, _)| i).collect();
        assert_eq!(order, vec![3, 7]);
    }
}
