//! Block-partitioned collections: regrouping image slices into blocks, expanding
//! blocks into series and reassembling them into images.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, ArrayD, ArrayViewD, Axis, IxDyn, Slice};

use crate::collection::{Executor, Keyed};
use crate::common::{BlockData, ImageSlice, Key};
use crate::dims::{ColumnMajor, Dimensions};
use crate::element::Element;
use crate::error::{Result, SeriesError};
use crate::images::Images;
use crate::series::Series;
use crate::strategy::BlockingStrategy;

/// Every block of the extent, each holding that block of all images.
#[derive(Debug, Clone)]
pub struct Blocks<T, E> {
    dims: Dimensions,
    indices: Arc<Vec<usize>>,
    strategy: BlockingStrategy,
    records: Keyed<Key, BlockData<T>, E>,
}

impl<T, E> Blocks<T, E>
where
    T: Element,
    E: Executor,
{
    /// Groups extracted slices by block origin and stacks each group in index order.
    pub(crate) fn regroup(
        slices: Keyed<Key, ImageSlice<T>, E>,
        dims: Dimensions,
        indices: Arc<Vec<usize>>,
        strategy: BlockingStrategy,
    ) -> Result<Self> {
        let expected = indices.clone();
        let records = slices
            .group_by_key()
            .try_map_values(move |key, group| stack_slices(key, group, &expected))?;
        tracing::debug!("Grouped {} blocks across {} images", records.len(), indices.len());
        Ok(Self {
            dims,
            indices,
            strategy,
            records,
        })
    }

    pub fn dims(&self) -> &Dimensions {
        &self.dims
    }

    pub fn nimages(&self) -> usize {
        self.indices.len()
    }

    pub fn strategy(&self) -> &BlockingStrategy {
        &self.strategy
    }

    pub fn num_blocks(&self) -> usize {
        self.records.len()
    }

    /// Every block in block-grid order.
    pub fn collect(self) -> Vec<(Key, BlockData<T>)> {
        self.records.collect()
    }

    /// Expands every block into one series per point of its unpadded region.
    ///
    /// Series keep their block as partition, in first-axis-fastest order.
    pub fn to_series(&self) -> Series<T, E> {
        let records = self.records.flat_map_ref(|_, block| expand_block(block));
        Series::new(
            self.dims.clone(),
            self.nimages(),
            Some(self.strategy.clone()),
            records,
        )
    }

    /// Reassembles full images, dropping any padding.
    ///
    /// # Returns
    ///
    /// An `Images` collection with the original indices and dimensions, or a
    /// `Configuration` error when the blocks of an image do not cover its extent.
    pub fn to_images(&self) -> Result<Images<T, E>> {
        let indices = self.indices.clone();
        let layers = self.records.flat_map_ref(move |_, block| {
            let region = block.block.region.clone();
            strip_padding(block)
                .outer_iter()
                .enumerate()
                .map(|(layer, view)| (indices[layer], (region.clone(), view.to_owned())))
                .collect::<Vec<_>>()
        });

        let dims = self.dims.clone();
        let records = layers
            .group_by_key()
            .try_map_values(move |index, parts| assemble_image(*index, &dims, parts))?;
        tracing::debug!("Reassembled {} images from {} blocks", records.len(), self.num_blocks());
        Ok(Images::from_parts(
            self.dims.clone(),
            self.indices.clone(),
            records,
        ))
    }

    /// Writes the series of these blocks as a binary series directory.
    ///
    /// # Arguments
    ///
    /// * `dir` - The output directory. Data files and the marker of an earlier
    ///   write are replaced.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the completion marker is written. The blocking must split
    /// exactly one axis into unit slices, otherwise a `Configuration` error is
    /// returned before any expansion or I/O.
    pub fn save_binary_series(&self, dir: impl AsRef<Path>) -> Result<()> {
        // fail on the geometry before any expansion work
        self.strategy.grouping_dim(&self.dims)?;
        self.to_series().save_binary(dir)
    }
}

fn stack_slices<T: Element>(
    key: &Key,
    mut group: Vec<ImageSlice<T>>,
    expected: &[usize],
) -> Result<BlockData<T>> {
    let block = match group.first() {
        Some(first) => first.block.clone(),
        None => return Err(SeriesError::config(format!("block {key:?} is empty"))),
    };
    if group.iter().any(|s| s.block != block) {
        return Err(SeriesError::config(format!(
            "more than one block maps to spatial key {key:?}"
        )));
    }
    group.sort_by_key(|s| s.index);
    if group.len() != expected.len() || group.iter().zip(expected).any(|(s, i)| s.index != *i) {
        let found: Vec<usize> = group.iter().map(|s| s.index).collect();
        return Err(SeriesError::config(format!(
            "block {key:?} holds images {found:?}, expected {expected:?}"
        )));
    }
    let views: Vec<ArrayViewD<T>> = group.iter().map(|s| s.slice.view()).collect();
    let data = ndarray::stack(Axis(0), &views)?;
    Ok(BlockData::new(block, data))
}

/// View of the unpadded region, leading image axis kept whole.
fn strip_padding<T>(block: &BlockData<T>) -> ArrayViewD<'_, T> {
    let core = block.block.core_within_padding();
    block.data.slice_each_axis(|ax| match ax.axis.index() {
        0 => Slice::from(..),
        axis => Slice::from(core[axis - 1].clone()),
    })
}

fn expand_block<T: Element>(block: &BlockData<T>) -> Vec<(Key, Array1<T>)> {
    let core = strip_padding(block);
    let nimages = core.len_of(Axis(0));
    let region = &block.block.region;
    let mut index = vec![0; core.ndim()];
    ColumnMajor::new(block.block.shape())
        .map(|local| {
            index[1..].copy_from_slice(&local);
            let values = Array1::from_iter((0..nimages).map(|i| {
                index[0] = i;
                core[index.as_slice()]
            }));
            let key = local
                .iter()
                .zip(region)
                .map(|(offset, range)| range.start + offset)
                .collect();
            (key, values)
        })
        .collect()
}

fn assemble_image<T: Element>(
    index: usize,
    dims: &Dimensions,
    parts: Vec<(Vec<Range<usize>>, ArrayD<T>)>,
) -> Result<ArrayD<T>> {
    let mut image = ArrayD::from_elem(IxDyn(dims.count()), T::default());
    let mut filled = 0;
    for (region, layer) in parts {
        image
            .slice_each_axis_mut(|ax| Slice::from(region[ax.axis.index()].clone()))
            .assign(&layer);
        filled += layer.len();
    }
    if filled != dims.size() {
        return Err(SeriesError::config(format!(
            "blocks of image {index} cover {filled} of {} points",
            dims.size()
        )));
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Serial;
    use crate::error::ErrorKind;
    use crate::strategy::Block;
    use ndarray::Array;

    fn ramp(shape: &[usize], start: i16) -> ArrayD<i16> {
        let n: usize = shape.iter().product();
        Array::from_iter((0..n).map(|i| start + i as i16))
            .into_shape(IxDyn(shape))
            .unwrap()
    }

    #[test]
    fn blocks_stack_images_on_leading_axis() {
        let ary = ramp(&[2, 4], 0);
        let images = Images::from_arrays(vec![ary.clone()], Serial).unwrap();
        let blocks = images.to_blocks([1, 2]).unwrap().collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].0, vec![0, 0]);
        assert_eq!(blocks[0].1.data.shape(), &[1, 2, 2]);
        assert_eq!(
            blocks[0].1.data.iter().copied().collect::<Vec<_>>(),
            vec![0, 1, 4, 5]
        );
        assert_eq!(blocks[1].1.spatial_key(), &[0, 2]);
        assert_eq!(
            blocks[1].1.data.iter().copied().collect::<Vec<_>>(),
            vec![2, 3, 6, 7]
        );
    }

    #[test]
    fn series_keys_follow_block_then_column_major_order() {
        let ary = ramp(&[4, 2], 0);
        let images = Images::from_arrays(vec![ary], Serial).unwrap();
        let series = images.to_series([2, 1]).unwrap();
        let keys: Vec<Key> = series.collect().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                vec![0, 0],
                vec![1, 0],
                vec![0, 1],
                vec![1, 1],
                vec![2, 0],
                vec![3, 0],
                vec![2, 1],
                vec![3, 1]
            ]
        );
    }

    #[test]
    fn padding_is_not_expanded_into_series() {
        let images = Images::from_arrays(vec![ramp(&[6, 5], 0), ramp(&[6, 5], 50)], Serial)
            .unwrap();
        let series = images
            .to_series(BlockingStrategy::padded([3, 2], [1, 1]))
            .unwrap();
        assert_eq!(series.len(), 30);
        assert_eq!(series.num_partitions(), 6);
    }

    #[test]
    fn conflicting_blocks_for_one_key_are_rejected() {
        let wide = Arc::new(Block {
            spatial_key: vec![0],
            region: vec![0..2],
            padded_region: vec![0..2],
        });
        let narrow = Arc::new(Block {
            spatial_key: vec![0],
            region: vec![0..1],
            padded_region: vec![0..1],
        });
        let group = vec![
            ImageSlice::new(0, wide, ramp(&[2], 0)),
            ImageSlice::new(1, narrow, ramp(&[1], 0)),
        ];
        let err = stack_slices(&vec![0], group, &[0, 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn missing_image_in_group_is_rejected() {
        let block = Arc::new(Block {
            spatial_key: vec![0],
            region: vec![0..2],
            padded_region: vec![0..2],
        });
        let group = vec![ImageSlice::new(0, block, ramp(&[2], 0))];
        let err = stack_slices(&vec![0], group, &[0, 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn round_trip_keeps_sparse_indices() {
        let originals = vec![(4, ramp(&[5, 3], 0)), (9, ramp(&[5, 3], 20))];
        let images = Images::from_indexed(originals.clone(), Serial).unwrap();
        let restored = images
            .to_blocks(BlockingStrategy::padded([2, 3], [1, 0]))
            .unwrap()
            .to_images()
            .unwrap()
            .collect();
        assert_eq!(restored, originals);
    }
}
