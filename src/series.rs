//! Series-indexed collections and packing them into a dense array.

use std::path::Path;

use ndarray::{Array1, ArrayD, Axis, IxDyn};

use crate::binary;
use crate::collection::{Executor, Keyed};
use crate::common::Key;
use crate::dims::Dimensions;
use crate::element::Element;
use crate::error::{Result, SeriesError};
use crate::strategy::BlockingStrategy;

/// Options for [`Series::pack`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackOptions {
    /// Sort records by key before placing them.
    pub sorting: bool,
    /// Reverse the spatial axes of the result. The image axis stays first.
    pub transpose: bool,
}

impl PackOptions {
    pub fn sorted(mut self) -> Self {
        self.sorting = true;
        self
    }

    pub fn transposed(mut self) -> Self {
        self.transpose = true;
        self
    }
}

/// One vector per spatial point holding that point's value in every image.
#[derive(Debug, Clone)]
pub struct Series<T, E> {
    dims: Dimensions,
    nimages: usize,
    /// Blocking the partitions came from, when known.
    strategy: Option<BlockingStrategy>,
    records: Keyed<Key, Array1<T>, E>,
}

impl<T, E> Series<T, E>
where
    T: Element,
    E: Executor,
{
    pub fn new(
        dims: Dimensions,
        nimages: usize,
        strategy: Option<BlockingStrategy>,
        records: Keyed<Key, Array1<T>, E>,
    ) -> Self {
        Self {
            dims,
            nimages,
            strategy,
            records,
        }
    }

    /// Reads a binary series directory written by [`Series::save_binary`].
    pub fn load_binary(dir: impl AsRef<Path>, executor: E) -> Result<Self> {
        binary::load_binary_series(dir.as_ref(), executor)
    }

    /// Writes one data file per slice along the grouping axis, a manifest and a
    /// completion marker.
    pub fn save_binary(&self, dir: impl AsRef<Path>) -> Result<()> {
        binary::save_binary_series(self, dir.as_ref())
    }

    pub fn dims(&self) -> &Dimensions {
        &self.dims
    }

    pub fn nimages(&self) -> usize {
        self.nimages
    }

    pub fn strategy(&self) -> Option<&BlockingStrategy> {
        self.strategy.as_ref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn num_partitions(&self) -> usize {
        self.records.num_partitions()
    }

    pub fn records(&self) -> &Keyed<Key, Array1<T>, E> {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Key, Array1<T>)> {
        self.records.iter()
    }

    /// Every series, partition by partition.
    pub fn collect(self) -> Vec<(Key, Array1<T>)> {
        self.records.collect()
    }

    /// Series whose key satisfies `keep`, partitioning unchanged.
    ///
    /// The selection no longer covers whole blocks, so the blocking is dropped and
    /// the result cannot be saved as a binary series.
    pub fn select_keys<F>(&self, keep: F) -> Self
    where
        F: Fn(&[usize]) -> bool + Send + Sync,
    {
        let records = self.records.flat_map_ref(|k, v| {
            if keep(k) {
                Some((k.clone(), v.clone()))
            } else {
                None
            }
        });
        Self {
            dims: self.dims.clone(),
            nimages: self.nimages,
            strategy: None,
            records,
        }
    }

    /// Materializes the collection as one array of shape `(nimages, *dims)`.
    ///
    /// Every key of the extent must be present exactly once. The image axis is
    /// dropped when there is a single image.
    ///
    /// # Arguments
    ///
    /// * `options` - `sorting` places records in key order first; `transpose`
    ///   reverses the spatial axes of the result.
    ///
    /// # Returns
    ///
    /// The dense array, or a `Configuration` error naming the first duplicate,
    /// missing or out-of-range key.
    pub fn pack(&self, options: PackOptions) -> Result<ArrayD<T>> {
        let mut records: Vec<&(Key, Array1<T>)> = self.records.iter().collect();
        if options.sorting {
            records.sort_by(|a, b| a.0.cmp(&b.0));
        }

        let mut shape = Vec::with_capacity(self.dims.ndim() + 1);
        shape.push(self.nimages);
        shape.extend_from_slice(self.dims.count());
        let mut packed = ArrayD::from_elem(IxDyn(&shape), T::default());

        let mut seen = vec![false; self.dims.size()];
        let mut index = vec![0; shape.len()];
        for (key, values) in records {
            if !self.dims.contains(key) {
                return Err(SeriesError::config(format!(
                    "series key {key:?} lies outside {}",
                    self.dims
                )));
            }
            if values.len() != self.nimages {
                return Err(SeriesError::ShapeMismatch(format!(
                    "series {key:?} has {} values, expected {}",
                    values.len(),
                    self.nimages
                )));
            }
            let offset = self.dims.column_major_offset(key);
            if std::mem::replace(&mut seen[offset], true) {
                return Err(SeriesError::config(format!(
                    "series key {key:?} appears more than once"
                )));
            }
            index[1..].copy_from_slice(key);
            for (i, value) in values.iter().enumerate() {
                index[0] = i;
                packed[index.as_slice()] = *value;
            }
        }
        if let Some(missing) = seen.iter().position(|&s| !s) {
            let key = self.dims.indices().nth(missing);
            return Err(SeriesError::config(format!(
                "series key {:?} is missing",
                key.unwrap_or_default()
            )));
        }

        if options.transpose {
            let mut axes: Vec<usize> = (1..shape.len()).rev().collect();
            axes.insert(0, 0);
            packed = packed.permuted_axes(IxDyn(&axes));
        }
        if self.nimages == 1 {
            packed = packed.index_axis_move(Axis(0), 0);
        }
        tracing::debug!("Packed {} series into shape {:?}", self.len(), packed.shape());
        Ok(packed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Serial;
    use crate::error::ErrorKind;
    use crate::images::Images;
    use crate::strategy::PartitionSpec;
    use ndarray::{array, Array};

    fn ramp(shape: &[usize]) -> ArrayD<i16> {
        let n: usize = shape.iter().product();
        Array::from_iter((0..n).map(|i| i as i16))
            .into_shape(IxDyn(shape))
            .unwrap()
    }

    fn series_of(records: Vec<(Key, Array1<i16>)>, shape: &[usize]) -> Series<i16, Serial> {
        Series::new(
            Dimensions::from_shape(shape).unwrap(),
            records.first().map(|(_, v)| v.len()).unwrap_or(1),
            None,
            Keyed::from_partitions(vec![records], Serial),
        )
    }

    #[test]
    fn pack_places_by_key_in_any_order() {
        let series = series_of(
            vec![
                (vec![1, 1], array![4, 40]),
                (vec![0, 0], array![1, 10]),
                (vec![1, 0], array![3, 30]),
                (vec![0, 1], array![2, 20]),
            ],
            &[2, 2],
        );
        let unsorted = series.pack(PackOptions::default()).unwrap();
        let sorted = series.pack(PackOptions::default().sorted()).unwrap();
        assert_eq!(unsorted.shape(), &[2, 2, 2]);
        assert_eq!(unsorted, sorted);
        assert_eq!(
            unsorted.index_axis(Axis(0), 1),
            array![[10i16, 20], [30, 40]].into_dyn()
        );
    }

    #[test]
    fn pack_detects_duplicate_and_missing_keys() {
        let duplicate = series_of(
            vec![(vec![0], array![1]), (vec![0], array![2])],
            &[2],
        );
        assert_eq!(
            duplicate.pack(PackOptions::default()).unwrap_err().kind(),
            ErrorKind::Configuration
        );
        let missing = series_of(vec![(vec![1], array![1])], &[2]);
        let err = missing.pack(PackOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("[0]"));
        let outside = series_of(vec![(vec![0], array![1]), (vec![2], array![1])], &[2]);
        assert!(outside.pack(PackOptions::default()).is_err());
    }

    #[test]
    fn pack_checks_value_length() {
        let ragged = series_of(
            vec![(vec![0], array![1, 2]), (vec![1], array![3])],
            &[2],
        );
        assert_eq!(
            ragged.pack(PackOptions::default()).unwrap_err().kind(),
            ErrorKind::ShapeMismatch
        );
    }

    #[test]
    fn pack_two_dimensional_with_transpose() {
        let ary = ramp(&[2, 4]);
        let images = Images::from_arrays(vec![ary.clone()], Serial).unwrap();
        let spec: PartitionSpec = "150M".parse().unwrap();
        let series = images.to_series(spec).unwrap();
        let keys: Vec<Key> = series.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(&keys[..4], &[vec![0, 0], vec![1, 0], vec![0, 1], vec![1, 1]]);
        assert_eq!(series.pack(PackOptions::default()).unwrap(), ary);
        assert_eq!(
            series.pack(PackOptions::default().transposed()).unwrap(),
            ary.t()
        );
    }

    #[test]
    fn transpose_keeps_image_axis_first() {
        let images = Images::from_arrays(vec![ramp(&[3, 4, 2]), ramp(&[3, 4, 2])], Serial)
            .unwrap();
        let packed = images
            .to_series([3, 1, 1])
            .unwrap()
            .pack(PackOptions::default().transposed())
            .unwrap();
        assert_eq!(packed.shape(), &[2, 2, 4, 3]);
        assert_eq!(packed[[1, 1, 2, 0]], ramp(&[3, 4, 2])[[0, 2, 1]]);
    }

    #[test]
    fn select_keys_filters() {
        let images = Images::from_arrays(vec![ramp(&[4, 3])], Serial).unwrap();
        let series = images.to_series([2, 1]).unwrap();
        let row = series.select_keys(|k| k[0] == 1);
        assert_eq!(row.len(), 3);
        assert_eq!(row.num_partitions(), 2);
        assert!(row.strategy().is_none());
    }
}
