use std::sync::Arc;

use ndarray::ArrayD;

use crate::strategy::Block;

/// Spatial coordinate, one entry per axis.
pub type Key = Vec<usize>;

/// The part of one image that falls in one block.
#[derive(Debug, Clone)]
pub struct ImageSlice<T> {
    /// Index of the image the slice was cut from.
    pub index: usize,
    pub block: Arc<Block>,
    pub slice: ArrayD<T>,
}

impl<T> ImageSlice<T> {
    pub fn new(index: usize, block: Arc<Block>, slice: ArrayD<T>) -> Self {
        Self {
            index,
            block,
            slice,
        }
    }
}

/// One block of every image stacked along a new leading axis.
///
/// `data` has shape `(nimages, *block.padded_shape())`.
#[derive(Debug, Clone)]
pub struct BlockData<T> {
    pub block: Arc<Block>,
    pub data: ArrayD<T>,
}

impl<T> BlockData<T> {
    pub fn new(block: Arc<Block>, data: ArrayD<T>) -> Self {
        Self { block, data }
    }

    pub fn spatial_key(&self) -> &[usize] {
        &self.block.spatial_key
    }
}
