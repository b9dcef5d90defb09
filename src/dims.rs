use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeriesError};

/// Spatial extent shared by every image of a collection.
///
/// Derived once from the first observed array shape and never changed after.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dimensions(Vec<usize>);

impl Dimensions {
    /// Build dimensions from an array shape. Every axis must be non-empty.
    pub fn from_shape(shape: &[usize]) -> Result<Self> {
        if shape.is_empty() {
            return Err(SeriesError::ShapeMismatch(
                "images must have at least one spatial axis".to_string(),
            ));
        }
        if let Some(axis) = shape.iter().position(|&n| n == 0) {
            return Err(SeriesError::ShapeMismatch(format!(
                "axis {axis} of shape {shape:?} is empty"
            )));
        }
        Ok(Dimensions(shape.to_vec()))
    }

    pub fn count(&self) -> &[usize] {
        &self.0
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Number of spatial points.
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    pub fn nbytes(&self, element_size: usize) -> usize {
        self.size() * element_size
    }

    pub fn contains(&self, key: &[usize]) -> bool {
        key.len() == self.0.len() && key.iter().zip(&self.0).all(|(k, n)| k < n)
    }

    /// Offset of `key` in a first-axis-fastest flattening of the extent.
    pub(crate) fn column_major_offset(&self, key: &[usize]) -> usize {
        let mut offset = 0;
        let mut stride = 1;
        for (k, n) in key.iter().zip(&self.0) {
            offset += k * stride;
            stride *= n;
        }
        offset
    }

    /// Every coordinate of the extent, first axis fastest.
    pub fn indices(&self) -> ColumnMajor {
        ColumnMajor::new(self.0.clone())
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|n| n.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Iterator over the coordinates of a shape with the first axis varying fastest.
#[derive(Debug, Clone)]
pub struct ColumnMajor {
    shape: Vec<usize>,
    next: Option<Vec<usize>>,
}

impl ColumnMajor {
    pub fn new(shape: Vec<usize>) -> Self {
        let next = if shape.iter().any(|&n| n == 0) {
            None
        } else {
            Some(vec![0; shape.len()])
        };
        Self { shape, next }
    }
}

impl Iterator for ColumnMajor {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.next.take()?;
        let mut following = current.clone();
        for (axis, n) in self.shape.iter().enumerate() {
            following[axis] += 1;
            if following[axis] < *n {
                self.next = Some(following);
                break;
            }
            following[axis] = 0;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_axes() {
        assert!(Dimensions::from_shape(&[]).is_err());
        assert!(Dimensions::from_shape(&[3, 0, 2]).is_err());
    }

    #[test]
    fn sizes() {
        let dims = Dimensions::from_shape(&[4, 3, 3]).unwrap();
        assert_eq!(dims.ndim(), 3);
        assert_eq!(dims.size(), 36);
        assert_eq!(dims.nbytes(2), 72);
        assert_eq!(dims.to_string(), "(4, 3, 3)");
        assert!(dims.contains(&[3, 2, 2]));
        assert!(!dims.contains(&[4, 0, 0]));
        assert!(!dims.contains(&[0, 0]));
    }

    #[test]
    fn indices_run_first_axis_fastest() {
        let dims = Dimensions::from_shape(&[2, 3]).unwrap();
        let keys: Vec<Vec<usize>> = dims.indices().collect();
        assert_eq!(
            keys,
            vec![
                vec![0, 0],
                vec![1, 0],
                vec![0, 1],
                vec![1, 1],
                vec![0, 2],
                vec![1, 2]
            ]
        );
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(dims.column_major_offset(key), i);
        }
    }

    #[test]
    fn single_point_extent() {
        let dims = Dimensions::from_shape(&[1, 1]).unwrap();
        assert_eq!(dims.indices().count(), 1);
    }
}
