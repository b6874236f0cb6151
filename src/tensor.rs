//! Dense float tensors exchanged with classifier graphs

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::types::Landmark;

/// Landmarks consumed by the classifier graphs (normalized + world pose)
pub const CLASSIFIER_LANDMARK_COUNT: usize = 66;

/// Values written per landmark: x, y, z, visibility
pub const VALUES_PER_LANDMARK: usize = 4;

/// Input tensor shape of the classifier graphs
pub const CLASSIFIER_INPUT_SHAPE: [usize; 3] = [1, CLASSIFIER_LANDMARK_COUNT, VALUES_PER_LANDMARK];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; len],
        }
    }

    /// Build a tensor from existing values; `data` must fill `shape` exactly.
    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> Result<Self, GraphError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(GraphError::InvalidInput(format!(
                "tensor of shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// 1-D tensor holding `values`
    pub fn vector(values: Vec<f32>) -> Self {
        Self {
            shape: vec![values.len()],
            data: values,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Overwrite the leading values with `landmarks` as (x, y, z, visibility) rows.
    ///
    /// Values past the written rows keep their previous contents.
    pub fn write_landmarks(&mut self, landmarks: &[Landmark]) -> Result<(), GraphError> {
        let needed = landmarks.len() * VALUES_PER_LANDMARK;
        if needed > self.data.len() {
            return Err(GraphError::InvalidInput(format!(
                "{} landmarks do not fit a tensor of shape {:?}",
                landmarks.len(),
                self.shape
            )));
        }

        for (row, lm) in self.data.chunks_exact_mut(VALUES_PER_LANDMARK).zip(landmarks) {
            row[0] = lm.x;
            row[1] = lm.y;
            row[2] = lm.z;
            row[3] = lm.visibility;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_landmarks_layout() {
        let mut tensor = Tensor::zeros(&CLASSIFIER_INPUT_SHAPE);
        assert_eq!(tensor.len(), 264);

        let landmarks = vec![Landmark::new(1.0, 2.0, 3.0, 0.5), Landmark::new(4.0, 5.0, 6.0, 0.25)];
        tensor.write_landmarks(&landmarks).unwrap();

        assert_eq!(&tensor.data()[..8], &[1.0, 2.0, 3.0, 0.5, 4.0, 5.0, 6.0, 0.25]);
        assert!(tensor.data()[8..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_write_too_many_landmarks() {
        let mut tensor = Tensor::zeros(&[1, 2, 4]);
        let landmarks = vec![Landmark::default(); 3];
        assert!(tensor.write_landmarks(&landmarks).is_err());
    }

    #[test]
    fn test_from_vec_shape_mismatch() {
        assert!(Tensor::from_vec(&[2, 2], vec![1.0; 3]).is_err());
        assert!(Tensor::from_vec(&[2, 2], vec![1.0; 4]).is_ok());
    }
}
