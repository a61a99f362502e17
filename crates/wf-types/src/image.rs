//! Dense n-dimensional images exchanged between pipeline tasks and metrics.

use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, WfError, WfResult};
use crate::validation_error;

/// A dense, row-major image of `f64` samples.
///
/// Binary masks and label maps are stored in the same representation; their
/// samples are integral values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawImage")]
pub struct Image {
    shape: Vec<usize>,
    data: Vec<f64>,
}

/// Wire form of [`Image`], checked by [`Image::new`] on the way in.
#[derive(Deserialize)]
struct RawImage {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl TryFrom<RawImage> for Image {
    type Error = WfError;

    fn try_from(raw: RawImage) -> WfResult<Self> {
        Image::new(raw.shape, raw.data)
    }
}

impl Image {
    /// Create an image, checking that `data` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> WfResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(validation_error!(
                "image of shape {:?} needs {} samples, got {}",
                shape,
                expected,
                data.len()
            ));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    /// Build a 2D image from equally long rows.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> WfResult<Self> {
        let height = rows.len();
        let width = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(height * width);
        for (y, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != width {
                return Err(validation_error!(
                    "row {} has {} samples, expected {}",
                    y,
                    row.len(),
                    width
                ));
            }
            data.extend_from_slice(row);
        }
        Self::new(vec![height, width], data)
    }

    /// Build a 2D image by sampling `f(y, x)` at every pixel.
    pub fn from_fn(height: usize, width: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(height * width);
        for y in 0..height {
            for x in 0..width {
                data.push(f(y, x));
            }
        }
        Self {
            shape: vec![height, width],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn same_shape(&self, other: &Image) -> bool {
        self.shape == other.shape
    }

    /// Height and width of a 2D image.
    pub fn dims2(&self) -> WfResult<(usize, usize)> {
        match self.shape.as_slice() {
            [h, w] => Ok((*h, *w)),
            other => Err(validation_error!("expected a 2D image, got shape {:?}", other)),
        }
    }

    /// Apply `f` to every sample, keeping the shape.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Image {
        Image {
            shape: self.shape.clone(),
            data: self.data.iter().map(|v| f(*v)).collect(),
        }
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn max(&self) -> Option<f64> {
        self.data.iter().copied().reduce(f64::max)
    }
}

/// Require a 2D image for the given task argument.
pub fn require_2d(image: &Image, task: &str) -> Result<(usize, usize), PipelineError> {
    image.dims2().map_err(|e| PipelineError::Evaluation {
        task: task.to_string(),
        message: e.to_string(),
    })
}
