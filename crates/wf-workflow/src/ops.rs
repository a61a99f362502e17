//! Built-in 2D image operations.
//!
//! These are small, deterministic building blocks for assembling workflows;
//! each declares which of its parameters the optimizer may tune.

use std::collections::VecDeque;
use std::sync::Arc;

use wf_types::{
    image_arg, numeric_arg, require_2d, Image, Operation, ParameterSpec, PipelineError, Value,
    WfResult,
};

/// Mean filter over a square window of the given radius.
pub struct BoxBlur {
    parameters: Vec<ParameterSpec>,
}

impl BoxBlur {
    pub fn shared() -> Arc<dyn Operation> {
        Arc::new(Self {
            parameters: vec![ParameterSpec::input("image"), ParameterSpec::numeric("radius")],
        })
    }
}

impl Operation for BoxBlur {
    fn name(&self) -> &str {
        "box_blur"
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    fn call(&self, args: &[Value]) -> WfResult<Value> {
        let img = image_arg(self.name(), args, 0)?;
        let radius = numeric_arg(self.name(), args, 1)?;
        if !radius.is_finite() || radius < 0.0 {
            return Err(PipelineError::Evaluation {
                task: self.name().to_string(),
                message: format!("radius must be a non-negative number, got {radius}"),
            }
            .into());
        }
        let (h, w) = require_2d(img, self.name())?;
        let r = radius.round() as usize;
        if r == 0 {
            return Ok(Value::Image(img.clone()));
        }

        // Summed-area table, one extra row and column of zeros.
        let stride = w + 1;
        let mut integral = vec![0.0; (h + 1) * stride];
        for y in 0..h {
            let mut row = 0.0;
            for x in 0..w {
                row += img.data()[y * w + x];
                integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row;
            }
        }

        let out = Image::from_fn(h, w, |y, x| {
            let y0 = y.saturating_sub(r);
            let x0 = x.saturating_sub(r);
            let y1 = (y + r + 1).min(h);
            let x1 = (x + r + 1).min(w);
            let total = integral[y1 * stride + x1]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0]
                + integral[y0 * stride + x0];
            total / ((y1 - y0) * (x1 - x0)) as f64
        });
        Ok(Value::Image(out))
    }
}

/// Binarize: 1 where the sample exceeds `level`, else 0.
pub struct Threshold {
    parameters: Vec<ParameterSpec>,
}

impl Threshold {
    pub fn shared() -> Arc<dyn Operation> {
        Arc::new(Self {
            parameters: vec![ParameterSpec::input("image"), ParameterSpec::numeric("level")],
        })
    }
}

impl Operation for Threshold {
    fn name(&self) -> &str {
        "threshold"
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    fn call(&self, args: &[Value]) -> WfResult<Value> {
        let img = image_arg(self.name(), args, 0)?;
        let level = numeric_arg(self.name(), args, 1)?;
        Ok(Value::Image(img.map(|v| if v > level { 1.0 } else { 0.0 })))
    }
}

/// Multiply every sample by `factor`.
pub struct Scale {
    parameters: Vec<ParameterSpec>,
}

impl Scale {
    pub fn shared() -> Arc<dyn Operation> {
        Arc::new(Self {
            parameters: vec![ParameterSpec::input("image"), ParameterSpec::numeric("factor")],
        })
    }
}

impl Operation for Scale {
    fn name(&self) -> &str {
        "scale"
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    fn call(&self, args: &[Value]) -> WfResult<Value> {
        let img = image_arg(self.name(), args, 0)?;
        let factor = numeric_arg(self.name(), args, 1)?;
        Ok(Value::Image(img.map(|v| v * factor)))
    }
}

/// Label 4-connected foreground regions of a binary image as 1, 2, 3, ...
pub struct LabelComponents {
    parameters: Vec<ParameterSpec>,
}

impl LabelComponents {
    pub fn shared() -> Arc<dyn Operation> {
        Arc::new(Self {
            parameters: vec![ParameterSpec::input("binary")],
        })
    }
}

impl Operation for LabelComponents {
    fn name(&self) -> &str {
        "label_components"
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    fn call(&self, args: &[Value]) -> WfResult<Value> {
        let img = image_arg(self.name(), args, 0)?;
        let (h, w) = require_2d(img, self.name())?;
        let src = img.data();
        let mut labels = Image::zeros(vec![h, w]);
        let mut next = 0.0;
        let mut queue = VecDeque::new();

        for start in 0..src.len() {
            if src[start] == 0.0 || labels.data()[start] != 0.0 {
                continue;
            }
            next += 1.0;
            labels.data_mut()[start] = next;
            queue.push_back(start);
            while let Some(i) = queue.pop_front() {
                let (y, x) = (i / w, i % w);
                let neighbours = [
                    (y > 0).then(|| i - w),
                    (y + 1 < h).then(|| i + w),
                    (x > 0).then(|| i - 1),
                    (x + 1 < w).then(|| i + 1),
                ];
                for n in neighbours.into_iter().flatten() {
                    if src[n] != 0.0 && labels.data()[n] == 0.0 {
                        labels.data_mut()[n] = next;
                        queue.push_back(n);
                    }
                }
            }
        }
        Ok(Value::Image(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(rows: &[[f64; 4]]) -> Value {
        Value::Image(Image::from_rows(rows).unwrap())
    }

    #[test]
    fn box_blur_averages_window() {
        let input = image(&[[0.0, 0.0, 0.0, 0.0], [0.0, 9.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]]);
        let out = BoxBlur::shared().call(&[input, Value::Int(1)]).unwrap();
        let out = out.as_image().unwrap();
        assert!((out.data()[0] - 9.0 / 4.0).abs() < 1e-12);
        assert!((out.data()[5] - 1.0).abs() < 1e-12);
        assert!((out.sum() - 14.0).abs() < 1e-9);
    }

    #[test]
    fn box_blur_radius_zero_is_identity() {
        let input = image(&[[1.0, 2.0, 3.0, 4.0]]);
        let out = BoxBlur::shared().call(&[input.clone(), Value::Float(0.2)]).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn box_blur_rejects_negative_radius() {
        let input = image(&[[1.0, 2.0, 3.0, 4.0]]);
        assert!(BoxBlur::shared().call(&[input, Value::Float(-1.0)]).is_err());
    }

    #[test]
    fn threshold_binarizes() {
        let input = image(&[[0.1, 0.5, 0.6, 0.9]]);
        let out = Threshold::shared().call(&[input, Value::Float(0.5)]).unwrap();
        assert_eq!(out.as_image().unwrap().data(), &[0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn scale_multiplies() {
        let input = image(&[[1.0, 2.0, 3.0, 4.0]]);
        let out = Scale::shared().call(&[input, Value::Float(0.5)]).unwrap();
        assert_eq!(out.as_image().unwrap().data(), &[0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn label_components_uses_four_connectivity() {
        let input = image(&[[1.0, 1.0, 0.0, 1.0], [0.0, 0.0, 0.0, 1.0], [1.0, 0.0, 1.0, 0.0]]);
        let out = LabelComponents::shared().call(&[input]).unwrap();
        let out = out.as_image().unwrap();
        assert_eq!(
            out.data(),
            &[1.0, 1.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0, 3.0, 0.0, 4.0, 0.0]
        );
        assert_eq!(out.max(), Some(4.0));
    }
}
