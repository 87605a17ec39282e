pub mod window;

use std::path::Path;

use ndarray::{s, Array3, Array4, ArrayView4, Axis, Ix5};
use ort::{GraphOptimizationLevel, Session};
use tracing::{debug, info};

use super::case::SequenceType;
use super::error::{InferenceError, ModelError};
use super::image::{ImageGeometry, ImageVolume};

/// Number of input channels the checkpoint must accept (T2W + ADC).
pub const INPUT_CHANNELS: usize = 2;
/// Number of output channels (background + lesion).
pub const OUTPUT_CHANNELS: usize = 2;
/// Per-axis tolerance when matching T2W and ADC shapes.
pub const SHAPE_TOLERANCE: usize = 10;

const NORMALIZATION_EPSILON: f32 = 1e-5;

/// The fixed 3D U-Net lesion segmentation model, loaded from an ONNX
/// checkpoint. The graph must expose one 5D input with two channels
/// and a matching 5D output; anything else is rejected at load time.
pub struct LesionModel {
    session: Session,
}

impl std::fmt::Debug for LesionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LesionModel").finish_non_exhaustive()
    }
}

impl LesionModel {
    /// Loads the checkpoint and validates its architecture.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelError`] when the file is missing, the session
    /// cannot be created, or the graph does not match the expected
    /// two-channel layout.
    #[tracing::instrument(level = "info")]
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        if !path.is_file() {
            return Err(ModelError::NotFound(path.to_path_buf()));
        }
        info!("Loading segmentation model from {path:?}");
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)?;

        let Some(input) = session.inputs.first() else {
            return Err(ModelError::MalformedGraph);
        };
        if session.outputs.is_empty() {
            return Err(ModelError::MalformedGraph);
        }
        if let ort::value::ValueType::Tensor { dimensions, .. } = &input.input_type {
            debug!("Model input dimensions: {dimensions:?}");
            if dimensions.len() != 5 {
                return Err(ModelError::MalformedGraph);
            }
            let channels = dimensions[1];
            #[allow(clippy::cast_possible_wrap)]
            if channels > 0 && channels != INPUT_CHANNELS as i64 {
                #[allow(clippy::cast_sign_loss)]
                return Err(ModelError::ArchitectureMismatch {
                    expected: INPUT_CHANNELS,
                    found: channels as usize,
                });
            }
        }

        Ok(Self { session })
    }

    /// Runs one window through the network, returning raw logits with
    /// the same spatial shape as the input window.
    ///
    /// # Errors
    ///
    /// Returns an [`InferenceError`] on runtime failure or an output
    /// whose shape does not match the expected channel layout.
    pub fn run_window(&self, window: ArrayView4<'_, f32>) -> Result<Array4<f32>, InferenceError> {
        let input = window.to_owned().insert_axis(Axis(0));
        let outputs = self.session.run(ort::inputs![input.view()]?)?;
        let logits = outputs[0].try_extract_tensor::<f32>()?;
        let shape = logits.shape().to_vec();
        let logits = logits
            .to_owned()
            .into_dimensionality::<Ix5>()
            .map_err(|_| InferenceError::BadOutputShape(shape.clone()))?;
        if logits.shape()[1] != OUTPUT_CHANNELS {
            return Err(InferenceError::BadOutputShape(shape));
        }
        Ok(logits.index_axis_move(Axis(0), 0))
    }
}

/// Min-max normalization to [0, 1], matching the preprocessing the
/// checkpoint was trained with.
#[must_use]
pub fn normalize_min_max(data: &Array3<f32>) -> Array3<f32> {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &value in data {
        min = min.min(value);
        max = max.max(value);
    }
    let range = max - min + NORMALIZATION_EPSILON;
    data.map(|&value| (value - min) / range)
}

/// Builds the 2-channel model input from the case's T2W and ADC
/// volumes: per-axis shape check within [`SHAPE_TOLERANCE`], center
/// crop to the common shape, min-max normalization per channel, stack
/// to `(channel, x, y, z)`. The returned geometry is the T2W reference
/// geometry used for post-processing.
///
/// # Errors
///
/// Returns an [`InferenceError`] for empty volumes or shapes differing
/// by more than the tolerance.
#[tracing::instrument(level = "debug", skip(t2w, adc))]
pub fn prepare_input(
    t2w: &ImageVolume,
    adc: &ImageVolume,
) -> Result<(Array4<f32>, ImageGeometry), InferenceError> {
    let t2w_shape = t2w.shape();
    let adc_shape = adc.shape();
    if t2w_shape.contains(&0) || adc_shape.contains(&0) {
        return Err(InferenceError::EmptyVolume);
    }
    for axis in 0..3 {
        if t2w_shape[axis].abs_diff(adc_shape[axis]) > SHAPE_TOLERANCE {
            return Err(InferenceError::ShapeMismatch {
                t2w: t2w_shape,
                adc: adc_shape,
                tolerance: SHAPE_TOLERANCE,
            });
        }
    }

    let common = [
        t2w_shape[0].min(adc_shape[0]),
        t2w_shape[1].min(adc_shape[1]),
        t2w_shape[2].min(adc_shape[2]),
    ];
    let t2w_cropped = center_crop(&t2w.data, common);
    let adc_cropped = center_crop(&adc.data, common);

    let t2w_normalized = normalize_min_max(&t2w_cropped);
    let adc_normalized = normalize_min_max(&adc_cropped);

    let mut stacked = Array4::<f32>::zeros((INPUT_CHANNELS, common[0], common[1], common[2]));
    stacked
        .index_axis_mut(Axis(0), 0)
        .assign(&t2w_normalized);
    stacked
        .index_axis_mut(Axis(0), 1)
        .assign(&adc_normalized);

    Ok((stacked, t2w.geometry.clone()))
}

fn center_crop(data: &Array3<f32>, target: [usize; 3]) -> Array3<f32> {
    let shape = data.dim();
    let offsets = [
        (shape.0 - target[0]) / 2,
        (shape.1 - target[1]) / 2,
        (shape.2 - target[2]) / 2,
    ];
    data.slice(s![
        offsets[0]..offsets[0] + target[0],
        offsets[1]..offsets[1] + target[1],
        offsets[2]..offsets[2] + target[2]
    ])
    .to_owned()
}

/// The sequence types the model consumes, in channel order.
#[must_use]
pub const fn input_sequences() -> [SequenceType; INPUT_CHANNELS] {
    [SequenceType::T2w, SequenceType::Adc]
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    use super::*;

    fn volume(shape: (usize, usize, usize), fill: f32) -> ImageVolume {
        ImageVolume {
            data: Array3::from_elem(shape, fill),
            geometry: ImageGeometry::default(),
        }
    }

    #[test]
    fn normalization_maps_to_unit_range() {
        let mut data = Array3::<f32>::zeros((4, 4, 4));
        data[[0, 0, 0]] = -100.0;
        data[[3, 3, 3]] = 300.0;

        let normalized = normalize_min_max(&data);

        assert_abs_diff_eq!(normalized[[0, 0, 0]], 0.0);
        assert!(normalized[[3, 3, 3]] < 1.0);
        assert_abs_diff_eq!(normalized[[3, 3, 3]], 1.0, epsilon = 1e-4);
        // The zero background lands at a quarter of the range.
        assert_abs_diff_eq!(normalized[[1, 1, 1]], 0.25, epsilon = 1e-4);
    }

    #[test]
    fn constant_volume_normalizes_without_dividing_by_zero() {
        let data = Array3::<f32>::from_elem((3, 3, 3), 42.0);
        let normalized = normalize_min_max(&data);
        assert!(normalized.iter().all(|value| value.is_finite()));
        assert_abs_diff_eq!(normalized[[0, 0, 0]], 0.0);
    }

    #[test]
    fn prepare_input_stacks_two_channels() {
        let t2w = volume((12, 12, 6), 1.0);
        let adc = volume((12, 12, 6), 2.0);

        let (stacked, geometry) = prepare_input(&t2w, &adc).unwrap();

        assert_eq!(stacked.shape(), &[2, 12, 12, 6]);
        assert_eq!(geometry, t2w.geometry);
    }

    #[test]
    fn prepare_input_center_crops_within_tolerance() {
        let t2w = volume((20, 20, 10), 1.0);
        let adc = volume((14, 20, 8), 2.0);

        let (stacked, _) = prepare_input(&t2w, &adc).unwrap();

        assert_eq!(stacked.shape(), &[2, 14, 20, 8]);
    }

    #[test]
    fn prepare_input_rejects_incomparable_shapes() {
        let t2w = volume((40, 20, 10), 1.0);
        let adc = volume((20, 20, 10), 2.0);

        let result = prepare_input(&t2w, &adc);

        assert!(matches!(
            result,
            Err(InferenceError::ShapeMismatch { tolerance: 10, .. })
        ));
    }

    #[test]
    fn prepare_input_rejects_empty_volumes() {
        let t2w = volume((0, 10, 10), 1.0);
        let adc = volume((10, 10, 10), 2.0);
        assert!(matches!(
            prepare_input(&t2w, &adc),
            Err(InferenceError::EmptyVolume)
        ));
    }

    #[test]
    fn center_crop_takes_the_middle_region() {
        let mut data = Array3::<f32>::zeros((6, 6, 6));
        data[[2, 2, 2]] = 7.0;

        let cropped = center_crop(&data, [2, 2, 2]);

        assert_eq!(cropped.dim(), (2, 2, 2));
        assert_abs_diff_eq!(cropped[[0, 0, 0]], 7.0);
    }
}
