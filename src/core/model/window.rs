use ndarray::{s, Array3, Array4, ArrayView4, Axis};
use tracing::debug;

use crate::core::error::InferenceError;

/// Start offsets for one axis: windows of `roi` voxels advanced by
/// `step`, with the final window shifted flush against the end so the
/// whole extent is covered exactly once per pass.
fn window_starts(dim: usize, roi: usize, step: usize) -> Vec<usize> {
    if roi >= dim {
        return vec![0];
    }
    let mut starts = Vec::new();
    let mut position = 0;
    while position + roi < dim {
        starts.push(position);
        position += step.max(1);
    }
    let last = dim - roi;
    if starts.last() != Some(&last) {
        starts.push(last);
    }
    starts
}

/// Sliding-window inference: runs `predict` on overlapping windows of
/// `input` (`(channel, x, y, z)`) and blends the overlapping outputs
/// with uniform averaging. The predictor receives each window and must
/// return logits with the same spatial shape.
///
/// # Errors
///
/// Propagates predictor errors and rejects outputs whose spatial shape
/// does not match the window.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[tracing::instrument(level = "debug", skip(input, predict))]
pub fn sliding_window_inference<F>(
    input: &Array4<f32>,
    roi_size: [usize; 3],
    overlap: f32,
    mut predict: F,
) -> Result<Array4<f32>, InferenceError>
where
    F: FnMut(ArrayView4<'_, f32>) -> Result<Array4<f32>, InferenceError>,
{
    let (_, nx, ny, nz) = input.dim();
    if nx == 0 || ny == 0 || nz == 0 {
        return Err(InferenceError::EmptyVolume);
    }
    let roi = [roi_size[0].min(nx), roi_size[1].min(ny), roi_size[2].min(nz)];
    let overlap = overlap.clamp(0.0, 0.95);
    let step = [
        ((roi[0] as f32) * (1.0 - overlap)).round().max(1.0) as usize,
        ((roi[1] as f32) * (1.0 - overlap)).round().max(1.0) as usize,
        ((roi[2] as f32) * (1.0 - overlap)).round().max(1.0) as usize,
    ];

    let starts_x = window_starts(nx, roi[0], step[0]);
    let starts_y = window_starts(ny, roi[1], step[1]);
    let starts_z = window_starts(nz, roi[2], step[2]);
    debug!(
        "Sliding window over {:?} with roi {roi:?}: {} window(s)",
        (nx, ny, nz),
        starts_x.len() * starts_y.len() * starts_z.len()
    );

    let mut accumulated: Option<Array4<f32>> = None;
    let mut weights = Array3::<f32>::zeros((nx, ny, nz));

    for &x in &starts_x {
        for &y in &starts_y {
            for &z in &starts_z {
                let window = input.slice(s![.., x..x + roi[0], y..y + roi[1], z..z + roi[2]]);
                let output = predict(window)?;
                let output_shape = output.shape().to_vec();
                if output_shape[1..] != [roi[0], roi[1], roi[2]] {
                    return Err(InferenceError::BadOutputShape(output_shape));
                }

                let accumulated = accumulated.get_or_insert_with(|| {
                    Array4::<f32>::zeros((output_shape[0], nx, ny, nz))
                });
                let mut target = accumulated.slice_mut(s![
                    ..,
                    x..x + roi[0],
                    y..y + roi[1],
                    z..z + roi[2]
                ]);
                target += &output;
                let mut weight_window =
                    weights.slice_mut(s![x..x + roi[0], y..y + roi[1], z..z + roi[2]]);
                weight_window += 1.0;
            }
        }
    }

    let mut blended = accumulated.ok_or(InferenceError::EmptyVolume)?;
    for mut channel in blended.axis_iter_mut(Axis(0)) {
        channel.zip_mut_with(&weights, |value, &weight| {
            if weight > 0.0 {
                *value /= weight;
            }
        });
    }
    Ok(blended)
}

/// Softmax over the channel axis of a `(channel, x, y, z)` logit
/// volume.
#[must_use]
pub fn softmax_channels(logits: &Array4<f32>) -> Array4<f32> {
    let mut result = logits.clone();
    let (channels, nx, ny, nz) = result.dim();
    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
                let mut max = f32::NEG_INFINITY;
                for c in 0..channels {
                    max = max.max(result[[c, x, y, z]]);
                }
                let mut sum = 0.0;
                for c in 0..channels {
                    let value = (result[[c, x, y, z]] - max).exp();
                    result[[c, x, y, z]] = value;
                    sum += value;
                }
                for c in 0..channels {
                    result[[c, x, y, z]] /= sum;
                }
            }
        }
    }
    result
}

/// The lesion probability map: softmax over channels, then channel 1.
#[must_use]
pub fn lesion_probability(logits: &Array4<f32>) -> Array3<f32> {
    softmax_channels(logits).index_axis_move(Axis(0), 1)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array4;

    use super::*;

    #[test]
    fn window_starts_cover_the_whole_axis() {
        assert_eq!(window_starts(10, 4, 2), vec![0, 2, 4, 6]);
        assert_eq!(window_starts(10, 10, 5), vec![0]);
        assert_eq!(window_starts(5, 10, 5), vec![0]);
        // Uneven extents still end flush with the boundary.
        assert_eq!(window_starts(11, 4, 3), vec![0, 3, 6, 7]);
    }

    #[test]
    fn identity_predictor_reconstructs_the_input() {
        let mut input = Array4::<f32>::zeros((2, 8, 8, 4));
        for (index, value) in input.iter_mut().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            {
                *value = index as f32 * 0.01;
            }
        }

        let output = sliding_window_inference(&input, [4, 4, 2], 0.5, |window| {
            Ok(window.to_owned())
        })
        .unwrap();

        assert_eq!(output.shape(), input.shape());
        for (a, b) in output.iter().zip(input.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn every_voxel_is_visited_at_least_once() {
        let input = Array4::<f32>::ones((2, 9, 7, 5));

        let output = sliding_window_inference(&input, [4, 4, 4], 0.25, |window| {
            Ok(Array4::<f32>::ones(window.raw_dim()))
        })
        .unwrap();

        assert!(output.iter().all(|&value| (value - 1.0).abs() < 1e-6));
    }

    #[test]
    fn mismatched_predictor_output_is_rejected() {
        let input = Array4::<f32>::ones((2, 8, 8, 8));

        let result = sliding_window_inference(&input, [4, 4, 4], 0.5, |_| {
            Ok(Array4::<f32>::zeros((2, 3, 3, 3)))
        });

        assert!(matches!(result, Err(InferenceError::BadOutputShape(_))));
    }

    #[test]
    fn softmax_produces_a_probability_distribution() {
        let mut logits = Array4::<f32>::zeros((2, 2, 2, 2));
        logits[[0, 0, 0, 0]] = 1.0;
        logits[[1, 0, 0, 0]] = 3.0;

        let probabilities = softmax_channels(&logits);

        for x in 0..2 {
            for y in 0..2 {
                for z in 0..2 {
                    let sum = probabilities[[0, x, y, z]] + probabilities[[1, x, y, z]];
                    assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
                }
            }
        }
        assert!(probabilities[[1, 0, 0, 0]] > probabilities[[0, 0, 0, 0]]);
    }

    #[test]
    fn lesion_probability_selects_the_positive_channel() {
        let mut logits = Array4::<f32>::zeros((2, 1, 1, 1));
        logits[[1, 0, 0, 0]] = 10.0;

        let probability = lesion_probability(&logits);

        assert!(probability[[0, 0, 0]] > 0.99);
    }
}
