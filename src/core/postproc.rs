use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::SeverityThresholds;
use super::image::ImageGeometry;

/// Three-tier lesion severity. Serialized and displayed with the
/// clinical labels used in persisted cases and reports.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumIter,
)]
pub enum Severity {
    #[serde(rename = "Alta")]
    #[strum(serialize = "Alta")]
    High,
    #[serde(rename = "Media")]
    #[strum(serialize = "Media")]
    Moderate,
    #[serde(rename = "Baja")]
    #[strum(serialize = "Baja")]
    Low,
}

/// A single lesion candidate derived from one connected component of
/// the thresholded probability map. Self-contained: rendering and
/// reporting never need to go back to the mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesion {
    pub id: u32,
    pub volume_mm3: f32,
    pub max_diameter_mm: f32,
    pub centroid: [f32; 3],
    pub probability: f32,
    pub severity: Severity,
}

/// The outcome of one prediction run. Aggregates are computed once at
/// construction and cached; the dense segmentation mask is transient
/// and not serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResults {
    #[serde(skip)]
    pub segmentation: Option<Array3<u8>>,
    pub lesions: Vec<Lesion>,
    pub num_lesions: usize,
    pub has_significant_lesion: bool,
    pub total_lesion_volume: f32,
    pub prediction_date: DateTime<Utc>,
}

impl PredictionResults {
    /// Runs the full post-processing pipeline on a per-voxel lesion
    /// probability map: binarize, label connected components, compute
    /// per-lesion statistics, classify severity, and order the result.
    #[must_use]
    #[tracing::instrument(level = "info", skip(probability, geometry))]
    pub fn from_probability_map(
        probability: ArrayView3<f32>,
        geometry: &ImageGeometry,
        threshold: f32,
        thresholds: &SeverityThresholds,
    ) -> Self {
        let mask = binarize(probability, threshold);
        let (labels, label_count) = label_components(&mask);
        debug!("Found {label_count} connected component(s) above threshold {threshold}");

        let mut lesions: Vec<Lesion> = (1..=label_count)
            .map(|label| lesion_statistics(label, &labels, probability, geometry, thresholds))
            .collect();

        // Deterministic ordering: volume descending, centroid
        // lexicographic on ties.
        lesions.sort_by(|a, b| {
            b.volume_mm3
                .total_cmp(&a.volume_mm3)
                .then_with(|| a.centroid[0].total_cmp(&b.centroid[0]))
                .then_with(|| a.centroid[1].total_cmp(&b.centroid[1]))
                .then_with(|| a.centroid[2].total_cmp(&b.centroid[2]))
        });

        let num_lesions = lesions.len();
        let has_significant_lesion = lesions
            .iter()
            .any(|lesion| lesion.severity == Severity::High);
        let total_lesion_volume = lesions.iter().map(|lesion| lesion.volume_mm3).sum();
        info!("Post-processing produced {num_lesions} lesion(s), significant: {has_significant_lesion}");

        Self {
            segmentation: Some(mask),
            lesions,
            num_lesions,
            has_significant_lesion,
            total_lesion_volume,
            prediction_date: Utc::now(),
        }
    }
}

/// Binary lesion mask: a voxel is included iff its probability is
/// strictly greater than the threshold.
#[must_use]
pub fn binarize(probability: ArrayView3<f32>, threshold: f32) -> Array3<u8> {
    probability.map(|&value| u8::from(value > threshold))
}

/// Labels connected components of a binary mask with face
/// (6-)connectivity. Returns the label volume (0 = background, labels
/// start at 1) and the number of components.
#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub fn label_components(mask: &Array3<u8>) -> (Array3<u32>, u32) {
    const NEIGHBORS: [[isize; 3]; 6] = [
        [-1, 0, 0],
        [1, 0, 0],
        [0, -1, 0],
        [0, 1, 0],
        [0, 0, -1],
        [0, 0, 1],
    ];

    let shape = mask.dim();
    let mut labels = Array3::<u32>::zeros(shape);
    let mut next_label = 0u32;
    let mut queue = VecDeque::new();

    for x in 0..shape.0 {
        for y in 0..shape.1 {
            for z in 0..shape.2 {
                if mask[[x, y, z]] == 0 || labels[[x, y, z]] != 0 {
                    continue;
                }
                next_label += 1;
                labels[[x, y, z]] = next_label;
                queue.push_back([x, y, z]);

                while let Some(voxel) = queue.pop_front() {
                    for offset in NEIGHBORS {
                        let neighbor = [
                            voxel[0] as isize + offset[0],
                            voxel[1] as isize + offset[1],
                            voxel[2] as isize + offset[2],
                        ];
                        if neighbor[0] < 0
                            || neighbor[1] < 0
                            || neighbor[2] < 0
                            || neighbor[0] >= shape.0 as isize
                            || neighbor[1] >= shape.1 as isize
                            || neighbor[2] >= shape.2 as isize
                        {
                            continue;
                        }
                        let neighbor = [
                            neighbor[0] as usize,
                            neighbor[1] as usize,
                            neighbor[2] as usize,
                        ];
                        if mask[neighbor] != 0 && labels[neighbor] == 0 {
                            labels[neighbor] = next_label;
                            queue.push_back(neighbor);
                        }
                    }
                }
            }
        }
    }

    (labels, next_label)
}

/// Severity as a pure function of volume and mean probability under
/// the configured thresholds. The high tier is checked first, then the
/// moderate tier; everything else is low.
#[must_use]
pub fn classify_severity(
    volume_mm3: f32,
    probability: f32,
    thresholds: &SeverityThresholds,
) -> Severity {
    if volume_mm3 > thresholds.high_volume_mm3 && probability > thresholds.high_probability {
        Severity::High
    } else if volume_mm3 > thresholds.moderate_volume_mm3
        || probability > thresholds.moderate_probability
    {
        Severity::Moderate
    } else {
        Severity::Low
    }
}

#[allow(clippy::cast_precision_loss)]
fn lesion_statistics(
    label: u32,
    labels: &Array3<u32>,
    probability: ArrayView3<f32>,
    geometry: &ImageGeometry,
    thresholds: &SeverityThresholds,
) -> Lesion {
    let mut points = Vec::new();
    let mut probability_sum = 0.0f64;

    for ((x, y, z), &voxel_label) in labels.indexed_iter() {
        if voxel_label == label {
            let physical = geometry.index_to_physical([x, y, z]);
            points.push(Vector3::new(physical[0], physical[1], physical[2]));
            probability_sum += f64::from(probability[[x, y, z]]);
        }
    }

    let voxel_count = points.len();
    let volume_mm3 = voxel_count as f32 * geometry.voxel_volume_mm3();
    let mean_probability = if voxel_count == 0 {
        0.0
    } else {
        (probability_sum / voxel_count as f64) as f32
    };

    let centroid_vector =
        points.iter().sum::<Vector3<f32>>() / (voxel_count.max(1) as f32);
    let centroid = [centroid_vector[0], centroid_vector[1], centroid_vector[2]];

    let max_diameter_mm = max_diameter(&points, &centroid_vector, geometry, volume_mm3);

    Lesion {
        id: label,
        volume_mm3,
        max_diameter_mm,
        centroid,
        probability: mean_probability,
        severity: classify_severity(volume_mm3, mean_probability, thresholds),
    }
}

/// Approximate maximum diameter: the largest extent of the component
/// along its principal axes, padded by one voxel to account for voxel
/// width. Degenerate components fall back to the sphere-equivalent
/// diameter for the given volume.
#[allow(clippy::cast_precision_loss)]
fn max_diameter(
    points: &[Vector3<f32>],
    centroid: &Vector3<f32>,
    geometry: &ImageGeometry,
    volume_mm3: f32,
) -> f32 {
    let sphere_equivalent =
        2.0 * (3.0 * volume_mm3 / (4.0 * std::f32::consts::PI)).powf(1.0 / 3.0);
    if points.len() < 2 {
        return sphere_equivalent;
    }

    let mut covariance = Matrix3::<f32>::zeros();
    for point in points {
        let delta = point - centroid;
        covariance += delta * delta.transpose();
    }
    covariance /= points.len() as f32;

    let eigen = covariance.symmetric_eigen();
    let mut largest_extent = 0.0f32;
    for axis_index in 0..3 {
        let axis = eigen.eigenvectors.column(axis_index);
        let mut min_projection = f32::INFINITY;
        let mut max_projection = f32::NEG_INFINITY;
        for point in points {
            let projection = (point - centroid).dot(&axis);
            min_projection = min_projection.min(projection);
            max_projection = max_projection.max(projection);
        }
        largest_extent = largest_extent.max(max_projection - min_projection);
    }

    if largest_extent <= f32::EPSILON {
        return sphere_equivalent;
    }
    // Projections span voxel centers; one mean voxel width covers the
    // half-voxel overhang on both ends.
    let mean_spacing =
        (geometry.spacing[0] + geometry.spacing[1] + geometry.spacing[2]) / 3.0;
    largest_extent + mean_spacing
}
