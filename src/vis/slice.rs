use egui::ColorImage;
use ndarray::{Array2, Array3};

/// The three orthogonal viewing planes. The slicing axis follows the
/// `(x, y, z)` volume layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumIter)]
pub enum SlicePlane {
    Axial,
    Coronal,
    Sagittal,
}

impl SlicePlane {
    /// The volume axis this plane slices along.
    #[must_use]
    pub const fn axis(self) -> usize {
        match self {
            Self::Sagittal => 0,
            Self::Coronal => 1,
            Self::Axial => 2,
        }
    }
}

/// Number of slices the volume has along the plane's axis.
#[must_use]
pub fn slice_count(data: &Array3<f32>, plane: SlicePlane) -> usize {
    data.shape()[plane.axis()]
}

/// Extracts one 2D slice. The index is clamped to the valid range; an
/// empty axis yields an empty slice.
#[must_use]
pub fn extract_slice(data: &Array3<f32>, plane: SlicePlane, index: usize) -> Array2<f32> {
    let count = slice_count(data, plane);
    if count == 0 {
        return Array2::zeros((0, 0));
    }
    let index = index.min(count - 1);
    data.index_axis(ndarray::Axis(plane.axis()), index).to_owned()
}

/// Extracts the matching slice of a binary mask, when one is present.
#[must_use]
pub fn extract_mask_slice(
    mask: Option<&Array3<u8>>,
    plane: SlicePlane,
    index: usize,
) -> Option<Array2<u8>> {
    let mask = mask?;
    let count = mask.shape()[plane.axis()];
    if count == 0 {
        return None;
    }
    let index = index.min(count - 1);
    Some(mask.index_axis(ndarray::Axis(plane.axis()), index).to_owned())
}

/// Maps a raw intensity to an 8-bit gray value under the given
/// window/level: values at or below `level - width/2` are black, at or
/// above `level + width/2` white, linear in between.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn apply_window_level(value: f32, level: f32, width: f32) -> u8 {
    let effective_width = width.max(1e-6);
    let low = level - effective_width / 2.0;
    let normalized = ((value - low) / effective_width).clamp(0.0, 1.0);
    (normalized * 255.0).round() as u8
}

/// Renders a slice to an RGB image under the given window/level, with
/// an optional red lesion overlay. The slice is indexed `(u, v)`; `u`
/// becomes the image column.
#[must_use]
pub fn render_slice(
    slice: &Array2<f32>,
    level: f32,
    width: f32,
    mask: Option<&Array2<u8>>,
) -> ColorImage {
    let (columns, rows) = slice.dim();
    let mut rgb = Vec::with_capacity(columns * rows * 3);
    for row in 0..rows {
        for column in 0..columns {
            let gray = apply_window_level(slice[[column, row]], level, width);
            let overlaid = mask.is_some_and(|mask| mask[[column, row]] != 0);
            if overlaid {
                rgb.extend_from_slice(&[255, gray / 4, gray / 4]);
            } else {
                rgb.extend_from_slice(&[gray, gray, gray]);
            }
        }
    }
    ColorImage::from_rgb([columns, rows], &rgb)
}

#[cfg(test)]
mod tests {
    use ndarray::Array3;

    use super::*;

    fn ramp_volume() -> Array3<f32> {
        let mut data = Array3::<f32>::zeros((4, 3, 2));
        for ((x, y, z), value) in data.indexed_iter_mut() {
            #[allow(clippy::cast_precision_loss)]
            {
                *value = (x * 100 + y * 10 + z) as f32;
            }
        }
        data
    }

    #[test]
    fn plane_axes_follow_the_volume_layout() {
        assert_eq!(SlicePlane::Sagittal.axis(), 0);
        assert_eq!(SlicePlane::Coronal.axis(), 1);
        assert_eq!(SlicePlane::Axial.axis(), 2);
    }

    #[test]
    fn slice_counts_match_the_shape() {
        let data = ramp_volume();
        assert_eq!(slice_count(&data, SlicePlane::Sagittal), 4);
        assert_eq!(slice_count(&data, SlicePlane::Coronal), 3);
        assert_eq!(slice_count(&data, SlicePlane::Axial), 2);
    }

    #[test]
    fn extracted_slices_hold_the_expected_values() {
        let data = ramp_volume();

        let axial = extract_slice(&data, SlicePlane::Axial, 1);
        assert_eq!(axial.dim(), (4, 3));
        assert!((axial[[2, 1]] - 211.0).abs() < f32::EPSILON);

        let sagittal = extract_slice(&data, SlicePlane::Sagittal, 3);
        assert_eq!(sagittal.dim(), (3, 2));
        assert!((sagittal[[1, 1]] - 311.0).abs() < f32::EPSILON);
    }

    #[test]
    fn out_of_range_indices_clamp_to_the_last_slice() {
        let data = ramp_volume();
        let clamped = extract_slice(&data, SlicePlane::Axial, 99);
        let last = extract_slice(&data, SlicePlane::Axial, 1);
        assert_eq!(clamped, last);
    }

    #[test]
    fn window_level_maps_the_configured_range() {
        // Window level 40, width 400: black below -160, white above 240.
        assert_eq!(apply_window_level(-200.0, 40.0, 400.0), 0);
        assert_eq!(apply_window_level(300.0, 40.0, 400.0), 255);
        assert_eq!(apply_window_level(40.0, 40.0, 400.0), 128);
    }

    #[test]
    fn rendered_slice_has_row_major_pixels_and_overlay() {
        let mut slice = Array2::<f32>::zeros((2, 2));
        slice[[1, 0]] = 255.0;
        let mut mask = Array2::<u8>::zeros((2, 2));
        mask[[0, 1]] = 1;

        let image = render_slice(&slice, 127.5, 255.0, Some(&mask));

        assert_eq!(image.size, [2, 2]);
        // Pixel (column 1, row 0) is the second pixel of the first row.
        assert_eq!(image.pixels[1].r(), 255);
        // The masked pixel (column 0, row 1) is red-tinted.
        let masked = image.pixels[2];
        assert_eq!(masked.r(), 255);
        assert!(masked.g() < 64);
    }
}
