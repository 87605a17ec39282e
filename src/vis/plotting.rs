use std::path::Path;

use anyhow::Result;
use ndarray::Array2;
use ndarray_stats::QuantileExt;
use plotters::prelude::*;
use scarlet::colormap::{ColorMap, ListedColorMap};
use tracing::trace;

use super::slice::apply_window_level;

const STANDARD_RESOLUTION: (u32, u32) = (600, 600);

/// Saves a windowed grayscale slice (with optional red lesion overlay)
/// as a PNG. Used for report images and manual exports.
///
/// # Errors
///
/// Returns an error when the image cannot be encoded or written.
#[tracing::instrument(level = "trace", skip(slice, mask))]
pub fn save_slice_png(
    slice: &Array2<f32>,
    mask: Option<&Array2<u8>>,
    level: f32,
    width: f32,
    path: &Path,
) -> Result<()> {
    trace!("Saving slice png to {path:?}");
    let (columns, rows) = slice.dim();
    let mut image = image::RgbImage::new(columns.try_into()?, rows.try_into()?);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let column = x as usize;
        let row = y as usize;
        let gray = apply_window_level(slice[[column, row]], level, width);
        let overlaid = mask.is_some_and(|mask| mask[[column, row]] != 0);
        *pixel = if overlaid {
            image::Rgb([255, gray / 4, gray / 4])
        } else {
            image::Rgb([gray, gray, gray])
        };
    }
    image.save(path)?;
    Ok(())
}

/// Generates a probability-map heat plot for one slice, with axes and
/// a viridis color mapping.
///
/// # Errors
///
/// Returns an error when the data range is degenerate or the plot
/// cannot be written.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless
)]
#[tracing::instrument(level = "trace", skip(slice))]
pub fn probability_map_plot(slice: &Array2<f32>, title: &str, path: &Path) -> Result<()> {
    trace!("Generating probability map plot.");
    let dim_x = slice.shape()[0];
    let dim_y = slice.shape()[1];
    let data_min = *slice.min()?;
    let data_max = *slice.max()?;
    let data_range = (data_max - data_min).max(f32::EPSILON);

    let color_map = ListedColorMap::viridis();

    let root = BitMapBackend::new(path, STANDARD_RESOLUTION).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0.0..dim_x as f32, 0.0..dim_y as f32)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("x [voxel]")
        .y_desc("y [voxel]")
        .draw()?;

    chart.draw_series(slice.indexed_iter().map(|((x, y), &value)| {
        let normalized = f64::from((value - data_min) / data_range);
        let color: scarlet::color::RGBColor = color_map.transform_single(normalized);
        let style = RGBColor(
            (color.r * f64::from(u8::MAX)) as u8,
            (color.g * f64::from(u8::MAX)) as u8,
            (color.b * f64::from(u8::MAX)) as u8,
        )
        .filled();
        Rectangle::new([(x as f32, y as f32), ((x + 1) as f32, (y + 1) as f32)], style)
    }))?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;
    use crate::tests::setup_folder;

    fn scratch_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("prostalyzer_plotting_tests");
        setup_folder(&dir).unwrap();
        dir
    }

    #[test]
    fn slice_png_is_written() {
        let mut slice = Array2::<f32>::zeros((16, 16));
        slice[[8, 8]] = 200.0;
        let mut mask = Array2::<u8>::zeros((16, 16));
        mask[[8, 8]] = 1;
        let path = scratch_dir().join("slice.png");

        save_slice_png(&slice, Some(&mask), 100.0, 200.0, &path).unwrap();

        assert!(path.is_file());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn probability_plot_is_written() {
        let mut slice = Array2::<f32>::zeros((8, 8));
        slice[[4, 4]] = 0.9;
        let path = scratch_dir().join("probability.png");

        probability_map_plot(&slice, "Lesion probability", &path).unwrap();

        assert!(path.is_file());
        std::fs::remove_file(&path).unwrap();
    }
}
