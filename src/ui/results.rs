use std::path::Path;

use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts};
use egui_extras::{Column, TableBuilder};
use egui_plot::{Bar, BarChart, Legend, Plot};
use strum::IntoEnumIterator;
use tracing::{error, warn};

use crate::core::case::{Case, SequenceType};
use crate::core::image::ImageGeometry;
use crate::core::postproc::{PredictionResults, Severity};
use crate::core::report::{write_report, ReportData, ReportFormat, ReportImage};
use crate::vis::plotting::save_slice_png;
use crate::vis::slice::{extract_mask_slice, extract_slice, SlicePlane};
use crate::{AppStatus, CaseList, Settings};

/// Number of lesions for which axial slice images are exported into
/// the report.
const MAX_REPORT_IMAGES: usize = 3;

/// Pending report options, kept across frames.
#[derive(Resource, Debug)]
pub struct ReportDraft {
    pub format: ReportFormat,
    pub include_images: bool,
}

impl Default for ReportDraft {
    fn default() -> Self {
        Self {
            format: ReportFormat::Pdf,
            include_images: true,
        }
    }
}

/// Draws the results panel: the aggregate summary, the lesion table, a
/// volume chart, and the report dialog.
#[allow(clippy::needless_pass_by_value)]
#[tracing::instrument(skip_all, level = "trace")]
pub fn draw_ui_results(
    mut contexts: EguiContexts,
    case_list: Res<CaseList>,
    settings: Res<Settings>,
    mut draft: ResMut<ReportDraft>,
    mut status: ResMut<AppStatus>,
) {
    let ctx = match contexts.ctx_mut() {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("EGUI context not available for results panel: {}", e);
            return;
        }
    };
    egui::CentralPanel::default().show(ctx, |ui| {
        let Some(case) = case_list.manager.current_case() else {
            ui.label("No case is currently open.");
            return;
        };
        let Some(results) = case.prediction_results.as_ref() else {
            ui.label("No prediction has been run for this case.");
            return;
        };

        ui.heading(format!("Results for {}", case.name));
        draw_summary(ui, results);
        ui.separator();
        draw_lesion_table(ui, results);
        ui.separator();
        draw_volume_chart(ui, results);
        ui.separator();
        draw_report_dialog(ui, case, &settings, &mut draft, &mut status);
    });
}

fn draw_summary(ui: &mut egui::Ui, results: &PredictionResults) {
    egui::Grid::new("results_summary").num_columns(2).show(ui, |ui| {
        ui.label("Lesions found");
        ui.label(results.num_lesions.to_string());
        ui.end_row();
        ui.label("Significant lesion");
        if results.has_significant_lesion {
            ui.colored_label(severity_color32(Severity::High), "Yes");
        } else {
            ui.label("No");
        }
        ui.end_row();
        ui.label("Total lesion volume");
        ui.label(format!("{:.2} mm3", results.total_lesion_volume));
        ui.end_row();
        ui.label("Prediction date");
        ui.label(
            results
                .prediction_date
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        );
        ui.end_row();
    });
}

fn draw_lesion_table(ui: &mut egui::Ui, results: &PredictionResults) {
    if results.lesions.is_empty() {
        ui.label("No suspicious lesions were detected.");
        return;
    }
    TableBuilder::new(ui)
        .id_salt("lesion_table")
        .column(Column::initial(40.0).resizable(true))
        .column(Column::initial(110.0).resizable(true))
        .column(Column::initial(110.0).resizable(true))
        .column(Column::initial(170.0).resizable(true))
        .column(Column::initial(90.0).resizable(true))
        .column(Column::remainder())
        .header(20.0, |mut header| {
            header.col(|ui| {
                ui.heading("#");
            });
            header.col(|ui| {
                ui.heading("Volume (mm3)");
            });
            header.col(|ui| {
                ui.heading("Diameter (mm)");
            });
            header.col(|ui| {
                ui.heading("Centroid (mm)");
            });
            header.col(|ui| {
                ui.heading("Probability");
            });
            header.col(|ui| {
                ui.heading("Severity");
            });
        })
        .body(|mut body| {
            for (index, lesion) in results.lesions.iter().enumerate() {
                body.row(22.0, |mut row| {
                    row.col(|ui| {
                        ui.label((index + 1).to_string());
                    });
                    row.col(|ui| {
                        ui.label(format!("{:.2}", lesion.volume_mm3));
                    });
                    row.col(|ui| {
                        ui.label(format!("{:.2}", lesion.max_diameter_mm));
                    });
                    row.col(|ui| {
                        ui.label(format!(
                            "({:.1}, {:.1}, {:.1})",
                            lesion.centroid[0], lesion.centroid[1], lesion.centroid[2]
                        ));
                    });
                    row.col(|ui| {
                        ui.label(format!("{:.2}", lesion.probability));
                    });
                    row.col(|ui| {
                        ui.colored_label(
                            severity_color32(lesion.severity),
                            lesion.severity.to_string(),
                        );
                    });
                });
            }
        });
}

/// Bar chart of lesion volumes, one series per severity tier so the
/// legend doubles as a color key.
#[allow(clippy::cast_precision_loss)]
fn draw_volume_chart(ui: &mut egui::Ui, results: &PredictionResults) {
    if results.lesions.is_empty() {
        return;
    }
    let mut bars_by_severity: [(Severity, Vec<Bar>); 3] = [
        (Severity::High, Vec::new()),
        (Severity::Moderate, Vec::new()),
        (Severity::Low, Vec::new()),
    ];
    for (index, lesion) in results.lesions.iter().enumerate() {
        let bar = Bar::new((index + 1) as f64, f64::from(lesion.volume_mm3)).width(0.6);
        if let Some((_, bars)) = bars_by_severity
            .iter_mut()
            .find(|(severity, _)| *severity == lesion.severity)
        {
            bars.push(bar);
        }
    }

    Plot::new("lesion_volume_plot")
        .legend(Legend::default())
        .height(220.0)
        .allow_drag(false)
        .allow_scroll(false)
        .x_axis_label("Lesion")
        .y_axis_label("Volume [mm3]")
        .show(ui, |plot_ui| {
            for (severity, bars) in bars_by_severity {
                if bars.is_empty() {
                    continue;
                }
                plot_ui.bar_chart(
                    BarChart::new(severity.to_string(), bars).color(severity_color32(severity)),
                );
            }
        });
}

fn draw_report_dialog(
    ui: &mut egui::Ui,
    case: &Case,
    settings: &Settings,
    draft: &mut ReportDraft,
    status: &mut AppStatus,
) {
    ui.heading("Report");
    let output_dir = settings.config.report_dir();
    ui.label(format!("Output directory: {}", output_dir.display()));
    ui.horizontal(|ui| {
        egui::ComboBox::from_id_salt("report_format")
            .selected_text(draft.format.to_string())
            .show_ui(ui, |ui| {
                for format in ReportFormat::iter() {
                    ui.selectable_value(&mut draft.format, format, format.to_string());
                }
            });
        ui.checkbox(&mut draft.include_images, "Include slice images");

        if ui.button("Generate report").clicked() {
            let mut data = ReportData::from_case(case, &settings.config);
            if draft.include_images {
                data.images = export_lesion_images(case, settings, &output_dir);
            }
            match write_report(&data, draft.format, &output_dir) {
                Ok(path) => {
                    status.report_message(format!("Report written to {}", path.display()));
                }
                Err(persistence_error) => {
                    status.report_error(format!("Could not write report: {persistence_error}"));
                }
            }
        }
    });
}

/// Exports an axial slice PNG through each of the largest lesions,
/// rendered from the T2W volume with the lesion overlay. Export
/// failures are logged and skipped; the report is still written.
fn export_lesion_images(case: &Case, settings: &Settings, output_dir: &Path) -> Vec<ReportImage> {
    let Some(results) = case.prediction_results.as_ref() else {
        return Vec::new();
    };
    let Some(volume) = case
        .file_by_sequence(SequenceType::T2w)
        .and_then(|file| file.volume.as_ref())
    else {
        warn!("No T2W voxel data in memory; report images skipped");
        return Vec::new();
    };
    let mask = results
        .segmentation
        .as_ref()
        .filter(|mask| mask.dim() == volume.data.dim());
    if std::fs::create_dir_all(output_dir).is_err() {
        warn!("Could not create {output_dir:?}; report images skipped");
        return Vec::new();
    }

    let axial_count = volume.data.shape()[SlicePlane::Axial.axis()];
    let mut images = Vec::new();
    for (index, lesion) in results.lesions.iter().take(MAX_REPORT_IMAGES).enumerate() {
        let slice_index = axial_index_for(
            &volume.geometry,
            lesion.centroid[2],
            axial_count.saturating_sub(1),
        );
        let slice = extract_slice(&volume.data, SlicePlane::Axial, slice_index);
        let mask_slice = extract_mask_slice(mask, SlicePlane::Axial, slice_index);
        let path = output_dir.join(format!("{}_lesion_{}_axial.png", case.id, index + 1));
        match save_slice_png(
            &slice,
            mask_slice.as_ref(),
            settings.config.display.window_level,
            settings.config.display.window_width,
            &path,
        ) {
            Ok(()) => images.push(ReportImage {
                path,
                description: format!(
                    "Lesion {} ({}), axial slice {}",
                    index + 1,
                    lesion.severity,
                    slice_index + 1
                ),
            }),
            Err(export_error) => {
                warn!("Could not export image for lesion {}: {export_error}", index + 1);
            }
        }
    }
    images
}

/// Axial slice index closest to the given physical z coordinate.
/// Assumes an axis-aligned direction matrix, which holds for the
/// geometry the loader backends produce by default.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn axial_index_for(geometry: &ImageGeometry, z_mm: f32, max_index: usize) -> usize {
    let spacing = geometry.spacing[2].max(1e-6);
    let index = ((z_mm - geometry.origin[2]) / spacing).round().max(0.0) as usize;
    index.min(max_index)
}

const fn severity_color32(severity: Severity) -> egui::Color32 {
    match severity {
        Severity::High => egui::Color32::from_rgb(217, 31, 31),
        Severity::Moderate => egui::Color32::from_rgb(230, 140, 26),
        Severity::Low => egui::Color32::from_rgb(230, 217, 64),
    }
}
