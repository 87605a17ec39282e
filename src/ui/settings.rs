use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts};
use rfd::FileDialog;
use tracing::error;

use crate::core::config::AppConfig;
use crate::{AppStatus, Settings};

/// Visibility of the floating settings window, toggled from the topbar.
#[derive(Resource, Debug, Default)]
pub struct SettingsWindow {
    pub open: bool,
}

/// Draws the settings window: model, severity, display, and report
/// options, with save and reset actions.
#[allow(clippy::needless_pass_by_value, clippy::too_many_lines)]
#[tracing::instrument(skip_all, level = "trace")]
pub fn draw_ui_settings(
    mut contexts: EguiContexts,
    mut window: ResMut<SettingsWindow>,
    mut settings: ResMut<Settings>,
    mut status: ResMut<AppStatus>,
) {
    if !window.open {
        return;
    }
    let ctx = match contexts.ctx_mut() {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("EGUI context not available for settings window: {}", e);
            return;
        }
    };

    let mut open = window.open;
    egui::Window::new("Settings")
        .open(&mut open)
        .resizable(true)
        .show(ctx, |ui| {
            let config = &mut settings.config;

            ui.heading("Model");
            ui.horizontal(|ui| {
                let label = config
                    .model
                    .path
                    .as_ref()
                    .map_or_else(|| "default locations".to_string(), |path| path.display().to_string());
                ui.label(format!("Checkpoint: {label}"));
                if ui.button("Browse...").clicked() {
                    if let Some(path) = FileDialog::new()
                        .add_filter("ONNX models", &["onnx"])
                        .pick_file()
                    {
                        config.model.path = Some(path);
                    }
                }
                if config.model.path.is_some() && ui.button("Clear").clicked() {
                    config.model.path = None;
                }
            });
            ui.add(
                egui::Slider::new(&mut config.model.threshold, 0.05..=0.95)
                    .text("Probability threshold"),
            );
            ui.add(egui::Slider::new(&mut config.model.overlap, 0.0..=0.9).text("Window overlap"));

            ui.separator();
            ui.heading("Severity thresholds");
            ui.label("Illustrative defaults, not clinically validated.");
            egui::Grid::new("severity_grid").num_columns(2).show(ui, |ui| {
                ui.label("Alta volume (mm3)");
                ui.add(egui::DragValue::new(&mut config.severity.high_volume_mm3).speed(10.0));
                ui.end_row();
                ui.label("Alta probability");
                ui.add(
                    egui::DragValue::new(&mut config.severity.high_probability)
                        .speed(0.01)
                        .range(0.0..=1.0),
                );
                ui.end_row();
                ui.label("Media volume (mm3)");
                ui.add(egui::DragValue::new(&mut config.severity.moderate_volume_mm3).speed(10.0));
                ui.end_row();
                ui.label("Media probability");
                ui.add(
                    egui::DragValue::new(&mut config.severity.moderate_probability)
                        .speed(0.01)
                        .range(0.0..=1.0),
                );
                ui.end_row();
            });

            ui.separator();
            ui.heading("Display defaults");
            ui.horizontal(|ui| {
                ui.label("Window level");
                ui.add(egui::DragValue::new(&mut config.display.window_level).speed(1.0));
                ui.label("Window width");
                ui.add(egui::DragValue::new(&mut config.display.window_width).speed(1.0));
            });

            ui.separator();
            ui.heading("Reports");
            ui.horizontal(|ui| {
                let label = config.report.output_dir.as_ref().map_or_else(
                    config_free_report_dir,
                    |dir| dir.display().to_string(),
                );
                ui.label(format!("Output directory: {label}"));
                if ui.button("Browse...").clicked() {
                    if let Some(dir) = FileDialog::new().pick_folder() {
                        config.report.output_dir = Some(dir);
                    }
                }
            });
            optional_text_field(ui, "Institution", &mut config.report.institution);
            optional_text_field(ui, "Physician", &mut config.report.physician);

            ui.separator();
            ui.horizontal(|ui| {
                if ui.button("Save").clicked() {
                    match config.save() {
                        Ok(()) => status.report_message("Configuration saved"),
                        Err(persistence_error) => {
                            status.report_error(format!(
                                "Could not save configuration: {persistence_error}"
                            ));
                        }
                    }
                }
                if ui.button("Reset to defaults").clicked() {
                    *config = AppConfig::default();
                }
            });
        });
    window.open = open;
}

fn config_free_report_dir() -> String {
    AppConfig::default().report_dir().display().to_string()
}

/// Text edit over an optional string; empty input clears the value.
fn optional_text_field(ui: &mut egui::Ui, label: &str, value: &mut Option<String>) {
    let mut text = value.clone().unwrap_or_default();
    ui.horizontal(|ui| {
        ui.label(label);
        if ui.text_edit_singleline(&mut text).changed() {
            *value = (!text.is_empty()).then_some(text);
        }
    });
}
