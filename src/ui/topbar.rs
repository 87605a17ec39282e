use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts};
use egui::ProgressBar;
use tracing::{error, trace};

use super::settings::SettingsWindow;
use super::UiState;
use crate::scheduler::PredictionSlot;
use crate::{AppStatus, CaseList, Settings};

/// Draws the UI for the top bar, containing buttons to switch between
/// UI states, the prediction start button with its progress display,
/// and the status line.
#[allow(clippy::module_name_repetitions, clippy::needless_pass_by_value)]
#[tracing::instrument(skip_all, level = "trace")]
pub fn draw_ui_topbar(
    mut commands: Commands,
    mut contexts: EguiContexts,
    ui_state: Res<State<UiState>>,
    mut case_list: ResMut<CaseList>,
    settings: Res<Settings>,
    mut slot: ResMut<PredictionSlot>,
    mut status: ResMut<AppStatus>,
    mut settings_window: ResMut<SettingsWindow>,
) {
    trace!("Running system to draw topbar.");
    let ctx = match contexts.ctx_mut() {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("EGUI context not available for topbar: {}", e);
            return;
        }
    };
    egui::TopBottomPanel::top("menu_panel").show(ctx, |ui| {
        ui.horizontal(|ui| {
            let has_case = case_list.manager.current_case().is_some();
            let has_results = case_list
                .manager
                .current_case_prediction_results()
                .is_some();

            if ui
                .add_enabled(ui_state.get() != &UiState::Cases, egui::Button::new("Cases"))
                .clicked()
            {
                commands.insert_resource(NextState::Pending(UiState::Cases));
            }
            if ui
                .add_enabled(
                    ui_state.get() != &UiState::Viewer && has_case,
                    egui::Button::new("Viewer"),
                )
                .clicked()
            {
                commands.insert_resource(NextState::Pending(UiState::Viewer));
            }
            if ui
                .add_enabled(
                    ui_state.get() != &UiState::Volumetric && has_results,
                    egui::Button::new("3D"),
                )
                .clicked()
            {
                commands.insert_resource(NextState::Pending(UiState::Volumetric));
            }
            // Fresh results are flagged until the user has looked at them.
            let results_label = if case_list.results_stale {
                "Results *"
            } else {
                "Results"
            };
            if ui
                .add_enabled(
                    ui_state.get() != &UiState::Results && has_results,
                    egui::Button::new(results_label),
                )
                .clicked()
            {
                case_list.results_stale = false;
                commands.insert_resource(NextState::Pending(UiState::Results));
            }
            if ui.button("Settings").clicked() {
                settings_window.open = !settings_window.open;
            }

            ui.separator();

            if slot.is_busy() {
                if let Some(task) = slot.current() {
                    ui.label(format!("{}", task.progress.phase));
                    ui.add(
                        ProgressBar::new(f32::from(task.progress.percent) / 100.0)
                            .desired_width(160.0),
                    );
                }
            } else if ui
                .add_enabled(has_case, egui::Button::new("Start prediction"))
                .clicked()
            {
                if let Some(case) = case_list.manager.current_case() {
                    match slot.admit(case, &settings.config) {
                        Ok(()) => status.report_message(format!(
                            "Prediction started for case {}",
                            case.id
                        )),
                        Err(app_error) => {
                            status.report_error(format!("Could not start prediction: {app_error}"));
                        }
                    }
                }
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if let Some(error_text) = &status.last_error {
                    ui.colored_label(egui::Color32::from_rgb(200, 60, 60), error_text);
                } else if let Some(message) = &status.last_message {
                    ui.label(message);
                }
            });
        });
    });
}
