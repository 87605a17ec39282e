use std::collections::BTreeMap;

use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts};
use egui_extras::{Column, TableBuilder};
use rfd::FileDialog;
use tracing::error;

use crate::{AppStatus, CaseList};

const IMAGE_EXTENSIONS: &[&str] = &["nii", "gz", "mha", "mhd", "dcm", "dicom"];

/// Edit buffers for the study metadata fields, refreshed whenever the
/// current case changes.
#[derive(Resource, Debug, Default)]
pub struct MetadataDraft {
    case_id: Option<String>,
    patient_id: String,
    study_date: String,
}

/// Draws the case explorer: the list of open cases, the file table of
/// the current case, and its study metadata.
#[allow(clippy::needless_pass_by_value, clippy::too_many_lines)]
#[tracing::instrument(skip_all, level = "trace")]
pub fn draw_ui_cases(
    mut contexts: EguiContexts,
    mut case_list: ResMut<CaseList>,
    mut status: ResMut<AppStatus>,
    mut draft: ResMut<MetadataDraft>,
) {
    let ctx = match contexts.ctx_mut() {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("EGUI context not available for case panel: {}", e);
            return;
        }
    };
    egui::CentralPanel::default().show(ctx, |ui| {
        draw_toolbar(ui, &mut case_list, &mut status);
        ui.separator();
        draw_case_table(ui, &mut case_list);
        ui.separator();
        draw_current_case(ui, &mut case_list, &mut status, &mut draft);
    });
}

fn draw_toolbar(ui: &mut egui::Ui, case_list: &mut CaseList, status: &mut AppStatus) {
    ui.horizontal(|ui| {
        if ui.button("Open images...").clicked() {
            let picked = FileDialog::new()
                .add_filter("Medical images", IMAGE_EXTENSIONS)
                .pick_files()
                .unwrap_or_default();
            if !picked.is_empty() {
                match case_list.manager.load_case(&picked) {
                    Ok(case) => {
                        status.report_message(format!("Loaded case {}", case.name));
                    }
                    Err(load_error) => {
                        status.report_error(format!("Could not load case: {load_error}"));
                    }
                }
            }
        }
        if ui.button("Open case...").clicked() {
            if let Some(path) = FileDialog::new().add_filter("Case files", &["json"]).pick_file() {
                match case_list.manager.load_case_from_file(&path) {
                    Ok(case) => status.report_message(format!("Opened case {}", case.name)),
                    Err(persistence_error) => {
                        status.report_error(format!("Could not open case: {persistence_error}"));
                    }
                }
            }
        }

        let has_case = case_list.manager.current_case().is_some();
        if ui.add_enabled(has_case, egui::Button::new("Save case")).clicked() {
            match case_list.manager.save_current_case(None) {
                Ok(path) => status.report_message(format!("Saved case to {}", path.display())),
                Err(persistence_error) => {
                    status.report_error(format!("Could not save case: {persistence_error}"));
                }
            }
        }
        if ui.add_enabled(has_case, egui::Button::new("Close case")).clicked() {
            case_list.manager.close_current_case();
            status.report_message("Case closed");
        }
        if ui
            .add_enabled(case_list.manager.has_open_cases(), egui::Button::new("Close all"))
            .clicked()
        {
            case_list.manager.close_all_cases();
            status.report_message("All cases closed");
        }
    });
}

fn draw_case_table(ui: &mut egui::Ui, case_list: &mut CaseList) {
    let current = case_list.manager.current_index();
    let mut select: Option<usize> = None;

    TableBuilder::new(ui)
        .id_salt("case_table")
        .column(Column::initial(220.0).resizable(true))
        .column(Column::initial(170.0).resizable(true))
        .column(Column::initial(60.0).resizable(true))
        .column(Column::initial(80.0).resizable(true))
        .column(Column::remainder())
        .header(20.0, |mut header| {
            header.col(|ui| {
                ui.heading("Name");
            });
            header.col(|ui| {
                ui.heading("ID");
            });
            header.col(|ui| {
                ui.heading("Files");
            });
            header.col(|ui| {
                ui.heading("Lesions");
            });
            header.col(|ui| {
                ui.heading("Modified");
            });
        })
        .body(|mut body| {
            for (index, case) in case_list.manager.cases().iter().enumerate() {
                body.row(24.0, |mut row| {
                    row.col(|ui| {
                        let label = if Some(index) == current {
                            format!("> {}", case.name)
                        } else {
                            case.name.clone()
                        };
                        if ui.button(label).clicked() {
                            select = Some(index);
                        }
                    });
                    row.col(|ui| {
                        ui.label(&case.id);
                    });
                    row.col(|ui| {
                        ui.label(case.files.len().to_string());
                    });
                    row.col(|ui| {
                        match &case.prediction_results {
                            Some(results) => ui.label(results.num_lesions.to_string()),
                            None => ui.label("-"),
                        };
                    });
                    row.col(|ui| {
                        ui.label(case.modified_date.format("%Y-%m-%d %H:%M").to_string());
                    });
                });
            }
        });

    if let Some(index) = select {
        case_list.manager.select(index);
    }
}

#[allow(clippy::too_many_lines)]
fn draw_current_case(
    ui: &mut egui::Ui,
    case_list: &mut CaseList,
    status: &mut AppStatus,
    draft: &mut MetadataDraft,
) {
    let Some(case) = case_list.manager.current_case() else {
        ui.label("No case is currently open.");
        return;
    };

    ui.heading(format!("Files of {}", case.name));
    let mut remove: Option<usize> = None;

    TableBuilder::new(ui)
        .id_salt("file_table")
        .column(Column::initial(320.0).resizable(true))
        .column(Column::initial(90.0).resizable(true))
        .column(Column::initial(90.0).resizable(true))
        .column(Column::initial(110.0).resizable(true))
        .column(Column::initial(70.0).resizable(true))
        .column(Column::remainder())
        .header(20.0, |mut header| {
            header.col(|ui| {
                ui.heading("File");
            });
            header.col(|ui| {
                ui.heading("Sequence");
            });
            header.col(|ui| {
                ui.heading("Format");
            });
            header.col(|ui| {
                ui.heading("Backend");
            });
            header.col(|ui| {
                ui.heading("Voxels");
            });
            header.col(|ui| {
                ui.heading("");
            });
        })
        .body(|mut body| {
            for (index, file) in case.files.iter().enumerate() {
                body.row(22.0, |mut row| {
                    row.col(|ui| {
                        let name = file
                            .path
                            .file_name()
                            .map_or_else(String::new, |name| name.to_string_lossy().to_string());
                        ui.label(name).on_hover_text(file.path.display().to_string());
                    });
                    row.col(|ui| {
                        ui.label(file.sequence_type.to_string());
                    });
                    row.col(|ui| {
                        ui.label(&file.format);
                    });
                    row.col(|ui| {
                        ui.label(&file.loaded_with);
                    });
                    row.col(|ui| {
                        if file.volume.is_some() {
                            ui.label("loaded");
                        } else {
                            ui.label("-");
                        }
                    });
                    row.col(|ui| {
                        if ui.button("Remove").clicked() {
                            remove = Some(index);
                        }
                    });
                });
            }
        });

    if let Some(index) = remove {
        case_list.manager.remove_file_from_current_case(index);
    }

    ui.horizontal(|ui| {
        if ui.button("Add file...").clicked() {
            if let Some(path) = FileDialog::new()
                .add_filter("Medical images", IMAGE_EXTENSIONS)
                .pick_file()
            {
                if let Err(load_error) = case_list.manager.add_file_to_current_case(&path) {
                    status.report_error(format!("Could not add file: {load_error}"));
                }
            }
        }
    });

    ui.separator();
    draw_metadata(ui, case_list, draft);
}

fn draw_metadata(ui: &mut egui::Ui, case_list: &mut CaseList, draft: &mut MetadataDraft) {
    let Some(case) = case_list.manager.current_case() else {
        return;
    };
    ui.heading("Study metadata");

    // The edit buffers are refreshed whenever a different case becomes
    // current, so in-progress edits survive across frames.
    if draft.case_id.as_deref() != Some(case.id.as_str()) {
        draft.case_id = Some(case.id.clone());
        draft.patient_id = case.metadata.get("patient_id").cloned().unwrap_or_default();
        draft.study_date = case.metadata.get("study_date").cloned().unwrap_or_default();
    }

    egui::Grid::new("metadata_grid").num_columns(2).show(ui, |ui| {
        ui.label("Patient ID");
        ui.text_edit_singleline(&mut draft.patient_id);
        ui.end_row();
        ui.label("Study date");
        ui.text_edit_singleline(&mut draft.study_date);
        ui.end_row();
    });

    let stored_patient_id = case.metadata.get("patient_id").cloned().unwrap_or_default();
    let stored_study_date = case.metadata.get("study_date").cloned().unwrap_or_default();
    let dirty = draft.patient_id != stored_patient_id || draft.study_date != stored_study_date;
    if ui.add_enabled(dirty, egui::Button::new("Apply")).clicked() {
        let mut update = BTreeMap::new();
        update.insert("patient_id".to_string(), draft.patient_id.clone());
        update.insert("study_date".to_string(), draft.study_date.clone());
        case_list.manager.update_current_case_metadata(&update);
    }
}
