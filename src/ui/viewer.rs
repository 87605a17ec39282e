use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts};
use rfd::FileDialog;
use strum::IntoEnumIterator;
use tracing::error;

use crate::core::case::Case;
use crate::core::image::load_medical_image;
use crate::vis::plotting::save_slice_png;
use crate::vis::slice::{extract_mask_slice, extract_slice, render_slice, slice_count, SlicePlane};
use crate::{AppStatus, CaseList, Settings};

const PANE_SIZE: f32 = 380.0;

/// Layout of the 2D view: all three orthogonal planes side by side, or
/// a single enlarged plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerMode {
    Mpr,
    Single,
}

/// Slice indices, window/level, and layout of the 2D views.
#[derive(Resource, Debug)]
pub struct ViewerState {
    pub mode: ViewerMode,
    pub file_index: usize,
    pub single_plane: SlicePlane,
    /// Slice index per volume axis (indexed by [`SlicePlane::axis`]).
    pub slices: [usize; 3],
    pub level: f32,
    pub width: f32,
    pub show_overlay: bool,
    initialized: bool,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self {
            mode: ViewerMode::Mpr,
            file_index: 0,
            single_plane: SlicePlane::Axial,
            slices: [0; 3],
            level: 40.0,
            width: 400.0,
            show_overlay: true,
            initialized: false,
        }
    }
}

struct SlicePane {
    label: String,
    texture: egui::TextureHandle,
}

/// Rendered slice textures, rebuilt only when the view parameters or
/// the underlying results change.
#[derive(Resource, Default)]
pub struct SliceTextures {
    key: Option<String>,
    panes: Vec<SlicePane>,
}

/// Draws the 2D viewer: a side panel with sequence, layout, slice and
/// window/level controls, and the slice images in the central panel.
#[allow(clippy::needless_pass_by_value, clippy::too_many_lines)]
#[tracing::instrument(skip_all, level = "trace")]
pub fn draw_ui_viewer(
    mut contexts: EguiContexts,
    mut case_list: ResMut<CaseList>,
    settings: Res<Settings>,
    mut state: ResMut<ViewerState>,
    mut textures: ResMut<SliceTextures>,
    mut status: ResMut<AppStatus>,
) {
    let ctx = match contexts.ctx_mut() {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("EGUI context not available for viewer: {}", e);
            return;
        }
    };

    if !state.initialized {
        state.level = settings.config.display.window_level;
        state.width = settings.config.display.window_width;
        state.initialized = true;
    }

    let mut reload_request: Option<usize> = None;
    let mut export_request = false;

    {
        let Some(case) = case_list.manager.current_case() else {
            textures.key = None;
            textures.panes.clear();
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.label("Open a case to view its volumes.");
            });
            return;
        };
        if state.file_index >= case.files.len() {
            state.file_index = 0;
        }

        egui::SidePanel::left("viewer_left_panel").show(ctx, |ui| {
            draw_controls(
                ui,
                case,
                &settings,
                &mut state,
                &mut reload_request,
                &mut export_request,
            );
        });

        let key = view_key(case, &state);
        if textures.key.as_ref() != Some(&key) {
            rebuild_textures(ctx, case, &state, &mut textures);
            textures.key = Some(key);
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            if textures.panes.is_empty() {
                ui.label("The selected file has no voxel data loaded.");
                return;
            }
            ui.horizontal_wrapped(|ui| {
                for pane in &textures.panes {
                    ui.vertical(|ui| {
                        ui.label(&pane.label);
                        ui.add(
                            egui::Image::new(&pane.texture)
                                .maintain_aspect_ratio(true)
                                .max_size(egui::Vec2::splat(PANE_SIZE)),
                        );
                    });
                }
            });
        });
    }

    if let Some(file_index) = reload_request {
        reload_volume(&mut case_list, file_index, &mut status);
    }
    if export_request {
        export_slice(&case_list, &state, &mut status);
    }
}

#[allow(clippy::too_many_lines)]
fn draw_controls(
    ui: &mut egui::Ui,
    case: &Case,
    settings: &Settings,
    state: &mut ViewerState,
    reload_request: &mut Option<usize>,
    export_request: &mut bool,
) {
    ui.heading("Sequence");
    egui::ComboBox::from_id_salt("viewer_sequence")
        .selected_text(file_label(case, state.file_index))
        .show_ui(ui, |ui| {
            for index in 0..case.files.len() {
                ui.selectable_value(&mut state.file_index, index, file_label(case, index));
            }
        });

    let file = case.files.get(state.file_index);
    let volume = file.and_then(|file| file.volume.as_ref());
    if volume.is_none() {
        ui.label("No voxel data in memory.");
        if ui.button("Reload from disk").clicked() {
            *reload_request = Some(state.file_index);
        }
    }

    ui.separator();
    ui.heading("Layout");
    ui.horizontal(|ui| {
        ui.selectable_value(&mut state.mode, ViewerMode::Mpr, "MPR");
        ui.selectable_value(&mut state.mode, ViewerMode::Single, "Single slice");
    });
    if state.mode == ViewerMode::Single {
        egui::ComboBox::from_id_salt("viewer_plane")
            .selected_text(state.single_plane.to_string())
            .show_ui(ui, |ui| {
                for plane in SlicePlane::iter() {
                    ui.selectable_value(&mut state.single_plane, plane, plane.to_string());
                }
            });
    }

    if let Some(volume) = volume {
        ui.separator();
        ui.heading("Slices");
        for plane in displayed_planes(state) {
            let count = slice_count(&volume.data, plane);
            if count == 0 {
                continue;
            }
            let axis = plane.axis();
            state.slices[axis] = state.slices[axis].min(count - 1);
            ui.add(
                egui::Slider::new(&mut state.slices[axis], 0..=count - 1)
                    .text(plane.to_string()),
            );
        }
    }

    ui.separator();
    ui.heading("Window");
    ui.horizontal(|ui| {
        ui.label("Level");
        ui.add(egui::DragValue::new(&mut state.level).speed(1.0));
        ui.label("Width");
        ui.add(egui::DragValue::new(&mut state.width).speed(1.0));
    });
    if ui.button("Reset window").clicked() {
        state.level = settings.config.display.window_level;
        state.width = settings.config.display.window_width;
    }

    let overlay_available = case
        .prediction_results
        .as_ref()
        .and_then(|results| results.segmentation.as_ref())
        .is_some();
    ui.add_enabled(
        overlay_available,
        egui::Checkbox::new(&mut state.show_overlay, "Lesion overlay"),
    );

    ui.separator();
    if ui
        .add_enabled(volume.is_some(), egui::Button::new("Export slice as PNG..."))
        .clicked()
    {
        *export_request = true;
    }
}

fn file_label(case: &Case, index: usize) -> String {
    case.files.get(index).map_or_else(String::new, |file| {
        let name = file
            .path
            .file_name()
            .map_or_else(String::new, |name| name.to_string_lossy().to_string());
        format!("{} - {name}", file.sequence_type)
    })
}

fn displayed_planes(state: &ViewerState) -> Vec<SlicePlane> {
    match state.mode {
        ViewerMode::Mpr => vec![SlicePlane::Axial, SlicePlane::Coronal, SlicePlane::Sagittal],
        ViewerMode::Single => vec![state.single_plane],
    }
}

/// The segmentation mask, when overlay is enabled and the mask matches
/// the displayed volume's shape. A mask from a cropped model input
/// cannot be drawn over a differently-shaped volume.
fn overlay_mask<'a>(case: &'a Case, state: &ViewerState) -> Option<&'a ndarray::Array3<u8>> {
    if !state.show_overlay {
        return None;
    }
    let mask = case
        .prediction_results
        .as_ref()
        .and_then(|results| results.segmentation.as_ref())?;
    let volume = case
        .files
        .get(state.file_index)
        .and_then(|file| file.volume.as_ref())?;
    (mask.dim() == volume.data.dim()).then_some(mask)
}

fn view_key(case: &Case, state: &ViewerState) -> String {
    let prediction = case
        .prediction_results
        .as_ref()
        .map_or_else(String::new, |results| results.prediction_date.to_string());
    let loaded = case
        .files
        .get(state.file_index)
        .is_some_and(|file| file.volume.is_some());
    format!(
        "{}:{}:{loaded}:{:?}:{}:{:?}:{:.3}:{:.3}:{}:{prediction}",
        case.id,
        state.file_index,
        state.mode,
        state.single_plane,
        state.slices,
        state.level,
        state.width,
        state.show_overlay,
    )
}

fn rebuild_textures(
    ctx: &egui::Context,
    case: &Case,
    state: &ViewerState,
    textures: &mut SliceTextures,
) {
    textures.panes.clear();
    let Some(volume) = case
        .files
        .get(state.file_index)
        .and_then(|file| file.volume.as_ref())
    else {
        return;
    };
    let mask = overlay_mask(case, state);

    for plane in displayed_planes(state) {
        let count = slice_count(&volume.data, plane);
        if count == 0 {
            continue;
        }
        let index = state.slices[plane.axis()].min(count - 1);
        let slice = extract_slice(&volume.data, plane, index);
        let mask_slice = extract_mask_slice(mask, plane, index);
        let image = render_slice(&slice, state.level, state.width, mask_slice.as_ref());
        let texture =
            ctx.load_texture(format!("viewer_{plane}"), image, egui::TextureOptions::NEAREST);
        textures.panes.push(SlicePane {
            label: format!("{plane} {}/{count}", index + 1),
            texture,
        });
    }
}

fn reload_volume(case_list: &mut CaseList, file_index: usize, status: &mut AppStatus) {
    let Some(case) = case_list.manager.current_case_mut() else {
        return;
    };
    let Some(file) = case.files.get_mut(file_index) else {
        return;
    };
    match load_medical_image(&file.path) {
        Ok(image) => {
            // Voxel data is transient state, so the case is not marked
            // as changed by re-reading it.
            file.volume = image.volume;
            if file.volume.is_some() {
                status.report_message(format!("Reloaded voxel data from {}", file.path.display()));
            } else {
                status.report_error(format!(
                    "{} could only be read as metadata",
                    file.path.display()
                ));
            }
        }
        Err(load_error) => {
            status.report_error(format!("Could not reload file: {load_error}"));
        }
    }
}

fn export_slice(case_list: &CaseList, state: &ViewerState, status: &mut AppStatus) {
    let Some(case) = case_list.manager.current_case() else {
        return;
    };
    let Some(volume) = case
        .files
        .get(state.file_index)
        .and_then(|file| file.volume.as_ref())
    else {
        return;
    };
    let plane = match state.mode {
        ViewerMode::Single => state.single_plane,
        ViewerMode::Mpr => SlicePlane::Axial,
    };
    let index = state.slices[plane.axis()];
    let Some(path) = FileDialog::new()
        .add_filter("PNG image", &["png"])
        .set_file_name(format!("{}_{plane}_{index}.png", case.id).to_lowercase())
        .save_file()
    else {
        return;
    };

    let slice = extract_slice(&volume.data, plane, index);
    let mask_slice = extract_mask_slice(overlay_mask(case, state), plane, index);
    match save_slice_png(&slice, mask_slice.as_ref(), state.level, state.width, &path) {
        Ok(()) => status.report_message(format!("Exported slice to {}", path.display())),
        Err(export_error) => {
            status.report_error(format!("Could not export slice: {export_error}"));
        }
    }
}
