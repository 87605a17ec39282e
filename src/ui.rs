mod cases;
mod results;
mod settings;
mod topbar;
mod viewer;

use bevy::prelude::*;
use bevy_egui::{EguiPlugin, EguiPrimaryContextPass};

use self::{
    cases::{draw_ui_cases, MetadataDraft},
    results::{draw_ui_results, ReportDraft},
    settings::{draw_ui_settings, SettingsWindow},
    topbar::draw_ui_topbar,
    viewer::{draw_ui_viewer, SliceTextures, ViewerState},
};

#[allow(clippy::module_name_repetitions)]
#[derive(Debug)]
pub struct UiPlugin;

impl Plugin for UiPlugin {
    #[tracing::instrument(skip(app))]
    fn build(&self, app: &mut App) {
        app.init_state::<UiState>()
            .init_resource::<ViewerState>()
            .init_resource::<SliceTextures>()
            .init_resource::<MetadataDraft>()
            .init_resource::<ReportDraft>()
            .init_resource::<SettingsWindow>()
            .add_plugins(EguiPlugin)
            .add_systems(EguiPrimaryContextPass, draw_ui_topbar)
            .add_systems(
                EguiPrimaryContextPass,
                draw_ui_cases
                    .run_if(in_state(UiState::Cases))
                    .after(draw_ui_topbar),
            )
            .add_systems(
                EguiPrimaryContextPass,
                draw_ui_viewer
                    .run_if(in_state(UiState::Viewer))
                    .after(draw_ui_topbar),
            )
            .add_systems(
                EguiPrimaryContextPass,
                draw_ui_results
                    .run_if(in_state(UiState::Results))
                    .after(draw_ui_topbar),
            )
            .add_systems(EguiPrimaryContextPass, draw_ui_settings.after(draw_ui_topbar));
    }
}

/// An enum representing the different UI states of the application.
///
/// The default state is `Cases`. `Viewer` holds the 2D slice views,
/// `Volumetric` the 3D lesion view, and `Results` the lesion table and
/// report dialog.
///
/// This allows conditional rendering of different UI components
/// depending on the current state.
#[derive(States, Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
#[allow(clippy::module_name_repetitions)]
pub enum UiState {
    #[default]
    Cases,
    Viewer,
    Volumetric,
    Results,
}
