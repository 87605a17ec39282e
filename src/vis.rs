pub mod lesions;
pub mod plotting;
pub mod slice;

use bevy::prelude::*;
use bevy_editor_cam::prelude::{DefaultEditorCamPlugins, EditorCam};

use self::lesions::{update_lesion_scene, LesionScene};

#[allow(clippy::module_name_repetitions)]
#[derive(Debug)]
pub struct VisPlugin;

impl Plugin for VisPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(DefaultEditorCamPlugins)
            .init_resource::<LesionScene>()
            .add_systems(Startup, setup)
            .add_systems(Update, update_lesion_scene);
    }
}

pub fn setup(mut commands: Commands) {
    commands.spawn((
        PointLight {
            intensity: 1_500_000.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(40.0, 80.0, 40.0),
    ));

    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(-40.0, 60.0, 120.0).looking_at(Vec3::ZERO, Vec3::Y),
        EditorCam::default(),
    ));
}
