use bevy::prelude::*;
use nalgebra::Vector3;
use tracing::{debug, info};

use crate::core::image::ImageGeometry;
use crate::core::postproc::{PredictionResults, Severity};
use crate::CaseList;

/// Upper bound on spawned voxel cubes; denser masks are subsampled.
const MAX_VOXELS: usize = 20_000;

#[derive(Component)]
pub struct LesionVoxel;

/// Tracks which (case, prediction) the 3D scene was last built for, so
/// the voxels are only respawned when the results actually change.
#[derive(Resource, Debug, Default)]
pub struct LesionScene {
    built_for: Option<String>,
}

/// Rebuilds the 3D lesion view when the current case's prediction
/// results change: one cube per (subsampled) mask voxel, colored by
/// the severity of the nearest lesion, camera framed on the volume.
#[allow(clippy::needless_pass_by_value, clippy::cast_precision_loss)]
#[tracing::instrument(level = "trace", skip_all)]
pub fn update_lesion_scene(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    case_list: Res<CaseList>,
    mut scene: ResMut<LesionScene>,
    existing: Query<Entity, With<LesionVoxel>>,
    mut cameras: Query<&mut Transform, With<Camera>>,
) {
    let current = case_list.manager.current_case();
    let key = current.and_then(|case| {
        case.prediction_results
            .as_ref()
            .map(|results| format!("{}:{}", case.id, results.prediction_date))
    });

    if key == scene.built_for {
        return;
    }
    scene.built_for = key;

    for entity in &existing {
        commands.entity(entity).despawn();
    }

    let Some(case) = current else {
        return;
    };
    let Some(results) = case.prediction_results.as_ref() else {
        return;
    };
    let Some(mask) = results.segmentation.as_ref() else {
        debug!("No segmentation mask in memory; skipping 3D rebuild");
        return;
    };

    // The mask lives in the reference (T2W) geometry; a reloaded case
    // has no volume in memory, so fall back to unit geometry.
    let geometry = case
        .file_by_sequence(crate::core::case::SequenceType::T2w)
        .and_then(|file| file.volume.as_ref())
        .map_or_else(ImageGeometry::default, |volume| volume.geometry.clone());

    let voxel_count = mask.iter().filter(|&&voxel| voxel != 0).count();
    if voxel_count == 0 {
        info!("Segmentation mask is empty; nothing to render");
        return;
    }
    let stride = ((voxel_count as f32 / MAX_VOXELS as f32).cbrt().ceil() as usize).max(1);
    info!("Rendering {voxel_count} lesion voxel(s) with stride {stride}");

    let half_size = Vec3::new(
        geometry.spacing[0] * stride as f32 / 2.0,
        geometry.spacing[1] * stride as f32 / 2.0,
        geometry.spacing[2] * stride as f32 / 2.0,
    );
    let mesh = meshes.add(Cuboid {
        half_size,
    });
    let mut severity_materials = SeverityMaterials::new(&mut materials);

    let shape = mask.dim();
    let mut bounds_min = Vec3::splat(f32::INFINITY);
    let mut bounds_max = Vec3::splat(f32::NEG_INFINITY);
    for x in (0..shape.0).step_by(stride) {
        for y in (0..shape.1).step_by(stride) {
            for z in (0..shape.2).step_by(stride) {
                if mask[[x, y, z]] == 0 {
                    continue;
                }
                let physical = geometry.index_to_physical([x, y, z]);
                let position = Vec3::new(physical[0], physical[1], physical[2]);
                bounds_min = bounds_min.min(position);
                bounds_max = bounds_max.max(position);
                let severity = nearest_lesion_severity(results, physical);
                commands.spawn((
                    Mesh3d(mesh.clone()),
                    MeshMaterial3d(severity_materials.get(severity)),
                    Transform::from_translation(position),
                    LesionVoxel,
                ));
            }
        }
    }

    let center = (bounds_min + bounds_max) / 2.0;
    let extent = (bounds_max - bounds_min).length().max(20.0);
    for mut camera in &mut cameras {
        camera.translation = center + Vec3::new(0.0, extent * 1.5, extent * 1.5);
        camera.look_at(center, Vec3::Y);
    }
}

/// One material per severity tier, created lazily.
struct SeverityMaterials<'a> {
    materials: &'a mut Assets<StandardMaterial>,
    high: Option<Handle<StandardMaterial>>,
    moderate: Option<Handle<StandardMaterial>>,
    low: Option<Handle<StandardMaterial>>,
}

impl<'a> SeverityMaterials<'a> {
    fn new(materials: &'a mut Assets<StandardMaterial>) -> Self {
        Self {
            materials,
            high: None,
            moderate: None,
            low: None,
        }
    }

    fn get(&mut self, severity: Severity) -> Handle<StandardMaterial> {
        let slot = match severity {
            Severity::High => &mut self.high,
            Severity::Moderate => &mut self.moderate,
            Severity::Low => &mut self.low,
        };
        slot.get_or_insert_with(|| {
            self.materials
                .add(StandardMaterial::from(severity_color(severity)))
        })
        .clone()
    }
}

/// Display color per severity tier.
#[must_use]
pub fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::High => Color::srgb(0.85, 0.12, 0.12),
        Severity::Moderate => Color::srgb(0.9, 0.55, 0.1),
        Severity::Low => Color::srgb(0.9, 0.85, 0.25),
    }
}

fn nearest_lesion_severity(results: &PredictionResults, physical: [f32; 3]) -> Severity {
    let point = Vector3::new(physical[0], physical[1], physical[2]);
    results
        .lesions
        .iter()
        .min_by(|a, b| {
            let da = (Vector3::from(a.centroid) - point).norm_squared();
            let db = (Vector3::from(b.centroid) - point).norm_squared();
            da.total_cmp(&db)
        })
        .map_or(Severity::Low, |lesion| lesion.severity)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::core::postproc::Lesion;

    #[test]
    fn nearest_lesion_wins_the_severity_vote() {
        let results = PredictionResults {
            segmentation: None,
            lesions: vec![
                Lesion {
                    id: 1,
                    volume_mm3: 600.0,
                    max_diameter_mm: 12.0,
                    centroid: [0.0, 0.0, 0.0],
                    probability: 0.9,
                    severity: Severity::High,
                },
                Lesion {
                    id: 2,
                    volume_mm3: 50.0,
                    max_diameter_mm: 4.0,
                    centroid: [100.0, 0.0, 0.0],
                    probability: 0.3,
                    severity: Severity::Low,
                },
            ],
            num_lesions: 2,
            has_significant_lesion: true,
            total_lesion_volume: 650.0,
            prediction_date: Utc::now(),
        };

        assert_eq!(
            nearest_lesion_severity(&results, [5.0, 0.0, 0.0]),
            Severity::High
        );
        assert_eq!(
            nearest_lesion_severity(&results, [95.0, 0.0, 0.0]),
            Severity::Low
        );
    }
}
