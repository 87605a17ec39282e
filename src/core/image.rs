pub mod dicom;
pub mod meta;
pub mod nifti;

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::LoadError;

/// Physical geometry of a volume: per-axis spacing in mm, origin in mm,
/// and a row-major 3x3 direction cosine matrix.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ImageGeometry {
    pub spacing: [f32; 3],
    pub origin: [f32; 3],
    pub direction: [f32; 9],
}

impl Default for ImageGeometry {
    fn default() -> Self {
        Self {
            spacing: [1.0, 1.0, 1.0],
            origin: [0.0, 0.0, 0.0],
            direction: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl ImageGeometry {
    /// Physical volume of a single voxel in mm^3.
    #[must_use]
    pub fn voxel_volume_mm3(&self) -> f32 {
        self.spacing[0] * self.spacing[1] * self.spacing[2]
    }

    /// Maps a voxel index to physical coordinates.
    #[must_use]
    pub fn index_to_physical(&self, index: [usize; 3]) -> [f32; 3] {
        #[allow(clippy::cast_precision_loss)]
        let scaled = [
            index[0] as f32 * self.spacing[0],
            index[1] as f32 * self.spacing[1],
            index[2] as f32 * self.spacing[2],
        ];
        let d = &self.direction;
        [
            d[2].mul_add(scaled[2], d[0].mul_add(scaled[0], d[1] * scaled[1])) + self.origin[0],
            d[5].mul_add(scaled[2], d[3].mul_add(scaled[0], d[4] * scaled[1])) + self.origin[1],
            d[8].mul_add(scaled[2], d[6].mul_add(scaled[0], d[7] * scaled[1])) + self.origin[2],
        ]
    }
}

/// A loaded volume: voxel data indexed `[x, y, z]` plus its geometry.
#[derive(Debug, PartialEq, Clone)]
pub struct ImageVolume {
    pub data: Array3<f32>,
    pub geometry: ImageGeometry,
}

impl ImageVolume {
    #[must_use]
    pub fn shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }
}

/// Uniform result of loading a medical image file, independent of which
/// backend produced it. The voxel data is `None` when only the fallback
/// backend could make sense of the file.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub volume: Option<ImageVolume>,
    pub metadata: BTreeMap<String, String>,
    pub format: String,
    pub loaded_with: &'static str,
}

/// A capability provider for one image format family. Providers are
/// attempted in rank order; the first one that claims the file and
/// succeeds wins.
pub trait VolumeLoader {
    fn name(&self) -> &'static str;

    /// Cheap capability check, based on the file name only.
    fn can_load(&self, path: &Path) -> bool;

    /// Reads the file.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] when the file cannot be parsed by this
    /// backend.
    fn load(&self, path: &Path) -> Result<LoadedImage, LoadError>;
}

/// Fallback provider of last resort: claims every file and reports
/// filesystem metadata only, with no voxel data.
#[derive(Debug, Clone, Copy)]
pub struct MetadataOnlyLoader;

impl VolumeLoader for MetadataOnlyLoader {
    fn name(&self) -> &'static str {
        "metadata-only"
    }

    fn can_load(&self, _path: &Path) -> bool {
        true
    }

    fn load(&self, path: &Path) -> Result<LoadedImage, LoadError> {
        let attributes = std::fs::metadata(path).map_err(|error| LoadError::Backend {
            backend: self.name(),
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
        let mut metadata = BTreeMap::new();
        metadata.insert("file_size_bytes".into(), attributes.len().to_string());
        if let Ok(modified) = attributes.modified() {
            let modified: chrono::DateTime<chrono::Utc> = modified.into();
            metadata.insert("file_modified".into(), modified.to_rfc3339());
        }
        Ok(LoadedImage {
            volume: None,
            metadata,
            format: file_format(path),
            loaded_with: self.name(),
        })
    }
}

/// The ranked backend list: NIfTI, then DICOM, then MetaImage, then the
/// metadata-only fallback.
#[must_use]
pub fn backends() -> Vec<Box<dyn VolumeLoader>> {
    vec![
        Box::new(nifti::NiftiLoader),
        Box::new(dicom::DicomLoader),
        Box::new(meta::MetaImageLoader),
        Box::new(MetadataOnlyLoader),
    ]
}

/// Loads a medical image by walking the ranked backends.
///
/// Backend failures are logged and the next provider is tried; the call
/// only fails when the file does not exist or every capable backend
/// failed.
///
/// # Errors
///
/// Returns [`LoadError::FileNotFound`] for missing files and
/// [`LoadError::AllBackendsFailed`] when no provider succeeded.
#[tracing::instrument(level = "debug")]
pub fn load_medical_image(path: &Path) -> Result<LoadedImage, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound(path.to_path_buf()));
    }

    let mut failures = Vec::new();
    for backend in backends() {
        if !backend.can_load(path) {
            continue;
        }
        match backend.load(path) {
            Ok(image) => {
                debug!("Loaded {path:?} with backend {}", backend.name());
                return Ok(image);
            }
            Err(error) => {
                warn!("Backend {} failed on {path:?}: {error}", backend.name());
                failures.push(format!("{}: {error}", backend.name()));
            }
        }
    }

    Err(LoadError::AllBackendsFailed {
        path: path.to_path_buf(),
        details: failures.join("; "),
    })
}

/// The file format as a lowercase extension, keeping the double
/// extension of gzipped NIfTI files.
#[must_use]
pub fn file_format(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".nii.gz") {
        return ".nii.gz".into();
    }
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

pub(crate) fn geometry_metadata(geometry: &ImageGeometry, shape: [usize; 3]) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("dimensions".into(), format!("{shape:?}"));
    metadata.insert("spacing".into(), format!("{:?}", geometry.spacing));
    metadata.insert("origin".into(), format!("{:?}", geometry.origin));
    metadata
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn missing_file_is_reported_as_not_found() {
        let result = load_medical_image(Path::new("does/not/exist.nii"));
        assert!(matches!(result, Err(LoadError::FileNotFound(_))));
    }

    #[test]
    fn format_keeps_gzipped_nifti_double_extension() {
        assert_eq!(file_format(Path::new("/a/b/scan_t2w.nii.gz")), ".nii.gz");
        assert_eq!(file_format(Path::new("/a/b/scan_adc.nii")), ".nii");
        assert_eq!(file_format(Path::new("/a/b/scan.MHA")), ".mha");
    }

    #[test]
    fn fallback_reports_file_size() {
        let dir = std::env::temp_dir().join("prostalyzer_image_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path: PathBuf = dir.join("opaque.bin");
        std::fs::write(&path, b"not an image").unwrap();

        let image = load_medical_image(&path).unwrap();

        assert_eq!(image.loaded_with, "metadata-only");
        assert!(image.volume.is_none());
        assert_eq!(image.metadata.get("file_size_bytes").unwrap(), "12");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn index_to_physical_applies_spacing_and_origin() {
        let geometry = ImageGeometry {
            spacing: [0.5, 0.5, 3.0],
            origin: [10.0, -20.0, 5.0],
            ..Default::default()
        };
        let physical = geometry.index_to_physical([4, 2, 1]);
        assert!((physical[0] - 12.0).abs() < 1e-6);
        assert!((physical[1] - -19.0).abs() < 1e-6);
        assert!((physical[2] - 8.0).abs() < 1e-6);
    }
}
