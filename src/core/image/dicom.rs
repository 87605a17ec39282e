use std::collections::BTreeMap;
use std::path::Path;

use dicom_object::{open_file, DefaultDicomObject};
use dicom_pixeldata::PixelDecoder;
use nalgebra::Vector3;
use tracing::debug;

use super::{geometry_metadata, ImageGeometry, ImageVolume, LoadedImage, VolumeLoader};
use crate::core::error::LoadError;

/// Metadata elements copied into the uniform key-value map when present.
const METADATA_FIELD_NAMES: &[&str] = &[
    "PatientName",
    "PatientID",
    "PatientSex",
    "PatientBirthDate",
    "StudyDate",
    "StudyDescription",
    "SeriesDescription",
    "Modality",
    "Manufacturer",
    "InstitutionName",
    "BodyPartExamined",
    "SliceThickness",
    "InstanceNumber",
];

/// DICOM backend for single-file (possibly multi-frame) series.
#[derive(Debug, Clone, Copy)]
pub struct DicomLoader;

impl DicomLoader {
    fn backend_error(&self, path: &Path, message: impl ToString) -> LoadError {
        LoadError::Backend {
            backend: self.name(),
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

impl VolumeLoader for DicomLoader {
    fn name(&self) -> &'static str {
        "dicom"
    }

    fn can_load(&self, path: &Path) -> bool {
        matches!(
            path.extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .as_deref(),
            Some("dcm" | "dicom")
        )
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn load(&self, path: &Path) -> Result<LoadedImage, LoadError> {
        debug!("Loading DICOM file from {path:?}");
        let object = open_file(path).map_err(|error| self.backend_error(path, error))?;

        let mut metadata = BTreeMap::new();
        for field in METADATA_FIELD_NAMES {
            if let Some(value) = string_element(&object, field) {
                metadata.insert((*field).to_string(), value);
            }
        }

        let decoded = object
            .decode_pixel_data()
            .map_err(|error| self.backend_error(path, error))?;
        let pixels = decoded
            .to_ndarray::<f32>()
            .map_err(|error| self.backend_error(path, error))?;
        // Decoded shape is (frames, rows, cols, samples); monochrome data is
        // assumed, so sample 0 is taken and axes are reordered to (x, y, z).
        if pixels.ndim() != 4 {
            return Err(self.backend_error(path, format!("unexpected pixel array rank {}", pixels.ndim())));
        }
        let data = pixels
            .index_axis_move(ndarray::Axis(3), 0)
            .permuted_axes(&[2, 1, 0][..])
            .as_standard_layout()
            .into_owned()
            .into_dimensionality::<ndarray::Ix3>()
            .map_err(|error| self.backend_error(path, error))?;

        let geometry = geometry_from_object(&object);
        let shape = {
            let s = data.shape();
            [s[0], s[1], s[2]]
        };
        metadata.extend(geometry_metadata(&geometry, shape));

        Ok(LoadedImage {
            volume: Some(ImageVolume { data, geometry }),
            metadata,
            format: super::file_format(path),
            loaded_with: self.name(),
        })
    }
}

fn string_element(object: &DefaultDicomObject, name: &str) -> Option<String> {
    object
        .element_by_name(name)
        .ok()
        .and_then(|element| element.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn multi_float_element(object: &DefaultDicomObject, name: &str) -> Option<Vec<f32>> {
    object
        .element_by_name(name)
        .ok()
        .and_then(|element| element.to_multi_float32().ok())
}

/// Builds spacing, origin, and direction from the patient-space elements,
/// falling back to identity defaults for anything missing.
fn geometry_from_object(object: &DefaultDicomObject) -> ImageGeometry {
    let mut geometry = ImageGeometry::default();

    if let Some(pixel_spacing) = multi_float_element(object, "PixelSpacing") {
        if pixel_spacing.len() >= 2 {
            // PixelSpacing is (row, col) = (y, x).
            geometry.spacing[0] = pixel_spacing[1];
            geometry.spacing[1] = pixel_spacing[0];
        }
    }
    if let Some(between) = multi_float_element(object, "SpacingBetweenSlices")
        .or_else(|| multi_float_element(object, "SliceThickness"))
    {
        if let Some(z_spacing) = between.first() {
            geometry.spacing[2] = *z_spacing;
        }
    }

    if let Some(position) = multi_float_element(object, "ImagePositionPatient") {
        if position.len() >= 3 {
            geometry.origin = [position[0], position[1], position[2]];
        }
    }

    if let Some(orientation) = multi_float_element(object, "ImageOrientationPatient") {
        if orientation.len() >= 6 {
            let row = Vector3::new(orientation[0], orientation[1], orientation[2]);
            let col = Vector3::new(orientation[3], orientation[4], orientation[5]);
            let normal = row.cross(&col);
            geometry.direction = [
                row[0], col[0], normal[0],
                row[1], col[1], normal[1],
                row[2], col[2], normal[2],
            ];
        }
    }

    geometry
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn claims_dicom_extensions_only() {
        let loader = DicomLoader;
        assert!(loader.can_load(Path::new("series/slice_001.dcm")));
        assert!(loader.can_load(Path::new("series/slice_001.DICOM")));
        assert!(!loader.can_load(Path::new("series/volume.nii.gz")));
    }
}
