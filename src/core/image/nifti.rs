use std::path::Path;

use ndarray::Ix3;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use tracing::debug;

use super::{geometry_metadata, ImageGeometry, ImageVolume, LoadedImage, VolumeLoader};
use crate::core::error::LoadError;

/// NIfTI-1 backend, handling plain and gzipped files.
#[derive(Debug, Clone, Copy)]
pub struct NiftiLoader;

impl NiftiLoader {
    fn backend_error(&self, path: &Path, message: impl ToString) -> LoadError {
        LoadError::Backend {
            backend: self.name(),
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

impl VolumeLoader for NiftiLoader {
    fn name(&self) -> &'static str {
        "nifti"
    }

    fn can_load(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        name.ends_with(".nii") || name.ends_with(".nii.gz")
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn load(&self, path: &Path) -> Result<LoadedImage, LoadError> {
        debug!("Loading nifti file from {path:?}");
        let object = ReaderOptions::new()
            .read_file(path)
            .map_err(|error| self.backend_error(path, error))?;
        let header = object.header().clone();
        debug!("Nifti header: {header:?}");

        let data = object
            .into_volume()
            .into_ndarray::<f32>()
            .map_err(|error| self.backend_error(path, error))?;
        // Trailing singleton dimensions (time axis of length one) are common
        // in exported segmentations and are squeezed away.
        let mut data = data;
        while data.ndim() > 3 && data.shape()[data.ndim() - 1] == 1 {
            data = data.index_axis_move(ndarray::Axis(data.ndim() - 1), 0);
        }
        let data = data
            .into_dimensionality::<Ix3>()
            .map_err(|error| self.backend_error(path, error))?;

        let geometry = ImageGeometry {
            spacing: [header.pixdim[1], header.pixdim[2], header.pixdim[3]],
            origin: [header.quatern_x, header.quatern_y, header.quatern_z],
            ..Default::default()
        };
        let shape = {
            let s = data.shape();
            [s[0], s[1], s[2]]
        };
        let mut metadata = geometry_metadata(&geometry, shape);
        metadata.insert("datatype".into(), format!("{:?}", header.datatype));
        if let Ok(description) = std::str::from_utf8(&header.descrip) {
            let description = description.trim_end_matches('\0').trim();
            if !description.is_empty() {
                metadata.insert("description".into(), description.to_string());
            }
        }

        Ok(LoadedImage {
            volume: Some(ImageVolume {
                data,
                geometry,
            }),
            metadata,
            format: super::file_format(path),
            loaded_with: self.name(),
        })
    }
}
