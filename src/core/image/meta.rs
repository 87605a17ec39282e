use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use ndarray::Array3;
use tracing::debug;

use super::{geometry_metadata, ImageGeometry, ImageVolume, LoadedImage, VolumeLoader};
use crate::core::error::LoadError;

/// MetaImage backend for `.mha` (header + data in one file) and `.mhd`
/// (header referencing a sibling raw file).
#[derive(Debug, Clone, Copy)]
pub struct MetaImageLoader;

#[derive(Debug)]
struct MetaHeader {
    dim_size: [usize; 3],
    spacing: [f32; 3],
    offset: [f32; 3],
    transform: [f32; 9],
    element_type: ElementType,
    compressed: bool,
    big_endian: bool,
    data_file: DataFile,
    header_end: usize,
    extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementType {
    UChar,
    Short,
    UShort,
    Int,
    Float,
    Double,
}

impl ElementType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "MET_UCHAR" => Some(Self::UChar),
            "MET_SHORT" => Some(Self::Short),
            "MET_USHORT" => Some(Self::UShort),
            "MET_INT" => Some(Self::Int),
            "MET_FLOAT" => Some(Self::Float),
            "MET_DOUBLE" => Some(Self::Double),
            _ => None,
        }
    }

    const fn byte_width(self) -> usize {
        match self {
            Self::UChar => 1,
            Self::Short | Self::UShort => 2,
            Self::Int | Self::Float => 4,
            Self::Double => 8,
        }
    }
}

#[derive(Debug)]
enum DataFile {
    Local,
    External(String),
}

impl MetaImageLoader {
    fn backend_error(&self, path: &Path, message: impl ToString) -> LoadError {
        LoadError::Backend {
            backend: self.name(),
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

impl VolumeLoader for MetaImageLoader {
    fn name(&self) -> &'static str {
        "metaimage"
    }

    fn can_load(&self, path: &Path) -> bool {
        matches!(
            path.extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .as_deref(),
            Some("mha" | "mhd")
        )
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn load(&self, path: &Path) -> Result<LoadedImage, LoadError> {
        debug!("Loading MetaImage file from {path:?}");
        let bytes = std::fs::read(path).map_err(|error| self.backend_error(path, error))?;
        let header = parse_header(&bytes).map_err(|message| self.backend_error(path, message))?;

        let raw = match &header.data_file {
            DataFile::Local => bytes[header.header_end..].to_vec(),
            DataFile::External(name) => {
                let sibling: PathBuf = path
                    .parent()
                    .map_or_else(|| PathBuf::from(name), |parent| parent.join(name));
                std::fs::read(&sibling).map_err(|error| self.backend_error(path, error))?
            }
        };

        let raw = if header.compressed {
            let mut decoder = ZlibDecoder::new(raw.as_slice());
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|error| self.backend_error(path, error))?;
            decompressed
        } else {
            raw
        };

        let voxel_count = header.dim_size.iter().product::<usize>();
        let expected = voxel_count * header.element_type.byte_width();
        if raw.len() < expected {
            return Err(self.backend_error(
                path,
                format!("data section has {} bytes, expected {expected}", raw.len()),
            ));
        }

        let values = decode_elements(&raw[..expected], header.element_type, header.big_endian);
        // MetaImage stores x fastest; build (z, y, x) and reorder to (x, y, z).
        let [nx, ny, nz] = header.dim_size;
        let data = Array3::from_shape_vec((nz, ny, nx), values)
            .map_err(|error| self.backend_error(path, error))?
            .permuted_axes([2, 1, 0])
            .as_standard_layout()
            .into_owned();

        let geometry = ImageGeometry {
            spacing: header.spacing,
            origin: header.offset,
            direction: header.transform,
        };
        let mut metadata = geometry_metadata(&geometry, header.dim_size);
        metadata.extend(header.extra);

        Ok(LoadedImage {
            volume: Some(ImageVolume { data, geometry }),
            metadata,
            format: super::file_format(path),
            loaded_with: self.name(),
        })
    }
}

/// Parses the `key = value` header lines up to and including
/// `ElementDataFile`, returning the header and the offset where pixel
/// data begins.
fn parse_header(bytes: &[u8]) -> Result<MetaHeader, String> {
    let mut header = MetaHeader {
        dim_size: [0; 3],
        spacing: [1.0; 3],
        offset: [0.0; 3],
        transform: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        element_type: ElementType::Float,
        compressed: false,
        big_endian: false,
        data_file: DataFile::Local,
        header_end: 0,
        extra: BTreeMap::new(),
    };

    let mut cursor = 0usize;
    loop {
        let rest = &bytes[cursor..];
        let line_end = rest
            .iter()
            .position(|&byte| byte == b'\n')
            .ok_or_else(|| "header ended before ElementDataFile".to_string())?;
        let line = std::str::from_utf8(&rest[..line_end])
            .map_err(|_| "header is not valid UTF-8".to_string())?
            .trim_end_matches('\r');
        cursor += line_end + 1;

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        match key {
            "NDims" => {
                if value != "3" {
                    return Err(format!("only 3-dimensional images are supported, got NDims = {value}"));
                }
            }
            "DimSize" => header.dim_size = parse_triple(value)?,
            "ElementSpacing" => header.spacing = parse_triple(value)?,
            "Offset" | "Position" => header.offset = parse_triple(value)?,
            "TransformMatrix" => {
                let numbers: Vec<f32> = value
                    .split_whitespace()
                    .map(str::parse)
                    .collect::<Result<_, _>>()
                    .map_err(|_| format!("invalid TransformMatrix: {value}"))?;
                if numbers.len() == 9 {
                    header.transform.copy_from_slice(&numbers);
                }
            }
            "ElementType" => {
                header.element_type = ElementType::parse(value)
                    .ok_or_else(|| format!("unsupported ElementType: {value}"))?;
            }
            "CompressedData" => header.compressed = value.eq_ignore_ascii_case("true"),
            "BinaryDataByteOrderMSB" | "ElementByteOrderMSB" => {
                header.big_endian = value.eq_ignore_ascii_case("true");
            }
            "ElementDataFile" => {
                header.data_file = if value.eq_ignore_ascii_case("local") {
                    DataFile::Local
                } else {
                    DataFile::External(value.to_string())
                };
                header.header_end = cursor;
                break;
            }
            _ => {
                header.extra.insert(key.to_string(), value.to_string());
            }
        }
    }

    if header.dim_size.contains(&0) {
        return Err("missing or zero DimSize".to_string());
    }
    Ok(header)
}

fn parse_triple<T: std::str::FromStr + Copy>(value: &str) -> Result<[T; 3], String> {
    let parts: Vec<T> = value
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| format!("expected three numbers, got '{value}'"))?;
    if parts.len() == 3 {
        Ok([parts[0], parts[1], parts[2]])
    } else {
        Err(format!("expected three numbers, got '{value}'"))
    }
}

#[allow(clippy::cast_lossless)]
fn decode_elements(raw: &[u8], element_type: ElementType, big_endian: bool) -> Vec<f32> {
    let width = element_type.byte_width();
    raw.chunks_exact(width)
        .map(|chunk| match element_type {
            ElementType::UChar => chunk[0] as f32,
            ElementType::Short => {
                let bytes = [chunk[0], chunk[1]];
                (if big_endian {
                    i16::from_be_bytes(bytes)
                } else {
                    i16::from_le_bytes(bytes)
                }) as f32
            }
            ElementType::UShort => {
                let bytes = [chunk[0], chunk[1]];
                (if big_endian {
                    u16::from_be_bytes(bytes)
                } else {
                    u16::from_le_bytes(bytes)
                }) as f32
            }
            ElementType::Int => {
                let bytes = [chunk[0], chunk[1], chunk[2], chunk[3]];
                (if big_endian {
                    i32::from_be_bytes(bytes)
                } else {
                    i32::from_le_bytes(bytes)
                }) as f32
            }
            ElementType::Float => {
                let bytes = [chunk[0], chunk[1], chunk[2], chunk[3]];
                if big_endian {
                    f32::from_be_bytes(bytes)
                } else {
                    f32::from_le_bytes(bytes)
                }
            }
            ElementType::Double => {
                let bytes = [
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
                ];
                #[allow(clippy::cast_possible_truncation)]
                {
                    (if big_endian {
                        f64::from_be_bytes(bytes)
                    } else {
                        f64::from_le_bytes(bytes)
                    }) as f32
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::write_phantom_mha;

    fn scratch_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("prostalyzer_meta_tests");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn reads_uncompressed_local_data() {
        let path = scratch_file("plain.mha");
        write_phantom_mha(&path, false);

        let image = MetaImageLoader.load(&path).unwrap();
        let volume = image.volume.unwrap();

        assert_eq!(volume.shape(), [2, 2, 2]);
        assert_eq!(volume.geometry.spacing, [0.5, 0.5, 3.0]);
        assert_eq!(volume.geometry.origin, [1.0, 2.0, 3.0]);
        // File order is x-fastest: value at (x=1, y=0, z=0) is 1.0.
        assert!((volume.data[[1, 0, 0]] - 1.0).abs() < f32::EPSILON);
        assert!((volume.data[[0, 1, 0]] - 2.0).abs() < f32::EPSILON);
        assert!((volume.data[[0, 0, 1]] - 4.0).abs() < f32::EPSILON);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn reads_zlib_compressed_data() {
        let path = scratch_file("compressed.mha");
        write_phantom_mha(&path, true);

        let image = MetaImageLoader.load(&path).unwrap();
        let volume = image.volume.unwrap();

        assert_eq!(volume.shape(), [2, 2, 2]);
        assert!((volume.data[[1, 1, 1]] - 7.0).abs() < f32::EPSILON);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_truncated_data_section() {
        let path = scratch_file("truncated.mha");
        let contents = b"NDims = 3\nDimSize = 4 4 4\nElementType = MET_FLOAT\nElementDataFile = LOCAL\nxx";
        std::fs::write(&path, contents).unwrap();

        let result = MetaImageLoader.load(&path);

        assert!(matches!(result, Err(LoadError::Backend { .. })));
        std::fs::remove_file(&path).unwrap();
    }
}
