use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::{write::ZlibEncoder, Compression};

/// Creates a directory at the specified path.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn setup_folder<P>(path: P) -> Result<()>
where
    P: AsRef<Path> + std::fmt::Debug,
{
    std::fs::create_dir_all(&path).context("Failed to create test directory")?;
    Ok(())
}

/// Removes all files in the provided vector.
///
/// # Errors
///
/// Returns an error if any file cannot be removed.
pub fn clean_files(files: &Vec<PathBuf>) -> Result<()> {
    for file in files {
        if file.is_file() {
            std::fs::remove_file(file)
                .with_context(|| format!("Failed to remove test file: {}", file.display()))?;
        }
    }
    Ok(())
}

/// Writes a 2x2x2 float MetaImage volume with values 0..8 (x fastest),
/// spacing (0.5, 0.5, 3.0) and offset (1, 2, 3).
///
/// # Panics
///
/// Panics if the file cannot be written.
#[allow(clippy::cast_precision_loss)]
pub fn write_phantom_mha(path: &Path, compressed: bool) {
    let values: Vec<f32> = (0..8).map(|value| value as f32).collect();
    let mut raw = Vec::new();
    for value in &values {
        raw.extend_from_slice(&value.to_le_bytes());
    }
    let raw = if compressed {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        encoder.finish().unwrap()
    } else {
        raw
    };

    let mut contents = Vec::new();
    contents.extend_from_slice(b"ObjectType = Image\n");
    contents.extend_from_slice(b"NDims = 3\n");
    contents.extend_from_slice(b"DimSize = 2 2 2\n");
    contents.extend_from_slice(b"ElementSpacing = 0.5 0.5 3.0\n");
    contents.extend_from_slice(b"Offset = 1.0 2.0 3.0\n");
    contents.extend_from_slice(b"ElementType = MET_FLOAT\n");
    if compressed {
        contents.extend_from_slice(b"CompressedData = True\n");
    }
    contents.extend_from_slice(b"ElementDataFile = LOCAL\n");
    contents.extend_from_slice(&raw);
    std::fs::write(path, contents).unwrap();
}
