use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{LoadError, PersistenceError};
use super::image::{load_medical_image, ImageVolume};
use super::postproc::PredictionResults;

/// MRI sequence types recognized as model inputs or display channels.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "lowercase")]
pub enum SequenceType {
    #[strum(serialize = "T2W")]
    T2w,
    #[strum(serialize = "ADC")]
    Adc,
    #[strum(serialize = "DWI")]
    Dwi,
    #[strum(serialize = "COR")]
    Cor,
    #[strum(serialize = "SAG")]
    Sag,
    #[default]
    #[strum(serialize = "Unknown")]
    Unknown,
}

impl SequenceType {
    /// Infers the sequence type from filename substrings. This is a
    /// heuristic over naming conventions, not a check of image content.
    #[must_use]
    pub fn from_file_name(file_name: &str) -> Self {
        let name = file_name.to_lowercase();
        if name.contains("t2w") || name.contains("t2") {
            Self::T2w
        } else if name.contains("adc") {
            Self::Adc
        } else if name.contains("dwi") || name.contains("hbv") {
            Self::Dwi
        } else if name.contains("cor") {
            Self::Cor
        } else if name.contains("sag") {
            Self::Sag
        } else {
            Self::Unknown
        }
    }
}

/// One image file within a case. The voxel data is transient: it is
/// never serialized and is gone after a JSON round trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub format: String,
    pub loaded_with: String,
    #[serde(skip)]
    pub volume: Option<ImageVolume>,
    pub metadata: BTreeMap<String, String>,
    pub sequence_type: SequenceType,
}

/// An in-memory study: the files it was assembled from, extracted
/// metadata, and the latest prediction results, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Case {
    pub id: String,
    pub name: String,
    pub files: Vec<FileRecord>,
    pub metadata: BTreeMap<String, String>,
    pub created_date: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
    pub has_changes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_results: Option<PredictionResults>,
}

impl Case {
    /// Returns the first file of the given sequence type.
    #[must_use]
    pub fn file_by_sequence(&self, sequence_type: SequenceType) -> Option<&FileRecord> {
        self.files
            .iter()
            .find(|file| file.sequence_type == sequence_type)
    }

    fn touch(&mut self) {
        self.modified_date = Utc::now();
        self.has_changes = true;
    }
}

/// Owns the ordered list of open cases and the single current-case
/// index. All mutation goes through here; the prediction worker never
/// touches this structure directly.
#[derive(Debug, Default)]
pub struct CaseManager {
    cases: Vec<Case>,
    current: Option<usize>,
}

impl CaseManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn case_count(&self) -> usize {
        self.cases.len()
    }

    #[must_use]
    pub fn has_open_cases(&self) -> bool {
        !self.cases.is_empty()
    }

    #[must_use]
    pub fn cases(&self) -> &[Case] {
        &self.cases
    }

    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    #[must_use]
    pub fn current_case(&self) -> Option<&Case> {
        self.current.and_then(|index| self.cases.get(index))
    }

    #[must_use]
    pub fn current_case_mut(&mut self) -> Option<&mut Case> {
        self.current.and_then(|index| self.cases.get_mut(index))
    }

    /// Makes the case at `index` current.
    pub fn select(&mut self, index: usize) {
        if index < self.cases.len() {
            self.current = Some(index);
        }
    }

    /// Assembles a new case from a list of image files and makes it
    /// current. Files that fail to load are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::EmptyFileList`] when no paths are given and
    /// [`LoadError::NoFilesParsed`] when every file fails to load.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn load_case(&mut self, file_paths: &[PathBuf]) -> Result<&Case, LoadError> {
        if file_paths.is_empty() {
            return Err(LoadError::EmptyFileList);
        }

        let now = Utc::now();
        let mut case = Case {
            id: format!("case_{}", now.format("%Y%m%d_%H%M%S%3f")),
            name: generate_case_name(file_paths),
            files: Vec::new(),
            metadata: BTreeMap::new(),
            created_date: now,
            modified_date: now,
            has_changes: false,
            prediction_results: None,
        };

        for path in file_paths {
            match process_file(path) {
                Ok(file) => case.files.push(file),
                Err(error) => {
                    warn!("Skipping {path:?}: {error}");
                }
            }
        }

        if case.files.is_empty() {
            return Err(LoadError::NoFilesParsed);
        }

        extract_case_metadata(&mut case);

        info!("Loaded case {} with {} file(s)", case.id, case.files.len());
        self.cases.push(case);
        self.current = Some(self.cases.len() - 1);
        Ok(&self.cases[self.cases.len() - 1])
    }

    /// Closes the current case. A remaining case becomes current, the
    /// index clamped to the new list length; closing the last case
    /// leaves no current case.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn close_current_case(&mut self) {
        let Some(index) = self.current else {
            return;
        };
        self.cases.remove(index);
        self.current = if self.cases.is_empty() {
            None
        } else {
            Some(index.min(self.cases.len() - 1))
        };
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn close_all_cases(&mut self) {
        self.cases.clear();
        self.current = None;
    }

    /// Adds one file to the current case.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::NoCurrentCase`] without a current case, or
    /// the underlying load error when the file cannot be processed.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn add_file_to_current_case(&mut self, path: &Path) -> Result<(), LoadError> {
        if self.current_case().is_none() {
            return Err(LoadError::NoCurrentCase);
        }
        let file = process_file(path)?;
        let case = self
            .current_case_mut()
            .ok_or(LoadError::NoCurrentCase)?;
        case.files.push(file);
        case.touch();
        Ok(())
    }

    /// Removes a file (by index) from the current case. Returns false
    /// when there is no current case or the index is out of range.
    pub fn remove_file_from_current_case(&mut self, file_index: usize) -> bool {
        let Some(case) = self.current_case_mut() else {
            return false;
        };
        if file_index >= case.files.len() {
            return false;
        }
        case.files.remove(file_index);
        case.touch();
        true
    }

    /// Merges the given entries into the current case's metadata.
    pub fn update_current_case_metadata(&mut self, metadata: &BTreeMap<String, String>) -> bool {
        let Some(case) = self.current_case_mut() else {
            return false;
        };
        case.metadata
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        case.touch();
        true
    }

    /// Attaches prediction results to the current case, replacing any
    /// previous run.
    pub fn set_current_case_prediction_results(&mut self, results: PredictionResults) -> bool {
        let Some(case) = self.current_case_mut() else {
            return false;
        };
        case.prediction_results = Some(results);
        case.touch();
        true
    }

    /// Attaches prediction results to the case with the given id. Used
    /// by the scheduler, since the user may have switched cases while
    /// the worker was running.
    pub fn set_prediction_results_by_id(&mut self, case_id: &str, results: PredictionResults) -> bool {
        let Some(case) = self.cases.iter_mut().find(|case| case.id == case_id) else {
            return false;
        };
        case.prediction_results = Some(results);
        case.touch();
        true
    }

    #[must_use]
    pub fn current_case_prediction_results(&self) -> Option<&PredictionResults> {
        self.current_case()
            .and_then(|case| case.prediction_results.as_ref())
    }

    /// File paths of the current case filtered by sequence type, in
    /// display order.
    #[must_use]
    pub fn file_paths_by_sequence(&self, sequence_type: SequenceType) -> Vec<PathBuf> {
        self.current_case().map_or_else(Vec::new, |case| {
            case.files
                .iter()
                .filter(|file| file.sequence_type == sequence_type)
                .map(|file| file.path.clone())
                .collect()
        })
    }

    /// Saves the current case as JSON. Voxel arrays are not serialized
    /// and are permanently lost; everything else round-trips.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] when there is no current case or
    /// the file cannot be written.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn save_current_case(&mut self, file_path: Option<&Path>) -> Result<PathBuf, PersistenceError> {
        let default_dir = default_case_dir();
        let case = self.current_case_mut().ok_or_else(|| {
            PersistenceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no case is currently open",
            ))
        })?;
        case.modified_date = Utc::now();

        let path = file_path.map_or_else(
            || default_dir.join(format!("{}.json", case.id)),
            Path::to_path_buf,
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, case)?;

        case.has_changes = false;
        info!("Saved case {} to {path:?}", case.id);
        Ok(path)
    }

    /// Loads a case from a JSON file and makes it current. Voxel data
    /// is absent after a reload; files must be re-read from their
    /// original paths if display is needed.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] when the file cannot be read or
    /// does not contain a valid case.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn load_case_from_file(&mut self, file_path: &Path) -> Result<&Case, PersistenceError> {
        let contents = std::fs::read_to_string(file_path)?;
        let case: Case =
            serde_json::from_str(&contents).map_err(|error| PersistenceError::InvalidCaseFile {
                path: file_path.to_path_buf(),
                message: error.to_string(),
            })?;
        debug!("Loaded case {} from {file_path:?}", case.id);
        self.cases.push(case);
        self.current = Some(self.cases.len() - 1);
        Ok(&self.cases[self.cases.len() - 1])
    }

    #[must_use]
    pub fn current_case_has_changes(&self) -> bool {
        self.current_case().is_some_and(|case| case.has_changes)
    }
}

/// Default directory for persisted cases.
#[must_use]
pub fn default_case_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("prostalyzer")
        .join("cases")
}

fn process_file(path: &Path) -> Result<FileRecord, LoadError> {
    let image = load_medical_image(path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(FileRecord {
        path: path.to_path_buf(),
        format: image.format,
        loaded_with: image.loaded_with.to_string(),
        volume: image.volume,
        metadata: image.metadata,
        sequence_type: SequenceType::from_file_name(&file_name),
    })
}

/// Derives the case name from the first file's parent directory,
/// falling back to the file stem.
fn generate_case_name(file_paths: &[PathBuf]) -> String {
    let Some(first) = file_paths.first() else {
        return "Unnamed case".into();
    };
    let dir_name = first
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty());
    dir_name.map_or_else(
        || {
            let stem = first
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default();
            format!("Case {stem}")
        },
        |dir| format!("Case {dir}"),
    )
}

/// Pulls common study metadata (patient id, study date) out of the
/// first file's key-value metadata. Keys vary by format, so matching is
/// case-insensitive and substring based.
fn extract_case_metadata(case: &mut Case) {
    let Some(first) = case.files.first() else {
        return;
    };

    let find = |needles: &[&str]| {
        first.metadata.iter().find_map(|(key, value)| {
            let key = key.to_lowercase().replace(' ', "");
            needles
                .iter()
                .any(|needle| key.contains(needle))
                .then(|| value.clone())
        })
    };

    if let Some(patient_id) = find(&["patientid"]) {
        case.metadata.insert("patient_id".into(), patient_id);
    }
    if let Some(study_date) = find(&["studydate"]) {
        case.metadata.insert("study_date".into(), study_date);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{setup_folder, write_phantom_mha};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("prostalyzer_case_tests").join(name);
        setup_folder(&dir).unwrap();
        dir
    }

    #[test]
    fn sequence_type_is_inferred_from_file_names() {
        assert_eq!(SequenceType::from_file_name("patient1_t2w.nii.gz"), SequenceType::T2w);
        assert_eq!(SequenceType::from_file_name("PATIENT1_ADC.nii"), SequenceType::Adc);
        assert_eq!(SequenceType::from_file_name("study_hbv.mha"), SequenceType::Dwi);
        assert_eq!(SequenceType::from_file_name("series_cor.dcm"), SequenceType::Cor);
        assert_eq!(SequenceType::from_file_name("series_sag.dcm"), SequenceType::Sag);
        assert_eq!(SequenceType::from_file_name("mystery.mha"), SequenceType::Unknown);
    }

    #[test]
    fn loading_empty_file_list_fails() {
        let mut manager = CaseManager::new();
        let result = manager.load_case(&[]);
        assert!(matches!(result, Err(LoadError::EmptyFileList)));
        assert!(!manager.has_open_cases());
    }

    #[test]
    fn loading_only_unreadable_files_fails() {
        let mut manager = CaseManager::new();
        let result = manager.load_case(&[
            PathBuf::from("missing_one_t2w.nii"),
            PathBuf::from("missing_two_adc.nii"),
        ]);
        assert!(matches!(result, Err(LoadError::NoFilesParsed)));
        assert!(!manager.has_open_cases());
    }

    #[test]
    fn loading_with_one_good_file_appends_exactly_one_case() {
        let dir = scratch_dir("one_good");
        let good = dir.join("lesion_t2w.mha");
        write_phantom_mha(&good, false);
        let mut manager = CaseManager::new();

        let case = manager
            .load_case(&[good.clone(), dir.join("nonexistent_adc.mha")])
            .unwrap();

        assert_eq!(case.files.len(), 1);
        assert_eq!(case.files[0].sequence_type, SequenceType::T2w);
        assert_eq!(manager.case_count(), 1);
        assert_eq!(manager.current_index(), Some(0));
    }

    #[test]
    fn closing_the_only_case_resets_the_current_index() {
        let dir = scratch_dir("close_only");
        let good = dir.join("scan_t2.mha");
        write_phantom_mha(&good, false);
        let mut manager = CaseManager::new();
        manager.load_case(&[good]).unwrap();

        manager.close_current_case();

        assert_eq!(manager.current_index(), None);
        assert!(!manager.has_open_cases());
    }

    #[test]
    fn closing_keeps_a_valid_current_index() {
        let dir = scratch_dir("close_many");
        let first = dir.join("first_t2.mha");
        let second = dir.join("second_adc.mha");
        write_phantom_mha(&first, false);
        write_phantom_mha(&second, false);
        let mut manager = CaseManager::new();
        manager.load_case(&[first]).unwrap();
        manager.load_case(&[second]).unwrap();
        assert_eq!(manager.current_index(), Some(1));

        manager.close_current_case();

        assert_eq!(manager.current_index(), Some(0));
        assert_eq!(manager.case_count(), 1);
    }

    #[test]
    fn add_and_remove_files_mark_the_case_changed() {
        let dir = scratch_dir("add_remove");
        let first = dir.join("base_t2w.mha");
        let extra = dir.join("extra_adc.mha");
        write_phantom_mha(&first, false);
        write_phantom_mha(&extra, false);
        let mut manager = CaseManager::new();
        manager.load_case(&[first]).unwrap();
        assert!(!manager.current_case_has_changes());

        manager.add_file_to_current_case(&extra).unwrap();
        assert_eq!(manager.current_case().unwrap().files.len(), 2);
        assert!(manager.current_case_has_changes());

        assert!(manager.remove_file_from_current_case(1));
        assert_eq!(manager.current_case().unwrap().files.len(), 1);
        assert!(!manager.remove_file_from_current_case(5));
    }

    #[test]
    fn adding_a_file_without_a_case_fails() {
        let mut manager = CaseManager::new();
        let result = manager.add_file_to_current_case(Path::new("whatever_t2w.nii"));
        assert!(matches!(result, Err(LoadError::NoCurrentCase)));
    }

    #[test]
    fn json_round_trip_preserves_everything_but_voxels() {
        let dir = scratch_dir("round_trip");
        let good = dir.join("roundtrip_t2w.mha");
        write_phantom_mha(&good, false);
        let mut manager = CaseManager::new();
        manager.load_case(&[good]).unwrap();
        let mut extra = BTreeMap::new();
        extra.insert("physician".to_string(), "Dr. Example".to_string());
        manager.update_current_case_metadata(&extra);

        let original = manager.current_case().unwrap().clone();
        assert!(original.files[0].volume.is_some());

        let saved = manager
            .save_current_case(Some(&dir.join("case.json")))
            .unwrap();
        let mut reloaded_manager = CaseManager::new();
        let reloaded = reloaded_manager.load_case_from_file(&saved).unwrap();

        assert_eq!(reloaded.id, original.id);
        assert_eq!(reloaded.name, original.name);
        assert_eq!(reloaded.metadata, original.metadata);
        assert_eq!(reloaded.files.len(), original.files.len());
        assert_eq!(reloaded.files[0].sequence_type, original.files[0].sequence_type);
        assert_eq!(reloaded.files[0].metadata, original.files[0].metadata);
        assert!(reloaded.files[0].volume.is_none());
    }

    #[test]
    fn loading_an_invalid_case_file_fails() {
        let dir = scratch_dir("invalid_json");
        let path = dir.join("broken.json");
        std::fs::write(&path, "{\"id\": \"case_x\"}").unwrap();
        let mut manager = CaseManager::new();

        let result = manager.load_case_from_file(&path);

        assert!(matches!(result, Err(PersistenceError::InvalidCaseFile { .. })));
        assert!(!manager.has_open_cases());
    }
}
