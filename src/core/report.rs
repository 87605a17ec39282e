pub mod html;
pub mod pdf;
pub mod text;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::case::Case;
use super::config::AppConfig;
use super::error::PersistenceError;
use super::postproc::{Lesion, Severity};

/// A slice image exported for inclusion in a report, with a caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportImage {
    pub path: PathBuf,
    pub description: String,
}

/// Everything a report renderer needs, assembled once from the case
/// and its prediction results. The three output formats are rendered
/// independently from this same snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportData {
    pub case_id: String,
    pub case_name: String,
    pub patient_id: String,
    pub patient_name: String,
    pub patient_birth_date: String,
    pub patient_age: String,
    pub study_date: String,
    pub institution: String,
    pub physician: String,
    pub sequences: Vec<String>,
    pub lesions: Vec<Lesion>,
    pub has_significant_lesion: bool,
    pub total_lesion_volume: f32,
    pub prediction_date: Option<String>,
    pub conclusion: String,
    pub recommendations: Vec<String>,
    pub images: Vec<ReportImage>,
    pub generated: DateTime<Local>,
}

/// Supported report output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumIter)]
pub enum ReportFormat {
    #[strum(serialize = "PDF")]
    Pdf,
    #[strum(serialize = "HTML")]
    Html,
    #[strum(serialize = "Text")]
    Text,
}

impl ReportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Html => "html",
            Self::Text => "txt",
        }
    }
}

impl ReportData {
    /// Builds the snapshot from a case, pulling patient and study
    /// fields out of the case metadata (with the first file's raw
    /// metadata as fallback) and institution/physician defaults from
    /// the configuration.
    #[must_use]
    #[tracing::instrument(level = "debug", skip(case, config))]
    pub fn from_case(case: &Case, config: &AppConfig) -> Self {
        let lookup = |case_key: &str, file_key: &str| -> String {
            case.metadata
                .get(case_key)
                .cloned()
                .or_else(|| {
                    case.files
                        .first()
                        .and_then(|file| file.metadata.get(file_key).cloned())
                })
                .unwrap_or_else(|| "N/A".to_string())
        };

        let sequences = case
            .files
            .iter()
            .map(|file| file.sequence_type.to_string())
            .unique()
            .collect();

        let (lesions, has_significant_lesion, total_lesion_volume, prediction_date) = case
            .prediction_results
            .as_ref()
            .map_or((Vec::new(), false, 0.0, None), |results| {
                (
                    results.lesions.clone(),
                    results.has_significant_lesion,
                    results.total_lesion_volume,
                    Some(
                        results
                            .prediction_date
                            .with_timezone(&Local)
                            .format("%Y-%m-%d %H:%M:%S")
                            .to_string(),
                    ),
                )
            });

        let conclusion = default_conclusion(&lesions, has_significant_lesion, prediction_date.is_some());
        let recommendations = default_recommendations(&lesions, has_significant_lesion);

        Self {
            case_id: case.id.clone(),
            case_name: case.name.clone(),
            patient_id: lookup("patient_id", "PatientID"),
            patient_name: lookup("patient_name", "PatientName"),
            patient_birth_date: lookup("patient_birth_date", "PatientBirthDate"),
            patient_age: lookup("patient_age", "PatientAge"),
            study_date: lookup("study_date", "StudyDate"),
            institution: config
                .report
                .institution
                .clone()
                .unwrap_or_else(|| lookup("institution", "InstitutionName")),
            physician: config
                .report
                .physician
                .clone()
                .unwrap_or_else(|| "N/A".to_string()),
            sequences,
            lesions,
            has_significant_lesion,
            total_lesion_volume,
            prediction_date,
            conclusion,
            recommendations,
            images: Vec::new(),
            generated: Local::now(),
        }
    }
}

fn default_conclusion(lesions: &[Lesion], has_significant: bool, has_prediction: bool) -> String {
    if !has_prediction {
        return "No automated analysis has been run for this study.".to_string();
    }
    if lesions.is_empty() {
        return "No suspicious lesions were detected by the automated analysis.".to_string();
    }
    if has_significant {
        format!(
            "The automated analysis detected {} suspicious lesion(s), at least one with high severity. Priority radiological review is indicated.",
            lesions.len()
        )
    } else {
        format!(
            "The automated analysis detected {} lesion(s) of low or moderate severity. Correlation with clinical findings is recommended.",
            lesions.len()
        )
    }
}

fn default_recommendations(lesions: &[Lesion], has_significant: bool) -> Vec<String> {
    let mut recommendations = vec![
        "Findings are generated by an automated system and require review by a qualified radiologist.".to_string(),
    ];
    if has_significant {
        recommendations.push("Consider targeted biopsy of high-severity lesions.".to_string());
        recommendations.push("Discuss findings in a multidisciplinary meeting.".to_string());
    } else if !lesions.is_empty() {
        recommendations.push("Consider follow-up imaging to monitor lesion evolution.".to_string());
    }
    recommendations
}

/// Renders the report in the requested format into `output_dir`,
/// creating the directory when needed. Returns the written file path.
///
/// # Errors
///
/// Returns a [`PersistenceError`] when the directory or file cannot be
/// written or rendering fails.
#[tracing::instrument(level = "info", skip(data))]
pub fn write_report(
    data: &ReportData,
    format: ReportFormat,
    output_dir: &Path,
) -> Result<PathBuf, PersistenceError> {
    std::fs::create_dir_all(output_dir)?;
    let file_name = format!(
        "report_{}_{}.{}",
        data.case_id,
        data.generated.format("%Y%m%d_%H%M%S"),
        format.extension()
    );
    let path = output_dir.join(file_name);

    match format {
        ReportFormat::Pdf => pdf::render(data, &path)?,
        ReportFormat::Html => std::fs::write(&path, html::render(data))?,
        ReportFormat::Text => std::fs::write(&path, text::render(data))?,
    }

    info!("Wrote {format} report to {path:?}");
    Ok(path)
}

/// Formats severity for report tables.
#[must_use]
pub fn severity_label(severity: Severity) -> String {
    severity.to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::core::postproc::PredictionResults;

    pub fn sample_lesions() -> Vec<Lesion> {
        vec![
            Lesion {
                id: 1,
                volume_mm3: 620.5,
                max_diameter_mm: 14.2,
                centroid: [12.0, -4.5, 30.0],
                probability: 0.82,
                severity: Severity::High,
            },
            Lesion {
                id: 2,
                volume_mm3: 110.0,
                max_diameter_mm: 6.1,
                centroid: [-8.0, 10.0, 12.5],
                probability: 0.64,
                severity: Severity::Moderate,
            },
        ]
    }

    pub fn sample_case(with_results: bool) -> Case {
        let mut metadata = BTreeMap::new();
        metadata.insert("patient_id".to_string(), "P-0042".to_string());
        metadata.insert("study_date".to_string(), "2024-11-03".to_string());
        let lesions = sample_lesions();
        let total = lesions.iter().map(|lesion| lesion.volume_mm3).sum();
        Case {
            id: "case_test".to_string(),
            name: "Case demo".to_string(),
            files: Vec::new(),
            metadata,
            created_date: Utc::now(),
            modified_date: Utc::now(),
            has_changes: false,
            prediction_results: with_results.then(|| PredictionResults {
                segmentation: None,
                num_lesions: lesions.len(),
                has_significant_lesion: true,
                total_lesion_volume: total,
                lesions,
                prediction_date: Utc::now(),
            }),
        }
    }

    #[test]
    fn snapshot_pulls_case_metadata_and_results() {
        let data = ReportData::from_case(&sample_case(true), &AppConfig::default());

        assert_eq!(data.patient_id, "P-0042");
        assert_eq!(data.study_date, "2024-11-03");
        assert_eq!(data.lesions.len(), 2);
        assert!(data.has_significant_lesion);
        assert!(data.conclusion.contains("high severity"));
        assert!(data.prediction_date.is_some());
    }

    #[test]
    fn snapshot_without_results_reports_no_analysis() {
        let data = ReportData::from_case(&sample_case(false), &AppConfig::default());

        assert!(data.lesions.is_empty());
        assert!(data.conclusion.contains("No automated analysis"));
        assert!(data.prediction_date.is_none());
    }

    #[test]
    fn config_institution_overrides_metadata() {
        let mut config = AppConfig::default();
        config.report.institution = Some("Example Hospital".to_string());
        config.report.physician = Some("Dr. Example".to_string());

        let data = ReportData::from_case(&sample_case(true), &config);

        assert_eq!(data.institution, "Example Hospital");
        assert_eq!(data.physician, "Dr. Example");
    }

    #[test]
    fn all_formats_write_a_file() {
        let dir = std::env::temp_dir().join("prostalyzer_report_tests");
        let data = ReportData::from_case(&sample_case(true), &AppConfig::default());

        let mut written = Vec::new();
        for format in [ReportFormat::Pdf, ReportFormat::Html, ReportFormat::Text] {
            let path = write_report(&data, format, &dir).unwrap();
            let metadata = std::fs::metadata(&path).unwrap();
            assert!(metadata.len() > 0, "{format} report must not be empty");
            written.push(path);
        }
        crate::tests::clean_files(&written).unwrap();
    }
}
