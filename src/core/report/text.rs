use std::fmt::Write;

use super::ReportData;

const RULE: &str = "================================================================";
const THIN_RULE: &str = "----------------------------------------------------------------";

/// Renders the report as fixed-width plain text.
#[must_use]
#[allow(clippy::format_push_string)]
pub fn render(data: &ReportData) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "                PROSTATE ANALYSIS REPORT");
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out);

    let _ = writeln!(out, "PATIENT INFORMATION");
    let _ = writeln!(out, "{THIN_RULE}");
    let _ = writeln!(out, "ID:            {}", data.patient_id);
    let _ = writeln!(out, "Name:          {}", data.patient_name);
    let _ = writeln!(out, "Date of birth: {}", data.patient_birth_date);
    let _ = writeln!(out, "Age:           {}", data.patient_age);
    let _ = writeln!(out);

    let _ = writeln!(out, "STUDY INFORMATION");
    let _ = writeln!(out, "{THIN_RULE}");
    let _ = writeln!(out, "Date:          {}", data.study_date);
    let _ = writeln!(out, "Institution:   {}", data.institution);
    let _ = writeln!(out, "Physician:     {}", data.physician);
    let _ = writeln!(out, "Sequences:     {}", data.sequences.join(", "));
    if let Some(prediction_date) = &data.prediction_date {
        let _ = writeln!(out, "Analysis date: {prediction_date}");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "FINDINGS");
    let _ = writeln!(out, "{THIN_RULE}");
    if data.lesions.is_empty() {
        if data.prediction_date.is_some() {
            let _ = writeln!(out, "No suspicious lesions were detected.");
        } else {
            let _ = writeln!(out, "No automated analysis is available for this study.");
        }
    } else {
        let _ = writeln!(
            out,
            "{} suspicious lesion(s) detected. Total volume: {:.2} mm3.",
            data.lesions.len(),
            data.total_lesion_volume
        );
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:>3}  {:>14}  {:>14}  {:>11}  {:<8}",
            "#", "Volume (mm3)", "Diameter (mm)", "Probability", "Severity"
        );
        for (index, lesion) in data.lesions.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>3}  {:>14.2}  {:>14.2}  {:>11.2}  {:<8}",
                index + 1,
                lesion.volume_mm3,
                lesion.max_diameter_mm,
                lesion.probability,
                lesion.severity.to_string()
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "CONCLUSIONS");
    let _ = writeln!(out, "{THIN_RULE}");
    let _ = writeln!(out, "{}", data.conclusion);
    let _ = writeln!(out);

    let _ = writeln!(out, "RECOMMENDATIONS");
    let _ = writeln!(out, "{THIN_RULE}");
    for recommendation in &data.recommendations {
        let _ = writeln!(out, "* {recommendation}");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(
        out,
        "Generated automatically on {}. This report does not replace",
        data.generated.format("%d/%m/%Y %H:%M")
    );
    let _ = writeln!(out, "evaluation by a specialist.");
    let _ = writeln!(out, "{RULE}");

    out
}

#[cfg(test)]
mod tests {
    use crate::core::config::AppConfig;
    use crate::core::report::tests::sample_case;
    use crate::core::report::ReportData;

    use super::*;

    #[test]
    fn sections_and_lesions_are_present() {
        let data = ReportData::from_case(&sample_case(true), &AppConfig::default());
        let report = render(&data);

        assert!(report.contains("PATIENT INFORMATION"));
        assert!(report.contains("STUDY INFORMATION"));
        assert!(report.contains("FINDINGS"));
        assert!(report.contains("CONCLUSIONS"));
        assert!(report.contains("RECOMMENDATIONS"));
        assert!(report.contains("620.50"));
        assert!(report.contains("Alta"));
    }

    #[test]
    fn empty_case_reports_missing_analysis() {
        let data = ReportData::from_case(&sample_case(false), &AppConfig::default());
        let report = render(&data);
        assert!(report.contains("No automated analysis"));
    }
}
