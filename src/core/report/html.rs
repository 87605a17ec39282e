use super::ReportData;

/// Static page template. Rendering is plain token substitution; the
/// dynamic table bodies are built as HTML fragments and substituted
/// like any other token.
const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Prostate Analysis Report - {{case_name}}</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 20px; }
        h1 { color: #004080; }
        h2 { color: #004080; margin-top: 20px; border-bottom: 1px solid #ccc; padding-bottom: 5px; }
        table { border-collapse: collapse; width: 100%; }
        th, td { padding: 8px; text-align: left; border-bottom: 1px solid #ddd; }
        th { background-color: #f2f2f2; color: #004080; }
        .note { color: #888; font-size: 0.8em; font-style: italic; }
        .img-container { margin: 20px 0; text-align: center; }
    </style>
</head>
<body>
    <h1>Prostate Analysis Report</h1>

    <h2>Patient Information</h2>
    <table>
        <tr><th>ID:</th><td>{{patient_id}}</td></tr>
        <tr><th>Name:</th><td>{{patient_name}}</td></tr>
        <tr><th>Date of Birth:</th><td>{{patient_dob}}</td></tr>
        <tr><th>Age:</th><td>{{patient_age}}</td></tr>
    </table>

    <h2>Study Information</h2>
    <table>
        <tr><th>Date:</th><td>{{study_date}}</td></tr>
        <tr><th>Institution:</th><td>{{institution}}</td></tr>
        <tr><th>Physician:</th><td>{{physician}}</td></tr>
        <tr><th>Sequences:</th><td>{{sequences}}</td></tr>
    </table>

    <h2>Findings</h2>
    {{findings}}

    {{images}}

    <h2>Conclusions</h2>
    <p>{{conclusion}}</p>

    <h2>Recommendations</h2>
    <ul>
{{recommendations}}
    </ul>

    <p class="note">This report was generated automatically and does not replace evaluation by a specialist. Generated: {{generation_date}}</p>
</body>
</html>
"#;

/// Renders the report as a standalone HTML page.
#[must_use]
pub fn render(data: &ReportData) -> String {
    TEMPLATE
        .replace("{{case_name}}", &escape(&data.case_name))
        .replace("{{patient_id}}", &escape(&data.patient_id))
        .replace("{{patient_name}}", &escape(&data.patient_name))
        .replace("{{patient_dob}}", &escape(&data.patient_birth_date))
        .replace("{{patient_age}}", &escape(&data.patient_age))
        .replace("{{study_date}}", &escape(&data.study_date))
        .replace("{{institution}}", &escape(&data.institution))
        .replace("{{physician}}", &escape(&data.physician))
        .replace("{{sequences}}", &escape(&data.sequences.join(", ")))
        .replace("{{findings}}", &findings_fragment(data))
        .replace("{{images}}", &images_fragment(data))
        .replace("{{conclusion}}", &escape(&data.conclusion))
        .replace("{{recommendations}}", &recommendations_fragment(data))
        .replace(
            "{{generation_date}}",
            &data.generated.format("%d/%m/%Y %H:%M").to_string(),
        )
}

fn findings_fragment(data: &ReportData) -> String {
    if data.lesions.is_empty() {
        let message = data.prediction_date.as_ref().map_or(
            "No automated analysis is available for this study.",
            |_| "No suspicious lesions were detected.",
        );
        return format!("    <p>{message}</p>");
    }

    let mut fragment = String::from(
        "    <p>",
    );
    fragment.push_str(&format!(
        "{} suspicious lesion(s) detected. Total lesion volume: {:.2} mm&sup3;.</p>\n",
        data.lesions.len(),
        data.total_lesion_volume
    ));
    fragment.push_str(
        "    <table>\n        <tr><th>#</th><th>Volume (mm&sup3;)</th><th>Max diameter (mm)</th><th>Probability</th><th>Severity</th></tr>\n",
    );
    for (index, lesion) in data.lesions.iter().enumerate() {
        fragment.push_str(&format!(
            "        <tr><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{}</td></tr>\n",
            index + 1,
            lesion.volume_mm3,
            lesion.max_diameter_mm,
            lesion.probability,
            lesion.severity
        ));
    }
    fragment.push_str("    </table>");
    fragment
}

fn images_fragment(data: &ReportData) -> String {
    if data.images.is_empty() {
        return String::new();
    }
    let mut fragment = String::from("<h2>Images</h2>\n");
    for image in &data.images {
        fragment.push_str(&format!(
            "    <div class=\"img-container\"><img src=\"{}\" alt=\"{}\" width=\"500\"><p>{}</p></div>\n",
            image.path.display(),
            escape(&image.description),
            escape(&image.description)
        ));
    }
    fragment
}

fn recommendations_fragment(data: &ReportData) -> String {
    data.recommendations
        .iter()
        .map(|recommendation| format!("        <li>{}</li>", escape(recommendation)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use crate::core::config::AppConfig;
    use crate::core::report::tests::sample_case;
    use crate::core::report::ReportData;

    use super::*;

    #[test]
    fn all_tokens_are_substituted() {
        let data = ReportData::from_case(&sample_case(true), &AppConfig::default());
        let html = render(&data);
        assert!(!html.contains("{{"), "unsubstituted token in: {html}");
        assert!(html.contains("P-0042"));
        assert!(html.contains("2024-11-03"));
    }

    #[test]
    fn findings_table_has_one_row_per_lesion() {
        let data = ReportData::from_case(&sample_case(true), &AppConfig::default());
        let html = render(&data);
        assert_eq!(html.matches("<tr><td>").count(), data.lesions.len());
        assert!(html.contains("Alta"));
        assert!(html.contains("Media"));
    }

    #[test]
    fn metadata_values_are_escaped() {
        let mut case = sample_case(false);
        case.metadata
            .insert("patient_id".to_string(), "<script>".to_string());
        let data = ReportData::from_case(&case, &AppConfig::default());
        let html = render(&data);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }
}
