use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};

use super::ReportData;
use crate::core::error::PersistenceError;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;
const LINE_HEIGHT_MM: f32 = 7.0;

const TITLE_SIZE: f32 = 18.0;
const HEADING_SIZE: f32 = 13.0;
const BODY_SIZE: f32 = 10.0;
const NOTE_SIZE: f32 = 8.0;

/// A cursor over sequentially added pages, breaking to a new page when
/// the bottom margin is reached.
struct PageWriter {
    document: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    cursor_mm: f32,
}

impl PageWriter {
    fn new(title: &str) -> Result<Self, PersistenceError> {
        let (document, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
        let regular = document
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|error| PersistenceError::Report(error.to_string()))?;
        let bold = document
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|error| PersistenceError::Report(error.to_string()))?;
        let layer = document.get_page(page).get_layer(layer);
        Ok(Self {
            document,
            layer,
            regular,
            bold,
            cursor_mm: PAGE_HEIGHT_MM - MARGIN_MM,
        })
    }

    fn advance(&mut self, height_mm: f32) {
        if self.cursor_mm - height_mm < MARGIN_MM {
            let (page, layer) =
                self.document
                    .add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
            self.layer = self.document.get_page(page).get_layer(layer);
            self.cursor_mm = PAGE_HEIGHT_MM - MARGIN_MM;
        }
        self.cursor_mm -= height_mm;
    }

    fn text(&mut self, text: &str, size: f32, bold: bool, indent_mm: f32) {
        self.advance(LINE_HEIGHT_MM * (size / BODY_SIZE));
        let font = if bold { &self.bold } else { &self.regular };
        self.layer
            .use_text(text, size, Mm(MARGIN_MM + indent_mm), Mm(self.cursor_mm), font);
    }

    fn heading(&mut self, text: &str) {
        self.advance(LINE_HEIGHT_MM / 2.0);
        self.text(text, HEADING_SIZE, true, 0.0);
    }

    fn key_value(&mut self, key: &str, value: &str) {
        self.advance(LINE_HEIGHT_MM * 0.85);
        self.layer
            .use_text(key, BODY_SIZE, Mm(MARGIN_MM + 2.0), Mm(self.cursor_mm), &self.bold);
        self.layer
            .use_text(value, BODY_SIZE, Mm(MARGIN_MM + 45.0), Mm(self.cursor_mm), &self.regular);
    }

    fn spacer(&mut self) {
        self.advance(LINE_HEIGHT_MM / 2.0);
    }

    fn save(self, path: &Path) -> Result<(), PersistenceError> {
        let file = File::create(path)?;
        self.document
            .save(&mut BufWriter::new(file))
            .map_err(|error| PersistenceError::Report(error.to_string()))
    }
}

/// Renders the report as a paginated PDF.
///
/// # Errors
///
/// Returns a [`PersistenceError`] when the document cannot be built or
/// written.
#[tracing::instrument(level = "debug", skip(data))]
pub fn render(data: &ReportData, path: &Path) -> Result<(), PersistenceError> {
    let mut writer = PageWriter::new(&format!("Prostate Analysis Report - {}", data.case_name))?;

    writer.text("PROSTATE ANALYSIS REPORT", TITLE_SIZE, true, 0.0);
    writer.spacer();

    writer.heading("PATIENT INFORMATION");
    writer.key_value("ID:", &data.patient_id);
    writer.key_value("Name:", &data.patient_name);
    writer.key_value("Date of birth:", &data.patient_birth_date);
    writer.key_value("Age:", &data.patient_age);
    writer.spacer();

    writer.heading("STUDY INFORMATION");
    writer.key_value("Date:", &data.study_date);
    writer.key_value("Institution:", &data.institution);
    writer.key_value("Physician:", &data.physician);
    writer.key_value("Sequences:", &data.sequences.join(", "));
    if let Some(prediction_date) = &data.prediction_date {
        writer.key_value("Analysis date:", prediction_date);
    }
    writer.spacer();

    writer.heading("FINDINGS");
    if data.lesions.is_empty() {
        let message = if data.prediction_date.is_some() {
            "No suspicious lesions were detected."
        } else {
            "No automated analysis is available for this study."
        };
        writer.text(message, BODY_SIZE, false, 2.0);
    } else {
        writer.text(
            &format!(
                "{} suspicious lesion(s) detected. Total volume: {:.2} mm3.",
                data.lesions.len(),
                data.total_lesion_volume
            ),
            BODY_SIZE,
            false,
            2.0,
        );
        writer.spacer();
        writer.text(
            &format!(
                "{:<4} {:>14} {:>15} {:>12} {:>10}",
                "#", "Volume (mm3)", "Diameter (mm)", "Probability", "Severity"
            ),
            BODY_SIZE,
            true,
            2.0,
        );
        for (index, lesion) in data.lesions.iter().enumerate() {
            writer.text(
                &format!(
                    "{:<4} {:>14.2} {:>15.2} {:>12.2} {:>10}",
                    index + 1,
                    lesion.volume_mm3,
                    lesion.max_diameter_mm,
                    lesion.probability,
                    lesion.severity.to_string()
                ),
                BODY_SIZE,
                false,
                2.0,
            );
        }
    }
    writer.spacer();

    writer.heading("CONCLUSIONS");
    for line in wrap(&data.conclusion, 95) {
        writer.text(&line, BODY_SIZE, false, 2.0);
    }
    writer.spacer();

    writer.heading("RECOMMENDATIONS");
    for recommendation in &data.recommendations {
        for (index, line) in wrap(recommendation, 92).into_iter().enumerate() {
            let prefix = if index == 0 { "- " } else { "  " };
            writer.text(&format!("{prefix}{line}"), BODY_SIZE, false, 2.0);
        }
    }
    writer.spacer();
    writer.spacer();

    writer.text(
        "This report was generated automatically and does not replace evaluation by a specialist.",
        NOTE_SIZE,
        false,
        0.0,
    );
    writer.text(
        &format!("Generated: {}", data.generated.format("%d/%m/%Y %H:%M")),
        NOTE_SIZE,
        false,
        0.0,
    );

    writer.save(path)
}

/// Greedy word wrap to a maximum number of characters per line.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + word.len() + 1 > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use crate::core::config::AppConfig;
    use crate::core::report::tests::sample_case;
    use crate::core::report::ReportData;

    use super::*;

    #[test]
    fn wrap_respects_the_width_limit() {
        let lines = wrap("one two three four five six seven", 12);
        assert!(lines.iter().all(|line| line.len() <= 12));
        assert_eq!(lines.join(" "), "one two three four five six seven");
    }

    #[test]
    fn renders_a_nonempty_pdf_file() {
        let dir = std::env::temp_dir().join("prostalyzer_pdf_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("report.pdf");
        let data = ReportData::from_case(&sample_case(true), &AppConfig::default());

        render(&data, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        std::fs::remove_file(&path).unwrap();
    }
}
