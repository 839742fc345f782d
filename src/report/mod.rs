//! Detection report: a paginated PDF with the annotated image on page one and
//! the disease explanation on the pages after it.

mod pdf;

pub use pdf::{Font, PdfWriter, PAGE_HEIGHT, PAGE_WIDTH};

use anyhow::{bail, Result};
use chrono::NaiveDateTime;

use crate::detect::format_confidence;
use crate::frame::Frame;

const MARGIN: f32 = 28.35;
const TEXT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const CELL_HEIGHT: f32 = 28.35;
const BODY_SIZE: f32 = 14.0;
const BODY_LINE: f32 = 17.0;
const PARAGRAPH_GAP: f32 = 14.17;
const IMAGE_WIDTH: f32 = 510.24;
const JPEG_QUALITY: u8 = 90;

pub const TITLE: &str = "Rice Leaf Disease Detection Result";
pub const ANALYSIS_HEADING: &str = "Analysis and Recommendations:";

const HEADING_MARKERS: &[&str] = &["explanation:", "impact:", "recommendation"];

pub struct ReportInput<'a> {
    pub image: &'a Frame,
    pub label: &'a str,
    pub confidence: f32,
    pub explanation: &'a str,
    pub generated_at: NaiveDateTime,
}

/// `detection_{label}_{YYYYmmdd_HHMMSS}.pdf`. Every label character outside
/// `[A-Za-z0-9._-]` becomes `_`, so the name is safe both as a path component
/// and inside a `Content-Disposition` header.
pub fn report_file_name(label: &str, at: NaiveDateTime) -> String {
    let label: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("detection_{}_{}.pdf", label, at.format("%Y%m%d_%H%M%S"))
}

/// Strip markdown emphasis, heading and code markers.
pub fn clean_markdown(text: &str) -> String {
    text.replace("**", "")
        .replace(['*', '#', '`'], "")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExplanationLine {
    Heading(String),
    Body(String),
    Gap,
}

/// Split the explanation into headings, body lines and paragraph gaps.
pub fn classify_lines(explanation: &str) -> Vec<ExplanationLine> {
    explanation
        .lines()
        .map(|line| {
            let clean = clean_markdown(line);
            let lower = clean.to_lowercase();
            if HEADING_MARKERS.iter().any(|marker| lower.contains(marker)) {
                ExplanationLine::Heading(clean.trim().to_string())
            } else if clean.trim().is_empty() {
                ExplanationLine::Gap
            } else {
                ExplanationLine::Body(clean.trim_end().to_string())
            }
        })
        .collect()
}

/// Greedy word wrap to `max_width` points; words wider than a line are split.
pub fn wrap_text(text: &str, font: Font, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if font.text_width(&candidate, size) <= max_width {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if font.text_width(word, size) <= max_width {
            current = word.to_string();
            continue;
        }
        for ch in word.chars() {
            current.push(ch);
            if font.text_width(&current, size) > max_width && current.chars().count() > 1 {
                current.pop();
                lines.push(std::mem::take(&mut current));
                current.push(ch);
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Top-down layout cursor that starts a new page when a line will not fit.
struct Layout {
    pdf: PdfWriter,
    y: f32,
}

impl Layout {
    fn new() -> Self {
        let mut pdf = PdfWriter::new();
        pdf.add_page();
        Self { pdf, y: MARGIN }
    }

    fn new_page(&mut self) {
        self.pdf.add_page();
        self.y = MARGIN;
    }

    fn ensure_room(&mut self, height: f32) {
        if self.y + height > PAGE_HEIGHT - MARGIN {
            self.new_page();
        }
    }

    fn gap(&mut self, height: f32) {
        self.y += height;
    }

    /// A single line in a cell of `height`, text vertically centred.
    fn cell(&mut self, text: &str, font: Font, size: f32, height: f32, centered: bool) {
        self.ensure_room(height);
        let x = if centered {
            MARGIN + (TEXT_WIDTH - font.text_width(text, size)).max(0.0) / 2.0
        } else {
            MARGIN
        };
        let baseline = self.y + height / 2.0 + size * 0.35;
        self.pdf.text(x, baseline, font, size, text);
        self.y += height;
    }

    fn paragraph(&mut self, text: &str, font: Font, size: f32) {
        for line in wrap_text(text, font, size, TEXT_WIDTH) {
            self.cell(&line, font, size, BODY_LINE, false);
        }
    }
}

/// Render the report. The image is embedded as JPEG, scaled to the text width
/// (or down to the space left on page one).
pub fn build_report(input: &ReportInput<'_>) -> Result<Vec<u8>> {
    if input.image.width() == 0 || input.image.height() == 0 {
        bail!("report image is empty");
    }
    let mut layout = Layout::new();

    layout.cell(TITLE, Font::Bold, 18.0, CELL_HEIGHT, true);
    layout.gap(CELL_HEIGHT);
    layout.cell(
        &format!(
            "Detection Time: {}",
            input.generated_at.format("%Y-%m-%d %H:%M:%S")
        ),
        Font::Bold,
        18.0,
        CELL_HEIGHT,
        false,
    );
    layout.gap(PARAGRAPH_GAP);
    layout.cell(
        &format!("Detected Disease: {}", input.label),
        Font::Bold,
        BODY_SIZE,
        CELL_HEIGHT,
        false,
    );
    layout.cell(
        &format!("Confidence: {}", format_confidence(input.confidence)),
        Font::Bold,
        BODY_SIZE,
        CELL_HEIGHT,
        false,
    );
    layout.gap(PARAGRAPH_GAP);
    layout.cell("Rice Leaf Image:", Font::Bold, BODY_SIZE, CELL_HEIGHT, false);

    let jpeg = input.image.encode_jpeg(JPEG_QUALITY)?;
    let (img_w, img_h) = (input.image.width() as f32, input.image.height() as f32);
    let available = PAGE_HEIGHT - MARGIN - layout.y;
    let mut width = IMAGE_WIDTH;
    let mut height = width * img_h / img_w;
    if height > available {
        height = available;
        width = height * img_w / img_h;
    }
    let image = layout
        .pdf
        .add_jpeg(jpeg, input.image.width(), input.image.height());
    layout.pdf.image(image, MARGIN, layout.y, width, height);

    layout.new_page();
    layout.cell(ANALYSIS_HEADING, Font::Bold, 16.0, CELL_HEIGHT, false);
    layout.gap(PARAGRAPH_GAP);
    for line in classify_lines(input.explanation) {
        match line {
            ExplanationLine::Heading(text) => {
                layout.gap(PARAGRAPH_GAP);
                layout.paragraph(&text, Font::Bold, BODY_SIZE);
            }
            ExplanationLine::Gap => layout.gap(PARAGRAPH_GAP),
            ExplanationLine::Body(text) => layout.paragraph(&text, Font::Regular, BODY_SIZE),
        }
    }

    let pages = layout.pdf.page_count();
    let bytes = layout.pdf.finish();
    log::debug!(
        "built report for '{}': {} pages, {} bytes",
        input.label,
        pages,
        bytes.len()
    );
    Ok(bytes)
}
