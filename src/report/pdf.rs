//! Minimal PDF 1.4 writer: A4 pages, the two standard Helvetica faces, and
//! baseline JPEG images embedded as DCTDecode XObjects.
//!
//! Coordinates passed in are measured from the page's top-left corner in
//! points; conversion to PDF's bottom-left origin happens here.

use std::fmt::Write as _;

pub const PAGE_WIDTH: f32 = 595.28;
pub const PAGE_HEIGHT: f32 = 841.89;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(&self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }

    /// Advance width of `ch` in 1/1000 em (standard Helvetica metrics).
    fn glyph_width(&self, ch: char) -> u16 {
        let code = ch as u32;
        if !(32..=126).contains(&code) {
            return 556;
        }
        let index = (code - 32) as usize;
        match self {
            Font::Regular => HELVETICA_WIDTHS[index],
            Font::Bold => HELVETICA_BOLD_WIDTHS[index],
        }
    }

    /// Width of `text` in points at `size`.
    pub fn text_width(&self, text: &str, size: f32) -> f32 {
        let units: u32 = text.chars().map(|ch| self.glyph_width(ch) as u32).sum();
        units as f32 * size / 1000.0
    }
}

#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

struct JpegImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

/// Handle to an image registered with `PdfWriter::add_jpeg`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageId(usize);

#[derive(Default)]
pub struct PdfWriter {
    pages: Vec<Vec<u8>>,
    images: Vec<JpegImage>,
}

impl PdfWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_page(&mut self) {
        self.pages.push(Vec::new());
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn add_jpeg(&mut self, data: Vec<u8>, width: u32, height: u32) -> ImageId {
        self.images.push(JpegImage {
            data,
            width,
            height,
        });
        ImageId(self.images.len() - 1)
    }

    fn current(&mut self) -> &mut Vec<u8> {
        if self.pages.is_empty() {
            self.pages.push(Vec::new());
        }
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    /// Draw `text` with its baseline at `baseline_y` (from the top of the page).
    pub fn text(&mut self, x: f32, baseline_y: f32, font: Font, size: f32, text: &str) {
        let y = PAGE_HEIGHT - baseline_y;
        let content = self.current();
        content.extend_from_slice(
            format!("BT /{} {:.2} Tf {:.2} {:.2} Td (", font.resource(), size, x, y).as_bytes(),
        );
        content.extend_from_slice(&encode_text(text));
        content.extend_from_slice(b") Tj ET\n");
    }

    /// Place an image with its top-left corner at `(x, top)`.
    pub fn image(&mut self, id: ImageId, x: f32, top: f32, width: f32, height: f32) {
        let y = PAGE_HEIGHT - top - height;
        let content = self.current();
        content.extend_from_slice(
            format!(
                "q {:.2} 0 0 {:.2} {:.2} {:.2} cm /Im{} Do Q\n",
                width, height, x, y, id.0
            )
            .as_bytes(),
        );
    }

    /// Serialize the document.
    pub fn finish(mut self) -> Vec<u8> {
        if self.pages.is_empty() {
            self.pages.push(Vec::new());
        }
        // Object numbering: 1 catalog, 2 page tree, 3-4 fonts, then images,
        // then one (page, content) pair per page.
        let image_base = 5;
        let page_base = image_base + self.images.len();
        let page_ids: Vec<usize> = (0..self.pages.len()).map(|i| page_base + 2 * i).collect();

        let mut out: Vec<u8> = Vec::new();
        let mut offsets: Vec<usize> = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");

        let kids = page_ids
            .iter()
            .map(|id| format!("{} 0 R", id))
            .collect::<Vec<_>>()
            .join(" ");
        write_object(&mut out, &mut offsets, b"<< /Type /Catalog /Pages 2 0 R >>");
        write_object(
            &mut out,
            &mut offsets,
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                kids,
                page_ids.len()
            )
            .as_bytes(),
        );
        for base in ["Helvetica", "Helvetica-Bold"] {
            write_object(
                &mut out,
                &mut offsets,
                format!(
                    "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
                    base
                )
                .as_bytes(),
            );
        }

        for image in &self.images {
            let mut body = format!(
                "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB \
                 /BitsPerComponent 8 /Filter /DCTDecode /Length {} >>\nstream\n",
                image.width,
                image.height,
                image.data.len()
            )
            .into_bytes();
            body.extend_from_slice(&image.data);
            body.extend_from_slice(b"\nendstream");
            write_object(&mut out, &mut offsets, &body);
        }

        let mut xobjects = String::new();
        for (i, _) in self.images.iter().enumerate() {
            let _ = write!(xobjects, "/Im{} {} 0 R ", i, image_base + i);
        }
        let resources = format!(
            "<< /Font << /F1 3 0 R /F2 4 0 R >> /XObject << {}>> >>",
            xobjects
        );

        for (i, content) in self.pages.iter().enumerate() {
            let page_id = page_ids[i];
            write_object(
                &mut out,
                &mut offsets,
                format!(
                    "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {:.2} {:.2}] /Resources {} /Contents {} 0 R >>",
                    PAGE_WIDTH,
                    PAGE_HEIGHT,
                    resources,
                    page_id + 1
                )
                .as_bytes(),
            );
            let mut body = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
            body.extend_from_slice(content);
            body.extend_from_slice(b"\nendstream");
            write_object(&mut out, &mut offsets, &body);
        }

        let xref_at = out.len();
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", offsets.len() + 1);
        for offset in &offsets {
            let _ = writeln!(xref, "{:010} 00000 n ", offset);
        }
        let _ = write!(
            xref,
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref_at
        );
        out.extend_from_slice(xref.as_bytes());
        out
    }
}

fn write_object(out: &mut Vec<u8>, offsets: &mut Vec<usize>, body: &[u8]) {
    offsets.push(out.len());
    out.extend_from_slice(format!("{} 0 obj\n", offsets.len()).as_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(b"\nendobj\n");
}

/// Latin-1 bytes for a PDF literal string; other characters become `?`.
fn encode_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(ch as u8);
            }
            '\t' => out.push(b' '),
            c if (c as u32) < 32 => {}
            c if (c as u32) <= 0xFF => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out
}
