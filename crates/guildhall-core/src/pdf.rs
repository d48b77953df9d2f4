// Minimal single-page PDF writer used for certificates.
//
// Only what a certificate needs: the two standard Helvetica faces, text,
// stroked rectangles and filled squares (for the QR code).

use std::fmt::Write as _;

use qrcode::{Color, QrCode};

use crate::error::{Error, Result};

/// A4 landscape in points.
pub const PAGE_WIDTH: f32 = 842.0;
pub const PAGE_HEIGHT: f32 = 595.0;

/// Quiet zone around the QR code, in modules.
const QR_QUIET_ZONE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

    /// Rough advance width of a glyph as a fraction of the font size.
    fn average_advance(&self) -> f32 {
        match self {
            Font::Regular => 0.52,
            Font::Bold => 0.56,
        }
    }
}

/// Accumulates page content-stream operators.
#[derive(Default)]
pub struct Canvas {
    ops: String,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, font: Font, size: f32, x: f32, y: f32, text: &str) {
        let _ = writeln!(
            self.ops,
            "BT /{} {size:.1} Tf {x:.2} {y:.2} Td ({}) Tj ET",
            font.resource(),
            escape_text(text)
        );
    }

    /// Text horizontally centred on the page.
    pub fn centered_text(&mut self, font: Font, size: f32, y: f32, text: &str) {
        let width = text.chars().count() as f32 * size * font.average_advance();
        let x = ((PAGE_WIDTH - width) / 2.0).max(0.0);
        self.text(font, size, x, y, text);
    }

    pub fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32, line_width: f32) {
        let _ = writeln!(self.ops, "{line_width:.2} w {x:.2} {y:.2} {w:.2} {h:.2} re S");
    }

    pub fn gray(&mut self, level: f32) {
        let _ = writeln!(self.ops, "{level:.2} g {level:.2} G");
    }

    /// Draw `data` as a QR code with its lower-left corner at `(x, y)` and
    /// the given side length, quiet zone included.
    pub fn qr_code(&mut self, data: &str, x: f32, y: f32, side: f32) -> Result<()> {
        let code = QrCode::new(data.as_bytes())
            .map_err(|e| Error::Internal(format!("QR encoding failed: {e}")))?;
        let width = code.width();
        let total = width + 2 * QR_QUIET_ZONE;
        let module = side / total as f32;

        for (i, color) in code.to_colors().into_iter().enumerate() {
            if color != Color::Dark {
                continue;
            }
            let row = i / width + QR_QUIET_ZONE;
            let col = i % width + QR_QUIET_ZONE;
            let mx = x + col as f32 * module;
            let my = y + (total - 1 - row) as f32 * module;
            let _ = writeln!(self.ops, "{mx:.2} {my:.2} {module:.2} {module:.2} re");
        }
        self.ops.push_str("f\n");
        Ok(())
    }

    pub fn into_content(self) -> Vec<u8> {
        encode_latin1(&self.ops)
    }
}

/// Escape a string for a PDF literal string.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '(' | ')' => {
                out.push('\\');
                out.push(c);
            }
            '\n' | '\r' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

/// The standard fonts use a single-byte encoding; anything outside Latin-1
/// becomes `?`.
fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Serialize a one-page document with the given content stream.
pub fn write_document(content: &[u8], title: &str) -> Vec<u8> {
    let objects: Vec<Vec<u8>> = vec![
        b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
        b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_vec(),
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH:.0} {PAGE_HEIGHT:.0}] \
             /Resources << /Font << /F1 5 0 R /F2 6 0 R >> >> /Contents 4 0 R >>"
        )
        .into_bytes(),
        {
            let mut stream = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
            stream.extend_from_slice(content);
            stream.extend_from_slice(b"\nendstream");
            stream
        },
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>".to_vec(),
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>"
            .to_vec(),
        {
            let mut info = b"<< /Title (".to_vec();
            info.extend(encode_latin1(&escape_text(title)));
            info.extend_from_slice(b") /Producer (guildhall) >>");
            info
        },
    ];

    let mut out: Vec<u8> = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend(format!("{} 0 obj\n", i + 1).into_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in &offsets {
        let _ = write!(xref, "{offset:010} 00000 n \n");
    }
    let _ = write!(
        xref,
        "trailer\n<< /Size {} /Root 1 0 R /Info {} 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
        objects.len() + 1,
        objects.len()
    );
    out.extend(xref.into_bytes());
    out
}

#[cfg(test)]
pub(crate) mod checks {
    /// Assert the xref table points at each `N 0 obj` header.
    pub fn assert_valid_xref(pdf: &[u8]) {
        let text = String::from_utf8_lossy(pdf);
        let startxref = text.rfind("startxref\n").expect("startxref present");
        let offset: usize = text[startxref + 10..]
            .lines()
            .next()
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(pdf[offset..].starts_with(b"xref\n"), "startxref must point at xref");

        let table = String::from_utf8_lossy(&pdf[offset..]).into_owned();
        let mut lines = table.lines().skip(1);
        let header = lines.next().unwrap();
        let count: usize = header.split(' ').nth(1).unwrap().parse().unwrap();
        let entries: Vec<&str> = lines.take(count).collect();
        for (n, entry) in entries.iter().enumerate().skip(1) {
            let at: usize = entry[..10].parse().unwrap();
            let expected = format!("{n} 0 obj");
            assert!(
                pdf[at..].starts_with(expected.as_bytes()),
                "xref entry {n} does not point at its object"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_structure() {
        let mut canvas = Canvas::new();
        canvas.stroke_rect(20.0, 20.0, 100.0, 50.0, 2.0);
        canvas.text(Font::Bold, 12.0, 30.0, 40.0, "Hello (world)");
        let pdf = write_document(&canvas.into_content(), "Test");

        assert!(pdf.starts_with(b"%PDF-1.4"));
        assert!(pdf.ends_with(b"%%EOF\n"));
        checks::assert_valid_xref(&pdf);

        let text = String::from_utf8_lossy(&pdf);
        assert!(text.contains("(Hello \\(world\\)) Tj"));
        assert!(text.contains("/MediaBox [0 0 842 595]"));
    }

    #[test]
    fn stream_length_matches_content() {
        let mut canvas = Canvas::new();
        canvas.centered_text(Font::Regular, 10.0, 100.0, "abc");
        let content = canvas.into_content();
        let pdf = write_document(&content, "T");
        let text = String::from_utf8_lossy(&pdf);
        assert!(text.contains(&format!("<< /Length {} >>", content.len())));
    }

    #[test]
    fn qr_code_draws_modules() {
        let mut canvas = Canvas::new();
        canvas
            .qr_code("https://example.com/api/certificates/verify/abc", 0.0, 0.0, 100.0)
            .unwrap();
        let ops = String::from_utf8(canvas.into_content()).unwrap();
        let squares = ops.lines().filter(|l| l.ends_with(" re")).count();
        // Finder patterns alone contribute well over a hundred dark modules.
        assert!(squares > 100, "only {squares} modules drawn");
        assert!(ops.ends_with("f\n"));
    }

    #[test]
    fn non_latin_text_is_replaced() {
        assert_eq!(encode_latin1("café ✓"), b"caf\xE9 ?".to_vec());
    }
}
