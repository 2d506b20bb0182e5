use chrono::NaiveDateTime;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde::{Deserialize, Serialize};

use super::{resolve_columns, Column};
use crate::error::{Error, Result};
use crate::report::{Row, Value};

const PT_PER_MM: f64 = 72.0 / 25.4;
const MIN_COLUMN_MM: f64 = 15.0;
const MAX_COLUMN_MM: f64 = 60.0;
const MAX_TEXT_CHARS: usize = 50;
/// Rows start a new page once the cursor passes this distance above the
/// bottom edge.
const PAGE_BREAK_FROM_BOTTOM_MM: f64 = 20.0;
const HEADER_ROW_MM: f64 = 8.0;
const DATA_ROW_MM: f64 = 7.0;
const CELL_PADDING_MM: f64 = 1.5;

pub type Rgb = (u8, u8, u8);

const BLACK: Rgb = (0, 0, 0);
const WHITE: Rgb = (255, 255, 255);
const DARK_GRAY: Rgb = (100, 100, 100);
const GRAY: Rgb = (128, 128, 128);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSize {
    #[default]
    A4,
    Letter,
    Legal,
}

impl PageSize {
    /// Portrait (width, height) in millimetres.
    fn dimensions(self) -> (f64, f64) {
        match self {
            PageSize::A4 => (210.0, 297.0),
            PageSize::Letter => (215.9, 279.4),
            PageSize::Legal => (215.9, 355.6),
        }
    }
}

impl std::str::FromStr for PageSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "a4" => Ok(PageSize::A4),
            "letter" => Ok(PageSize::Letter),
            "legal" => Ok(PageSize::Legal),
            other => Err(Error::Config(format!("unknown page size: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    #[default]
    Landscape,
}

impl std::str::FromStr for Orientation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "portrait" => Ok(Orientation::Portrait),
            "landscape" => Ok(Orientation::Landscape),
            other => Err(Error::Config(format!("unknown orientation: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            top: 15.0,
            bottom: 15.0,
            left: 10.0,
            right: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    pub page_size: PageSize,
    pub orientation: Orientation,
    pub margins: Margins,
    pub include_header: bool,
    pub include_footer: bool,
    pub title: String,
    pub subtitle: Option<String>,
    /// Printed as a "Generated:" line under the title. Left out when unset.
    pub generated_at: Option<NaiveDateTime>,
    pub header_color: Rgb,
    /// Fill for every other data row; `None` keeps all rows white.
    pub alternate_row_color: Option<Rgb>,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            page_size: PageSize::A4,
            orientation: Orientation::Landscape,
            margins: Margins::default(),
            include_header: true,
            include_footer: true,
            title: String::new(),
            subtitle: None,
            generated_at: None,
            header_color: (68, 114, 196),
            alternate_row_color: Some((245, 245, 245)),
        }
    }
}

impl PdfConfig {
    /// Page (width, height) in millimetres after orientation.
    pub fn page_dimensions(&self) -> (f64, f64) {
        let (w, h) = self.page_size.dimensions();
        match self.orientation {
            Orientation::Portrait => (w, h),
            Orientation::Landscape => (h, w),
        }
    }

    pub fn printable_width(&self) -> f64 {
        self.page_dimensions().0 - self.margins.left - self.margins.right
    }
}

/// A titled block of a multi-section document.
#[derive(Debug, Clone, Default)]
pub struct ReportSection {
    pub title: String,
    pub description: Option<String>,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Default)]
pub struct PdfExporter {
    config: PdfConfig,
}

impl PdfExporter {
    pub fn new(config: PdfConfig) -> Self {
        Self { config }
    }

    pub fn export(&self, rows: &[Row], columns: &[Column]) -> Result<Vec<u8>> {
        let mut canvas = self.start();
        self.draw_table(&mut canvas, rows, columns);
        self.finish(canvas)
    }

    /// Key/value summary block, two pairs per line, above the table.
    pub fn export_with_summary(
        &self,
        rows: &[Row],
        columns: &[Column],
        summary: &Row,
    ) -> Result<Vec<u8>> {
        let mut canvas = self.start();
        self.draw_summary(&mut canvas, summary);
        self.draw_table(&mut canvas, rows, columns);
        self.finish(canvas)
    }

    pub fn export_sections(&self, sections: &[ReportSection]) -> Result<Vec<u8>> {
        let mut canvas = self.start();
        for (i, section) in sections.iter().enumerate() {
            if i > 0 {
                canvas.y += 10.0;
            }
            canvas.break_if_needed(10.0);
            canvas.text_line(&section.title, Font::Bold, 14.0, BLACK, 10.0);
            if let Some(ref description) = section.description {
                if !description.is_empty() {
                    canvas.text_line(description, Font::Regular, 10.0, DARK_GRAY, 5.0);
                    canvas.y += 3.0;
                }
            }
            if !section.rows.is_empty() {
                self.draw_table(&mut canvas, &section.rows, &section.columns);
            }
        }
        self.finish(canvas)
    }

    fn start(&self) -> Canvas {
        let (width, height) = self.config.page_dimensions();
        let mut canvas = Canvas::new(width, height, self.config.margins);
        if self.config.include_header {
            canvas.text_line(&self.config.title, Font::Bold, 20.0, BLACK, 12.0);
            if let Some(ref subtitle) = self.config.subtitle {
                canvas.text_line(subtitle, Font::Regular, 12.0, DARK_GRAY, 8.0);
            }
            if let Some(at) = self.config.generated_at {
                let line = format!("Generated: {}", at.format("%Y-%m-%d %H:%M"));
                canvas.text_line(&line, Font::Regular, 10.0, GRAY, 6.0);
            }
            canvas.y += 8.0;
        }
        canvas
    }

    fn draw_summary(&self, canvas: &mut Canvas, summary: &Row) {
        canvas.text_line("Summary", Font::Bold, 12.0, BLACK, 8.0);

        let page_width = self.config.printable_width();
        let label_width = page_width * 0.3;
        let value_width = page_width * 0.2;
        let left = self.config.margins.left;

        let mut col = 0;
        for (key, value) in summary.iter() {
            let x = left + col as f64 * (label_width + value_width);
            let baseline = canvas.y + 4.0;
            canvas.text(x, baseline, Font::Regular, 10.0, DARK_GRAY, &format!("{key}:"));
            canvas.text(
                x + label_width,
                baseline,
                Font::Regular,
                10.0,
                BLACK,
                &format_value(value),
            );
            col += 1;
            if col >= 2 {
                canvas.y += 6.0;
                col = 0;
            }
        }
        if col > 0 {
            canvas.y += 6.0;
        }
        canvas.y += 5.0;
    }

    fn draw_table(&self, canvas: &mut Canvas, rows: &[Row], columns: &[Column]) {
        let columns = resolve_columns(columns, rows);
        if columns.is_empty() {
            return;
        }
        let cells: Vec<Vec<String>> = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(&c.key).map(format_value).unwrap_or_default())
                    .collect()
            })
            .collect();
        let widths = column_widths(&columns, &cells, self.config.printable_width());

        self.draw_header_row(canvas, &columns, &widths);
        for (idx, values) in cells.iter().enumerate() {
            let fill = match self.config.alternate_row_color {
                Some(alt) if idx % 2 == 1 => alt,
                _ => WHITE,
            };
            let mut x = self.config.margins.left;
            for (value, width) in values.iter().zip(&widths) {
                canvas.rect(x, canvas.y, *width, DATA_ROW_MM, Some(fill), Some(BLACK));
                let text = fit_to_width(value, *width, 8.0);
                canvas.text(
                    x + CELL_PADDING_MM,
                    canvas.y + DATA_ROW_MM / 2.0 + 1.0,
                    Font::Regular,
                    8.0,
                    BLACK,
                    &text,
                );
                x += width;
            }
            canvas.y += DATA_ROW_MM;

            if canvas.past_break_line() {
                canvas.add_page();
                self.draw_header_row(canvas, &columns, &widths);
            }
        }
    }

    fn draw_header_row(&self, canvas: &mut Canvas, columns: &[Column], widths: &[f64]) {
        let mut x = self.config.margins.left;
        for (column, width) in columns.iter().zip(widths) {
            canvas.rect(
                x,
                canvas.y,
                *width,
                HEADER_ROW_MM,
                Some(self.config.header_color),
                Some(BLACK),
            );
            let label = fit_to_width(&column.label, *width, 9.0);
            let text_x = x + ((width - text_width_mm(&label, 9.0)) / 2.0).max(CELL_PADDING_MM);
            canvas.text(
                text_x,
                canvas.y + HEADER_ROW_MM / 2.0 + 1.2,
                Font::Bold,
                9.0,
                WHITE,
                &label,
            );
            x += width;
        }
        canvas.y += HEADER_ROW_MM;
    }

    fn finish(&self, mut canvas: Canvas) -> Result<Vec<u8>> {
        canvas.close_page();
        let total = canvas.pages.len();
        if self.config.include_footer {
            let (width, height) = (canvas.width, canvas.height);
            for (idx, page) in canvas.pages.iter_mut().enumerate() {
                let label = format!("Page {} of {total}", idx + 1);
                let x = (width - text_width_mm(&label, 8.0)) / 2.0;
                push_text(page, x, height - 6.0, height, Font::Italic, 8.0, GRAY, &label);
            }
        }
        render(canvas)
    }
}

// ── Value formatting and layout helpers ───────────────────────────

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "Yes".into(),
        Value::Bool(false) => "No".into(),
        Value::Int(i) => i.to_string(),
        Value::Float(x) => format!("{x:.2}"),
        Value::Text(s) => truncate(s, MAX_TEXT_CHARS),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        Value::List(_) => truncate(&value.to_string(), MAX_TEXT_CHARS),
    }
}

/// Strings longer than `max` characters keep their first `max - 3` and end
/// in `...`.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

/// Approximate Helvetica advance: half an em per character.
fn text_width_mm(text: &str, size_pt: f64) -> f64 {
    text.chars().count() as f64 * size_pt * 0.5 / PT_PER_MM
}

fn fit_to_width(text: &str, width_mm: f64, size_pt: f64) -> String {
    let available = width_mm - 2.0 * CELL_PADDING_MM;
    let max_chars = (available / (size_pt * 0.5 / PT_PER_MM)).floor().max(0.0) as usize;
    if text.chars().count() <= max_chars || max_chars < 4 {
        text.to_string()
    } else {
        truncate(text, max_chars)
    }
}

/// Header length x 2.5 and value length x 2.0, scaled to the printable
/// width and clamped to [15, 60] mm.
fn column_widths(columns: &[Column], cells: &[Vec<String>], available: f64) -> Vec<f64> {
    let mut widths: Vec<f64> = columns
        .iter()
        .map(|c| c.label.chars().count() as f64 * 2.5)
        .collect();
    for row in cells {
        for (w, value) in widths.iter_mut().zip(row) {
            *w = w.max(value.chars().count() as f64 * 2.0);
        }
    }
    let total: f64 = widths.iter().sum();
    let scale = if total > 0.0 { available / total } else { 1.0 };
    widths
        .into_iter()
        .map(|w| (w * scale).clamp(MIN_COLUMN_MM, MAX_COLUMN_MM))
        .collect()
}

// ── Page canvas ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Font {
    Regular,
    Bold,
    Italic,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
            Font::Italic => "F3",
        }
    }
}

/// Page content accumulated top-down in millimetres.
struct Canvas {
    width: f64,
    height: f64,
    margins: Margins,
    pages: Vec<Vec<Operation>>,
    current: Vec<Operation>,
    y: f64,
}

impl Canvas {
    fn new(width: f64, height: f64, margins: Margins) -> Self {
        Self {
            width,
            height,
            margins,
            pages: Vec::new(),
            current: Vec::new(),
            y: margins.top,
        }
    }

    fn add_page(&mut self) {
        self.close_page();
        self.y = self.margins.top;
    }

    fn close_page(&mut self) {
        self.pages.push(std::mem::take(&mut self.current));
    }

    fn past_break_line(&self) -> bool {
        self.y > self.height - PAGE_BREAK_FROM_BOTTOM_MM
    }

    fn break_if_needed(&mut self, needed: f64) {
        if self.y + needed > self.height - PAGE_BREAK_FROM_BOTTOM_MM {
            self.add_page();
        }
    }

    /// Left-aligned line of text occupying `line_height` mm.
    fn text_line(&mut self, text: &str, font: Font, size: f64, color: Rgb, line_height: f64) {
        if !text.is_empty() {
            let baseline = self.y + line_height / 2.0 + size * 0.35 / PT_PER_MM;
            self.text(self.margins.left, baseline, font, size, color, text);
        }
        self.y += line_height;
    }

    fn text(&mut self, x: f64, baseline: f64, font: Font, size: f64, color: Rgb, text: &str) {
        let height = self.height;
        push_text(&mut self.current, x, baseline, height, font, size, color, text);
    }

    fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: Option<Rgb>, stroke: Option<Rgb>) {
        let ops = &mut self.current;
        ops.push(Operation::new("w", vec![real(0.2 * PT_PER_MM)]));
        if let Some(c) = fill {
            ops.push(color_op("rg", c));
        }
        if let Some(c) = stroke {
            ops.push(color_op("RG", c));
        }
        ops.push(Operation::new(
            "re",
            vec![
                real(x * PT_PER_MM),
                real((self.height - y - h) * PT_PER_MM),
                real(w * PT_PER_MM),
                real(h * PT_PER_MM),
            ],
        ));
        let paint = match (fill.is_some(), stroke.is_some()) {
            (true, true) => "B",
            (true, false) => "f",
            _ => "S",
        };
        ops.push(Operation::new(paint, vec![]));
    }
}

#[allow(clippy::too_many_arguments)]
fn push_text(
    ops: &mut Vec<Operation>,
    x: f64,
    baseline: f64,
    page_height: f64,
    font: Font,
    size: f64,
    color: Rgb,
    text: &str,
) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(color_op("rg", color));
    ops.push(Operation::new(
        "Tf",
        vec![Object::Name(font.resource().as_bytes().to_vec()), real(size)],
    ));
    ops.push(Operation::new(
        "Td",
        vec![real(x * PT_PER_MM), real((page_height - baseline) * PT_PER_MM)],
    ));
    ops.push(Operation::new(
        "Tj",
        vec![Object::string_literal(win_ansi(text))],
    ));
    ops.push(Operation::new("ET", vec![]));
}

fn real(v: f64) -> Object {
    Object::Real(v as f32)
}

fn color_op(op: &str, (r, g, b): Rgb) -> Operation {
    Operation::new(
        op,
        vec![
            real(f64::from(r) / 255.0),
            real(f64::from(g) / 255.0),
            real(f64::from(b) / 255.0),
        ],
    )
}

/// Encode for the standard fonts' WinAnsi encoding. Characters outside
/// Latin-1 become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

fn render(canvas: Canvas) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font = |doc: &mut Document, base: &str| {
        doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => base,
            "Encoding" => "WinAnsiEncoding",
        })
    };
    let regular = font(&mut doc, "Helvetica");
    let bold = font(&mut doc, "Helvetica-Bold");
    let italic = font(&mut doc, "Helvetica-Oblique");
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
            "F3" => italic,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(canvas.pages.len());
    for operations in canvas.pages {
        let content = Content { operations };
        let encoded = content
            .encode()
            .map_err(|e| Error::Render(format!("pdf: {e}")))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => Object::Integer(count),
        "Resources" => resources_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            real(canvas.width * PT_PER_MM),
            real(canvas.height * PT_PER_MM),
        ],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf)
        .map_err(|e| Error::Render(format!("pdf: {e}")))?;
    Ok(buf)
}
