use serde_json::{json, Map, Value};

use crate::models::{ReportFormat, ReportTable};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn render(table: &ReportTable, format: ReportFormat) -> Result<Vec<u8>, ReportError> {
    match format {
        ReportFormat::Csv => render_csv(table),
        ReportFormat::Json => render_json(table),
        ReportFormat::Pdf => Ok(render_pdf(table)),
    }
}

/// Table first, then a blank line and the summary as `key,value` records.
pub fn render_csv(table: &ReportTable) -> Result<Vec<u8>, ReportError> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());

    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    if !table.summary.is_empty() {
        writer.write_record([""])?;
        for (key, value) in &table.summary {
            writer.write_record([key, value])?;
        }
    }

    writer.into_inner().map_err(|e| ReportError::Io(e.into_error()))
}

/// Rows become objects keyed by header.
pub fn render_json(table: &ReportTable) -> Result<Vec<u8>, ReportError> {
    let summary: Map<String, Value> = table
        .summary
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let rows: Vec<Value> = table
        .rows
        .iter()
        .map(|row| {
            let object: Map<String, Value> = table
                .headers
                .iter()
                .zip(row)
                .map(|(h, cell)| (h.clone(), Value::String(cell.clone())))
                .collect();
            Value::Object(object)
        })
        .collect();

    Ok(serde_json::to_vec_pretty(&json!({
        "title": table.title,
        "summary": summary,
        "rows": rows,
    }))?)
}

// Letter size in points.
const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 50.0;
const FONT_SIZE: f32 = 9.0;
const TITLE_SIZE: f32 = 16.0;
const LINE_HEIGHT: f32 = 13.0;
// Average Helvetica glyph width as a fraction of the font size.
const AVG_GLYPH_WIDTH: f32 = 0.52;

#[derive(Debug, Clone, PartialEq)]
struct TextItem {
    x: f32,
    y: f32,
    size: f32,
    text: String,
}

fn pdf_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '(' | ')' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn fit(text: &str, width: f32, size: f32) -> String {
    let max_chars = ((width / (size * AVG_GLYPH_WIDTH)).floor() as usize).max(1);
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

/// Split the report into pages of positioned text.
fn layout(table: &ReportTable) -> Vec<Vec<TextItem>> {
    let usable_width = PAGE_WIDTH - 2.0 * MARGIN;
    let columns = table.headers.len().max(1);
    let column_width = usable_width / columns as f32;
    let bottom = MARGIN + LINE_HEIGHT;

    let mut pages: Vec<Vec<TextItem>> = Vec::new();
    let mut page = Vec::new();
    let mut y = PAGE_HEIGHT - MARGIN;

    page.push(TextItem {
        x: MARGIN,
        y,
        size: TITLE_SIZE,
        text: fit(&table.title, usable_width, TITLE_SIZE),
    });
    y -= TITLE_SIZE + LINE_HEIGHT;

    for (key, value) in &table.summary {
        if y < bottom {
            pages.push(std::mem::take(&mut page));
            y = PAGE_HEIGHT - MARGIN;
        }
        page.push(TextItem {
            x: MARGIN,
            y,
            size: FONT_SIZE,
            text: fit(&format!("{}: {}", key, value), usable_width, FONT_SIZE),
        });
        y -= LINE_HEIGHT;
    }
    y -= LINE_HEIGHT;

    let row_items = |cells: &[String], y: f32| -> Vec<TextItem> {
        cells
            .iter()
            .take(columns)
            .enumerate()
            .map(|(i, cell)| TextItem {
                x: MARGIN + i as f32 * column_width,
                y,
                size: FONT_SIZE,
                text: fit(cell, column_width - 4.0, FONT_SIZE),
            })
            .collect()
    };

    if y < bottom {
        pages.push(std::mem::take(&mut page));
        y = PAGE_HEIGHT - MARGIN;
    }
    page.extend(row_items(&table.headers, y));
    y -= LINE_HEIGHT;

    for row in &table.rows {
        if y < bottom {
            pages.push(std::mem::take(&mut page));
            y = PAGE_HEIGHT - MARGIN;
            // Repeat the header on every page.
            page.extend(row_items(&table.headers, y));
            y -= LINE_HEIGHT;
        }
        page.extend(row_items(row, y));
        y -= LINE_HEIGHT;
    }
    pages.push(page);

    let total = pages.len();
    for (i, page) in pages.iter_mut().enumerate() {
        page.push(TextItem {
            x: MARGIN,
            y: MARGIN / 2.0,
            size: FONT_SIZE,
            text: format!("Page {} of {}", i + 1, total),
        });
    }
    pages
}

fn content_stream(items: &[TextItem]) -> String {
    let mut stream = String::from("BT\n");
    for item in items {
        stream.push_str(&format!(
            "/F1 {} Tf\n1 0 0 1 {:.2} {:.2} Tm\n({}) Tj\n",
            item.size,
            item.x,
            item.y,
            pdf_escape(&item.text)
        ));
    }
    stream.push_str("ET\n");
    stream
}

/// Minimal PDF 1.4 writer: one Helvetica font, text only.
pub fn render_pdf(table: &ReportTable) -> Vec<u8> {
    let pages = layout(table);

    // Object ids: 1 catalog, 2 page tree, 3 font, then (page, content) pairs.
    let page_ids: Vec<usize> = (0..pages.len()).map(|i| 4 + i * 2).collect();
    let mut objects: Vec<String> = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            page_ids.iter().map(|id| format!("{} 0 R", id)).collect::<Vec<_>>().join(" "),
            pages.len()
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>".to_string(),
    ];

    for (page, id) in pages.iter().zip(&page_ids) {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
            PAGE_WIDTH,
            PAGE_HEIGHT,
            id + 1
        ));
        let stream = content_stream(page);
        objects.push(format!("<< /Length {} >>\nstream\n{}endstream", stream.len(), stream));
    }

    let mut out: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, object) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, object).as_bytes());
    }

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    out
}
