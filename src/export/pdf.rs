//! Minimal PDF 1.4 writer for tabular exports: a title block followed by a
//! table that flows onto as many A4 pages as it needs.

use serde_json::{Map, Value};

use super::headers;

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 40.0;
const TITLE_SIZE: f32 = 18.0;
const BODY_SIZE: f32 = 11.0;
const CELL_SIZE: f32 = 8.0;
const CELL_PADDING: f32 = 3.0;
const LINE_HEIGHT: f32 = CELL_SIZE * 1.25;
// Helvetica averages about half an em per glyph
const CHAR_WIDTH: f32 = CELL_SIZE * 0.5;
const HEADER_FILL: (f32, f32, f32) = (41.0 / 255.0, 128.0 / 255.0, 185.0 / 255.0);

/// Render `records` under `title` as PDF bytes.
pub fn render_pdf(records: &[Map<String, Value>], title: &str, generated_at: &str) -> Vec<u8> {
    let headers = headers(records);
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|record| {
            headers
                .iter()
                .map(|h| pdf_value(record.get(h.as_str())))
                .collect()
        })
        .collect();

    let pages = layout(title, generated_at, &headers, &rows);
    assemble(&pages)
}

fn pdf_value(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

struct Page {
    ops: String,
}

impl Page {
    fn new() -> Self {
        Self { ops: String::new() }
    }

    fn text(&mut self, font: &str, size: f32, x: f32, y: f32, text: &str) {
        self.ops.push_str(&format!(
            "BT /{} {:.1} Tf {:.2} {:.2} Td ({}) Tj ET\n",
            font,
            size,
            x,
            y,
            escape(text)
        ));
    }

    fn fill_rect(&mut self, (r, g, b): (f32, f32, f32), x: f32, y: f32, w: f32, h: f32) {
        self.ops.push_str(&format!(
            "{:.3} {:.3} {:.3} rg {:.2} {:.2} {:.2} {:.2} re f 0 0 0 rg\n",
            r, g, b, x, y, w, h
        ));
    }

    fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        self.ops.push_str(&format!(
            "0.8 G 0.5 w {:.2} {:.2} {:.2} {:.2} re S 0 G\n",
            x, y, w, h
        ));
    }
}

fn layout(title: &str, generated_at: &str, headers: &[String], rows: &[Vec<String>]) -> Vec<Page> {
    let mut pages = vec![Page::new()];
    let mut y = PAGE_HEIGHT - MARGIN - TITLE_SIZE;
    {
        let page = &mut pages[0];
        page.text("F2", TITLE_SIZE, MARGIN, y, title);
        y -= BODY_SIZE * 2.0;
        page.text("F1", BODY_SIZE, MARGIN, y, &format!("Generated on: {}", generated_at));
        y -= BODY_SIZE * 2.0;
    }

    if headers.is_empty() {
        return pages;
    }

    let col_width = (PAGE_WIDTH - 2.0 * MARGIN) / headers.len() as f32;
    let max_chars = (((col_width - 2.0 * CELL_PADDING) / CHAR_WIDTH).floor() as usize).max(1);
    let wrap_row = |cells: &[String]| -> Vec<Vec<String>> {
        cells.iter().map(|c| wrap(c, max_chars)).collect()
    };
    let row_height = |wrapped: &[Vec<String>]| -> f32 {
        let lines = wrapped.iter().map(Vec::len).max().unwrap_or(1).max(1);
        lines as f32 * LINE_HEIGHT + 2.0 * CELL_PADDING
    };

    let header_cells = wrap_row(headers);
    let header_height = row_height(&header_cells);

    let draw_row = |page: &mut Page, y_top: f32, cells: &[Vec<String>], height: f32, header: bool| {
        if header {
            page.fill_rect(HEADER_FILL, MARGIN, y_top - height, PAGE_WIDTH - 2.0 * MARGIN, height);
            page.ops.push_str("1 1 1 rg\n");
        }
        for (i, lines) in cells.iter().enumerate() {
            let x = MARGIN + i as f32 * col_width;
            if !header {
                page.stroke_rect(x, y_top - height, col_width, height);
            }
            for (j, line) in lines.iter().enumerate() {
                let baseline = y_top - CELL_PADDING - CELL_SIZE - j as f32 * LINE_HEIGHT;
                let font = if header { "F2" } else { "F1" };
                page.text(font, CELL_SIZE, x + CELL_PADDING, baseline, line);
            }
        }
        if header {
            page.ops.push_str("0 0 0 rg\n");
        }
    };

    let lines_fitting = |space: f32| -> usize {
        ((space - 2.0 * CELL_PADDING) / LINE_HEIGHT).floor().max(0.0) as usize
    };
    // body lines a fresh page holds below the header
    let page_lines = lines_fitting(PAGE_HEIGHT - 2.0 * MARGIN - header_height).max(1);

    let last = pages.len() - 1;
    draw_row(&mut pages[last], y, &header_cells, header_height, true);
    y -= header_height;

    for row in rows {
        let cells = wrap_row(row);
        let total = cells.iter().map(Vec::len).max().unwrap_or(1).max(1);
        let mut start = 0;
        // Rows taller than a page continue on the next one under a repeated header.
        while start < total {
            let remaining = total - start;
            let mut room = lines_fitting(y - MARGIN);
            if room < remaining.min(page_lines) {
                pages.push(Page::new());
                y = PAGE_HEIGHT - MARGIN;
                let last = pages.len() - 1;
                draw_row(&mut pages[last], y, &header_cells, header_height, true);
                y -= header_height;
                room = page_lines;
            }
            let take = remaining.min(room);
            let chunk: Vec<Vec<String>> = cells
                .iter()
                .map(|lines| lines.iter().skip(start).take(take).cloned().collect())
                .collect();
            let height = row_height(&chunk);
            let last = pages.len() - 1;
            draw_row(&mut pages[last], y, &chunk, height, false);
            y -= height;
            start += take;
        }
    }

    pages
}

/// Greedy word wrap; words longer than a line are split.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                let rest = word.split_off(max_chars);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            let word: String = word.into_iter().collect();
            let needed = if current.is_empty() {
                word.chars().count()
            } else {
                current.chars().count() + 1 + word.chars().count()
            };
            if needed > max_chars && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        }
        lines.push(current);
    }
    lines
}

/// Escape for a PDF literal string in WinAnsi. Characters outside the
/// encoding become `?`.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            ' '..='~' => out.push(c),
            _ => match win_ansi(c) {
                Some(code) => out.push_str(&format!("\\{:03o}", code)),
                None => out.push('?'),
            },
        }
    }
    out
}

/// WinAnsiEncoding code for a non-ASCII char.
fn win_ansi(c: char) -> Option<u8> {
    let code = match c {
        '\u{a0}'..='\u{ff}' => c as u32 as u8,
        '\u{20ac}' => 0x80,
        '\u{201a}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201e}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02c6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8a,
        '\u{2039}' => 0x8b,
        '\u{0152}' => 0x8c,
        '\u{017d}' => 0x8e,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201c}' => 0x93,
        '\u{201d}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02dc}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9a,
        '\u{203a}' => 0x9b,
        '\u{0153}' => 0x9c,
        '\u{017e}' => 0x9e,
        '\u{0178}' => 0x9f,
        _ => return None,
    };
    Some(code)
}

fn assemble(pages: &[Page]) -> Vec<u8> {
    // 1 catalog, 2 page tree, 3-4 fonts, then a (page, content) pair per page
    let page_id = |i: usize| 5 + 2 * i;
    let kids: Vec<String> = (0..pages.len()).map(|i| format!("{} 0 R", page_id(i))).collect();

    let mut objects: Vec<Vec<u8>> = vec![
        b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        )
        .into_bytes(),
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_vec(),
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>"
            .to_vec(),
    ];

    for (i, page) in pages.iter().enumerate() {
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                 /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
                PAGE_WIDTH,
                PAGE_HEIGHT,
                page_id(i) + 1
            )
            .into_bytes(),
        );
        let mut content = format!("<< /Length {} >>\nstream\n", page.ops.len()).into_bytes();
        content.extend_from_slice(page.ops.as_bytes());
        content.extend_from_slice(b"endstream");
        objects.push(content);
    }

    let mut out: Vec<u8> = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
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
