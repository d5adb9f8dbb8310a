//! Structured slide content and its natural block layout, drawn with the registered
//! embedded font.

use crate::canvas::{Canvas, Command, FontKey};
use crate::font::{RegisteredFonts, measure_text_width};
use crate::geometry::PageGeometry;
use crate::types::{Color, Pt};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlideContent {
    pub title: String,
    pub subtitle: Option<String>,
    pub sections: Vec<Section>,
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Section {
    pub heading: Option<String>,
    pub paragraphs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Table {
    pub caption: Option<String>,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy)]
enum Weight {
    Regular,
    Bold,
}

#[derive(Debug, Clone, Copy)]
struct TextStyle {
    weight: Weight,
    size: f32,
    color: Color,
    space_after: f32,
}

const TITLE: TextStyle = TextStyle {
    weight: Weight::Bold,
    size: 28.0,
    color: Color::BLACK,
    space_after: 6.0,
};
const SUBTITLE: TextStyle = TextStyle {
    weight: Weight::Regular,
    size: 16.0,
    color: Color {
        r: 0.35,
        g: 0.35,
        b: 0.35,
    },
    space_after: 14.0,
};
const HEADING: TextStyle = TextStyle {
    weight: Weight::Bold,
    size: 18.0,
    color: Color::BLACK,
    space_after: 6.0,
};
const BODY: TextStyle = TextStyle {
    weight: Weight::Regular,
    size: 12.0,
    color: Color::BLACK,
    space_after: 8.0,
};
const CAPTION: TextStyle = TextStyle {
    weight: Weight::Regular,
    size: 10.0,
    color: Color {
        r: 0.35,
        g: 0.35,
        b: 0.35,
    },
    space_after: 4.0,
};
const CELL_SIZE: f32 = 11.0;
const CELL_PADDING: f32 = 4.0;
const LINE_HEIGHT: f32 = 1.35;
const HEADER_FILL: Color = Color {
    r: 0.9,
    g: 0.9,
    b: 0.9,
};
const GRID: Color = Color {
    r: 0.6,
    g: 0.6,
    b: 0.6,
};

/// A slide laid out at its natural size.
#[derive(Debug, Clone)]
pub struct BlockLayout {
    pub commands: Vec<Command>,
    pub width: Pt,
    pub height: Pt,
}

/// Lays out `content` top to bottom in a column `width` points wide.
pub fn layout_slide(content: &SlideContent, fonts: &RegisteredFonts, width: Pt) -> BlockLayout {
    let mut layout = Layout {
        canvas: Canvas::new(PageGeometry::default()),
        fonts,
        width,
        cursor: Pt::ZERO,
    };
    if !content.title.trim().is_empty() {
        layout.text_block(&content.title, TITLE);
    }
    if let Some(subtitle) = content.subtitle.as_deref() {
        layout.text_block(subtitle, SUBTITLE);
    }
    for section in &content.sections {
        if let Some(heading) = section.heading.as_deref() {
            layout.text_block(heading, HEADING);
        }
        for paragraph in &section.paragraphs {
            layout.text_block(paragraph, BODY);
        }
    }
    for table in &content.tables {
        layout.table(table);
    }
    let height = layout.cursor;
    BlockLayout {
        commands: layout.canvas.take_current(),
        width,
        height,
    }
}

struct Layout<'a> {
    canvas: Canvas,
    fonts: &'a RegisteredFonts,
    width: Pt,
    cursor: Pt,
}

impl Layout<'_> {
    fn key(&self, weight: Weight) -> FontKey {
        match weight {
            Weight::Regular => FontKey::EmbeddedRegular,
            Weight::Bold => self.fonts.bold_key(),
        }
    }

    fn ascent(&self, key: FontKey, size: Pt) -> Pt {
        let ascent = self
            .fonts
            .face(key)
            .map(|face| i32::from(face.metrics.ascent))
            .unwrap_or(800);
        size.mul_ratio(ascent.clamp(0, 1000), 1000)
    }

    fn text_block(&mut self, text: &str, style: TextStyle) {
        let key = self.key(style.weight);
        let size = Pt::from_f32(style.size);
        let line_height = size * LINE_HEIGHT;
        let lines = wrap_text(Some(self.fonts), key, size, text, self.width);
        if lines.is_empty() {
            return;
        }
        let ascent = self.ascent(key, size);
        self.canvas.set_font(key, size);
        self.canvas.set_fill_color(style.color);
        for line in lines {
            self.canvas.draw_string(Pt::ZERO, self.cursor + ascent, line);
            self.cursor += line_height;
        }
        self.cursor += Pt::from_f32(style.space_after);
    }

    fn table(&mut self, table: &Table) {
        let columns = table
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(table.header.len()))
            .max()
            .unwrap_or(0);
        if columns == 0 {
            return;
        }
        if let Some(caption) = table.caption.as_deref() {
            self.text_block(caption, CAPTION);
        }

        let column_width = self.width / (columns as i32);
        let padding = Pt::from_f32(CELL_PADDING);
        let size = Pt::from_f32(CELL_SIZE);
        let line_height = size * LINE_HEIGHT;
        self.canvas.set_line_width(Pt::from_f32(0.5));
        self.canvas.set_stroke_color(GRID);

        let header = (!table.header.is_empty()).then_some(&table.header);
        for (row, is_header) in header
            .into_iter()
            .map(|row| (row, true))
            .chain(table.rows.iter().map(|row| (row, false)))
        {
            let key = if is_header {
                self.key(Weight::Bold)
            } else {
                self.key(Weight::Regular)
            };
            let cells: Vec<Vec<String>> = (0..columns)
                .map(|col| {
                    let text = row.get(col).map(String::as_str).unwrap_or("");
                    wrap_text(
                        Some(self.fonts),
                        key,
                        size,
                        text,
                        column_width - padding * 2,
                    )
                })
                .collect();
            let max_lines = cells.iter().map(Vec::len).max().unwrap_or(0).max(1);
            let row_height = line_height * (max_lines as i32) + padding * 2;

            if is_header {
                self.canvas.set_fill_color(HEADER_FILL);
                self.canvas
                    .draw_rect(Pt::ZERO, self.cursor, self.width, row_height);
            }
            let ascent = self.ascent(key, size);
            self.canvas.set_font(key, size);
            self.canvas.set_fill_color(Color::BLACK);
            for (col, lines) in cells.into_iter().enumerate() {
                let x = column_width * (col as i32);
                self.canvas
                    .stroke_rect(x, self.cursor, column_width, row_height);
                let mut baseline = self.cursor + padding + ascent;
                for line in lines {
                    self.canvas.draw_string(x + padding, baseline, line);
                    baseline += line_height;
                }
            }
            self.cursor += row_height;
        }
        self.cursor += Pt::from_f32(BODY.space_after);
    }
}

/// Greedy line breaking on whitespace. Words wider than the line (including unspaced
/// CJK runs) break between characters.
pub fn wrap_text(
    fonts: Option<&RegisteredFonts>,
    key: FontKey,
    size: Pt,
    text: &str,
    max_width: Pt,
) -> Vec<String> {
    let measure = |s: &str| measure_text_width(fonts, key, size, s);
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{line} {word}")
            };
            if measure(&candidate) <= max_width {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if measure(word) <= max_width {
                line = word.to_string();
                continue;
            }
            for ch in word.chars() {
                line.push(ch);
                if measure(&line) > max_width && line.chars().count() > 1 {
                    line.pop();
                    lines.push(std::mem::take(&mut line));
                    line.push(ch);
                }
            }
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}
