//! Recovers positioned text runs from a page content stream.
//!
//! Only the operators that move the text origin or show text are interpreted.
//! Glyph widths are not read from font programs; each glyph advances by
//! [`GLYPH_WIDTH_EM`] of the font size, which is enough to place runs on the
//! page and to order them.

use crate::{PageSize, TextFragment};
use lopdf::content::Operation;
use lopdf::Object;

pub(crate) const GLYPH_WIDTH_EM: f64 = 0.5;

const ASCENT_EM: f64 = 0.8;
const DESCENT_EM: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
}

impl Matrix {
    const IDENTITY: Matrix = Matrix { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 };

    fn translate(tx: f64, ty: f64) -> Self {
        Self { e: tx, f: ty, ..Self::IDENTITY }
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        let values: Vec<f64> = operands.iter().map(number).collect::<Option<_>>()?;
        let [a, b, c, d, e, f] = values.as_slice() else {
            return None;
        };
        Some(Self { a: *a, b: *b, c: *c, d: *d, e: *e, f: *f })
    }

    /// `self × other` in PDF's row-vector convention.
    fn then(self, other: Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }

    fn x_scale(&self) -> f64 {
        self.a.hypot(self.b)
    }

    fn y_scale(&self) -> f64 {
        self.c.hypot(self.d)
    }
}

/// One text-showing operation placed in user space (bottom-left origin).
#[derive(Debug, Clone, PartialEq)]
struct TextRun {
    text: String,
    x: f64,
    baseline: f64,
    width: f64,
    size: f64,
}

impl TextRun {
    fn right(&self) -> f64 {
        self.x + self.width
    }
}

#[derive(Debug)]
struct TextState {
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    font_size: f64,
    leading: f64,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            ctm_stack: Vec::new(),
            tm: Matrix::IDENTITY,
            tlm: Matrix::IDENTITY,
            font_size: 12.0,
            leading: 0.0,
        }
    }
}

impl TextState {
    fn move_line(&mut self, tx: f64, ty: f64) {
        self.tlm = Matrix::translate(tx, ty).then(self.tlm);
        self.tm = self.tlm;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    fn advance(&mut self, text_space_width: f64) {
        self.tm = Matrix::translate(text_space_width, 0.0).then(self.tm);
    }

    fn show(&mut self, bytes: &[u8], runs: &mut Vec<TextRun>) {
        let text = decode_pdf_string(bytes);
        let glyphs = text.chars().count() as f64;
        let text_space_width = glyphs * self.font_size * GLYPH_WIDTH_EM;

        let trm = self.tm.then(self.ctm);
        let (x, baseline) = trm.apply(0.0, 0.0);
        let run = TextRun {
            text,
            x,
            baseline,
            width: text_space_width * trm.x_scale(),
            size: self.font_size * trm.y_scale(),
        };
        if !run.text.trim().is_empty() {
            runs.push(run);
        }

        self.advance(text_space_width);
    }

    fn kern(&mut self, thousandths: f64) {
        self.advance(-thousandths / 1000.0 * self.font_size);
    }
}

/// Lays out every text run and image placement in `operations`, merging runs
/// that share a baseline into line fragments.
pub(crate) fn layout_fragments(operations: &[Operation], page: PageSize) -> Vec<TextFragment> {
    let mut state = TextState::default();
    let mut runs = Vec::new();
    let mut fragments = Vec::new();

    for operation in operations {
        let operands = operation.operands.as_slice();
        match operation.operator.as_str() {
            "q" => state.ctm_stack.push(state.ctm),
            "Q" => {
                if let Some(ctm) = state.ctm_stack.pop() {
                    state.ctm = ctm;
                }
            }
            "cm" => {
                if let Some(matrix) = Matrix::from_operands(operands) {
                    state.ctm = matrix.then(state.ctm);
                }
            }
            "BT" => {
                state.tm = Matrix::IDENTITY;
                state.tlm = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    state.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    state.leading = leading;
                }
            }
            "Td" | "TD" => {
                if let [tx, ty] = operands {
                    if let (Some(tx), Some(ty)) = (number(tx), number(ty)) {
                        if operation.operator == "TD" {
                            state.leading = -ty;
                        }
                        state.move_line(tx, ty);
                    }
                }
            }
            "Tm" => {
                if let Some(matrix) = Matrix::from_operands(operands) {
                    state.tm = matrix;
                    state.tlm = matrix;
                }
            }
            "T*" => state.next_line(),
            "Tj" => {
                if let Some(bytes) = operands.first().and_then(string_bytes) {
                    state.show(bytes, &mut runs);
                }
            }
            "'" => {
                state.next_line();
                if let Some(bytes) = operands.first().and_then(string_bytes) {
                    state.show(bytes, &mut runs);
                }
            }
            "\"" => {
                state.next_line();
                if let Some(bytes) = operands.get(2).and_then(string_bytes) {
                    state.show(bytes, &mut runs);
                }
            }
            "TJ" => {
                let Some(Object::Array(items)) = operands.first() else {
                    continue;
                };
                for item in items {
                    match item {
                        Object::String(bytes, _) => state.show(bytes, &mut runs),
                        other => {
                            if let Some(adjustment) = number(other) {
                                state.kern(adjustment);
                            }
                        }
                    }
                }
            }
            "Do" => fragments.push(placed_object(&state.ctm, page)),
            _ => {}
        }
    }

    let mut lines =
        merge_lines(runs).into_iter().map(|run| line_fragment(run, page)).collect::<Vec<_>>();
    lines.append(&mut fragments);
    lines
}

fn merge_lines(runs: Vec<TextRun>) -> Vec<TextRun> {
    let mut lines: Vec<TextRun> = Vec::new();

    for run in runs {
        if let Some(line) = lines.last_mut() {
            let size = line.size.max(run.size).max(1.0);
            let same_baseline = (line.baseline - run.baseline).abs() <= size * 0.3;
            let gap = run.x - line.right();
            if same_baseline && gap >= -size * 0.5 && gap <= size * 1.5 {
                let needs_space = gap > size * 0.2
                    && !line.text.ends_with(char::is_whitespace)
                    && !run.text.starts_with(char::is_whitespace);
                if needs_space {
                    line.text.push(' ');
                }
                line.text.push_str(&run.text);
                line.width = run.right().max(line.right()) - line.x;
                line.size = size;
                continue;
            }
        }
        lines.push(run);
    }

    lines
}

fn line_fragment(run: TextRun, page: PageSize) -> TextFragment {
    let top = run.baseline + run.size * ASCENT_EM;
    let bottom = run.baseline - run.size * DESCENT_EM;
    TextFragment {
        x0: run.x,
        y0: page.height_pt - top,
        x1: run.right(),
        y1: page.height_pt - bottom,
        text: run.text,
        is_text_block: true,
    }
}

/// An XObject painted through the unit square mapped by the current CTM.
fn placed_object(ctm: &Matrix, page: PageSize) -> TextFragment {
    let corners =
        [ctm.apply(0.0, 0.0), ctm.apply(1.0, 0.0), ctm.apply(0.0, 1.0), ctm.apply(1.0, 1.0)];
    let min_x = corners.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_x = corners.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = corners.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = corners.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

    TextFragment {
        text: String::new(),
        x0: min_x,
        y0: page.height_pt - max_y,
        x1: max_x,
        y1: page.height_pt - min_y,
        is_text_block: false,
    }
}

fn number(object: &Object) -> Option<f64> {
    object.as_float().ok().map(f64::from)
}

fn string_bytes(object: &Object) -> Option<&[u8]> {
    match object {
        Object::String(bytes, _) => Some(bytes.as_slice()),
        _ => None,
    }
}

/// UTF-16BE when the string carries a byte-order mark, otherwise one
/// character per byte.
pub(crate) fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units = utf16.chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
        return char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
    }

    bytes.iter().map(|&byte| char::from(byte)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::StringFormat;

    fn op(operator: &str, operands: Vec<Object>) -> Operation {
        Operation::new(operator, operands)
    }

    fn text(value: &str) -> Object {
        Object::String(value.as_bytes().to_vec(), StringFormat::Literal)
    }

    #[test]
    fn td_and_tj_place_a_single_line() {
        let ops = vec![
            op("BT", vec![]),
            op("Tf", vec![Object::Name(b"F1".to_vec()), 10.into()]),
            op("Td", vec![72.into(), 700.into()]),
            op("Tj", vec![text("Hello")]),
            op("ET", vec![]),
        ];

        let fragments = layout_fragments(&ops, PageSize::LETTER);
        assert_eq!(fragments.len(), 1);
        let line = &fragments[0];
        assert_eq!(line.text, "Hello");
        assert_eq!(line.x0, 72.0);
        assert_eq!(line.x1, 72.0 + 5.0 * 10.0 * GLYPH_WIDTH_EM);
        assert_eq!(line.y0, 792.0 - 708.0);
        assert_eq!(line.y1, 792.0 - 698.0);
        assert!(line.is_text_block);
    }

    #[test]
    fn adjacent_runs_on_a_baseline_merge_with_spacing() {
        let ops = vec![
            op("BT", vec![]),
            op("Tf", vec![Object::Name(b"F1".to_vec()), 10.into()]),
            op("Td", vec![100.into(), 500.into()]),
            op(
                "TJ",
                vec![Object::Array(vec![text("Board"), Object::Integer(-400), text("meets")])],
            ),
            op("ET", vec![]),
        ];

        let fragments = layout_fragments(&ops, PageSize::LETTER);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].text, "Board meets");
    }

    #[test]
    fn leading_operators_start_new_lines() {
        let ops = vec![
            op("BT", vec![]),
            op("Tf", vec![Object::Name(b"F1".to_vec()), 10.into()]),
            op("TL", vec![12.into()]),
            op("Td", vec![50.into(), 600.into()]),
            op("Tj", vec![text("first")]),
            op("'", vec![text("second")]),
            op("T*", vec![]),
            op("Tj", vec![text("third")]),
            op("ET", vec![]),
        ];

        let fragments = layout_fragments(&ops, PageSize::LETTER);
        let texts: Vec<&str> = fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_eq!(fragments[1].y0 - fragments[0].y0, 12.0);
        assert_eq!(fragments[2].x0, 50.0);
    }

    #[test]
    fn cm_scales_and_moves_text_and_images() {
        let ops = vec![
            op("q", vec![]),
            op("cm", vec![2.into(), 0.into(), 0.into(), 2.into(), 10.into(), 20.into()]),
            op("BT", vec![]),
            op("Tf", vec![Object::Name(b"F1".to_vec()), 10.into()]),
            op("Tj", vec![text("Big")]),
            op("ET", vec![]),
            op("Q", vec![]),
            op("q", vec![]),
            op("cm", vec![100.into(), 0.into(), 0.into(), 50.into(), 300.into(), 400.into()]),
            op("Do", vec![Object::Name(b"Im0".to_vec())]),
            op("Q", vec![]),
        ];

        let fragments = layout_fragments(&ops, PageSize::LETTER);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].x0, 10.0);
        assert_eq!(fragments[0].y1 - fragments[0].y0, 20.0);

        let image = &fragments[1];
        assert!(!image.is_text_block);
        assert_eq!((image.x0, image.x1), (300.0, 400.0));
        assert_eq!((image.y0, image.y1), (792.0 - 450.0, 792.0 - 400.0));
    }

    #[test]
    fn utf16_strings_are_decoded() {
        let bytes = [0xFE, 0xFF, 0x00, 0x48, 0x00, 0xE9];
        assert_eq!(decode_pdf_string(&bytes), "Hé");
        assert_eq!(decode_pdf_string(b"caf\xe9"), "café");
    }
}
