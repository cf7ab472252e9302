use pdf_engine::TextFragment;

/// Row bucket height in document units.
pub const ROW_TOLERANCE: f64 = 5.0;

/// Joins the text fragments of a clipped region in reading order.
///
/// Fragments are bucketed into rows by `round(y0 / tolerance) * tolerance`,
/// rows run top to bottom and fragments left to right within a row. The
/// sort is stable, so fragments with equal keys keep their input order.
/// Non-text fragments are ignored.
pub fn sort_blocks(fragments: &[TextFragment], tolerance: f64) -> String {
    let mut keyed: Vec<(f64, f64, &str)> = fragments
        .iter()
        .filter(|fragment| fragment.is_text_block)
        .map(|fragment| (row_key(fragment.y0, tolerance), fragment.x0, fragment.text.as_str()))
        .collect();

    keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    keyed.iter().map(|(_, _, text)| *text).collect::<Vec<_>>().join("\n")
}

fn row_key(y0: f64, tolerance: f64) -> f64 {
    if tolerance > 0.0 {
        (y0 / tolerance).round() * tolerance
    } else {
        y0
    }
}
