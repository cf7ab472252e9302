//! Heuristics that decide whether native-layer text can be trusted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Fewer trimmed characters than this is too short to trust.
    pub min_chars: usize,
    /// Minimum share of letters, digits and whitespace.
    pub min_clean_ratio: f64,
    /// Maximum share of tokens that are stray single letters.
    pub max_isolated_ratio: f64,
    /// Single-letter words that are never counted as stray.
    pub single_letter_words: Vec<String>,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_chars: 40,
            min_clean_ratio: 0.70,
            max_isolated_ratio: 0.40,
            single_letter_words: vec!["A".to_owned(), "a".to_owned(), "I".to_owned()],
        }
    }
}

impl QualityThresholds {
    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }

    pub fn with_min_clean_ratio(mut self, ratio: f64) -> Self {
        self.min_clean_ratio = ratio;
        self
    }

    pub fn with_max_isolated_ratio(mut self, ratio: f64) -> Self {
        self.max_isolated_ratio = ratio;
        self
    }

    pub fn with_single_letter_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.single_letter_words = words.into_iter().map(Into::into).collect();
        self
    }

    fn is_allowed_single_letter(&self, token: &str) -> bool {
        self.single_letter_words.iter().any(|word| word == token)
    }
}

/// The ratios both the classifier and the score are computed from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStats {
    pub char_count: usize,
    pub clean_ratio: f64,
    pub isolated_ratio: f64,
}

impl TextStats {
    pub fn measure(text: &str, thresholds: &QualityThresholds) -> Self {
        let trimmed = text.trim();
        let char_count = trimmed.chars().count();
        let clean = trimmed.chars().filter(|c| c.is_alphanumeric() || c.is_whitespace()).count();

        let mut tokens = 0usize;
        let mut isolated = 0usize;
        for token in trimmed.split_whitespace() {
            tokens += 1;
            if is_single_letter(token) && !thresholds.is_allowed_single_letter(token) {
                isolated += 1;
            }
        }

        Self {
            char_count,
            clean_ratio: ratio(clean, char_count),
            isolated_ratio: ratio(isolated, tokens),
        }
    }
}

fn is_single_letter(token: &str) -> bool {
    let mut chars = token.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_alphabetic())
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Whether `text` should be replaced by optical recognition output.
///
/// Checks run cheapest first: length, then character mix, then stray
/// single letters.
pub fn should_fallback_to_ocr(text: &str, thresholds: &QualityThresholds) -> bool {
    if text.trim().chars().count() < thresholds.min_chars {
        return true;
    }

    let stats = TextStats::measure(text, thresholds);
    if stats.clean_ratio < thresholds.min_clean_ratio {
        return true;
    }

    stats.isolated_ratio > thresholds.max_isolated_ratio
}

/// Confidence in `text` between 0 and 1; 1.0 means every check passed with
/// margin. Empty text scores 0.
pub fn quality_score(text: &str, thresholds: &QualityThresholds) -> f64 {
    let stats = TextStats::measure(text, thresholds);
    if stats.char_count == 0 {
        return 0.0;
    }

    let mut score = 1.0;

    let comfortable_chars = thresholds.min_chars as f64 * 2.5;
    if stats.char_count < thresholds.min_chars {
        score *= 0.3;
    } else if (stats.char_count as f64) < comfortable_chars {
        score *= 0.6;
    }

    if stats.clean_ratio < thresholds.min_clean_ratio - 0.2 {
        score *= 0.3;
    } else if stats.clean_ratio < thresholds.min_clean_ratio {
        score *= 0.6;
    } else if stats.clean_ratio < thresholds.min_clean_ratio + 0.15 {
        score *= 0.9;
    }

    if stats.isolated_ratio > thresholds.max_isolated_ratio {
        score *= 0.4;
    } else if stats.isolated_ratio > thresholds.max_isolated_ratio / 2.0 {
        score *= 0.7;
    }

    f64::clamp(score, 0.0, 1.0)
}
