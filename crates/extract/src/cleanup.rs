//! Deterministic text cleanup applied to assembled article text.
//!
//! `cleanup(cleanup(x)) == cleanup(x)` holds for every input.

const TERMINAL_PUNCTUATION: [char; 5] = ['.', '!', '?', ':', '"'];

pub fn cleanup(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed = normalized
        .split('\n')
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n");

    let dehyphenated = join_hyphen_breaks(&collapsed);
    let joined = join_paragraph_lines(&dehyphenated);
    collapse_blank_lines(&joined).trim().to_owned()
}

/// Removes `-\n` when it sits between two letters.
fn join_hyphen_breaks(text: &str) -> String {
    let mut out: Vec<char> = Vec::with_capacity(text.len());
    for c in text.chars() {
        out.push(c);
        if let [.., before, '-', '\n', after] = out.as_slice() {
            if before.is_alphabetic() && after.is_alphabetic() {
                let after = *after;
                out.truncate(out.len() - 3);
                out.push(after);
            }
        }
    }
    out.into_iter().collect()
}

/// Joins a line onto the previous one when the previous line does not end a
/// sentence and the next begins in lowercase.
fn join_paragraph_lines(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.split('\n') {
        if let Some(previous) = lines.last_mut() {
            let continues = previous
                .chars()
                .last()
                .is_some_and(|last| !TERMINAL_PUNCTUATION.contains(&last));
            let starts_lowercase = line.chars().next().is_some_and(char::is_lowercase);
            if continues && starts_lowercase {
                previous.push(' ');
                previous.push_str(line);
                continue;
            }
        }
        lines.push(line.to_owned());
    }
    lines.join("\n")
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        out.push(c);
    }
    out
}
