//! Turns raw shader compiler output into learner-facing diagnostics.
//!
//! Compiler logs arrive in the glslang/WebGL shape the editor has always
//! shown (`ERROR: 0:12: 'foo' : undeclared identifier`). [`translate`] maps one
//! such line onto an [`ErrorKind`] with a localized title and hint; it never
//! fails, unknown messages land in [`ErrorKind::Unknown`].

mod locale;
mod table;

use serde::Serialize;

pub use locale::{Locale, UnknownLocale};
pub use table::ErrorKind;

/// Message used when the fragment stage is empty before the compiler runs.
pub const EMPTY_SHADER_MESSAGE: &str = "ERROR: empty shader: the fragment shader has no source";

/// A single compile failure explained for the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileDiagnostic {
    pub kind: ErrorKind,
    pub raw_message: String,
    /// 1-based line in the user's source; `None` when the compiler gave none.
    pub source_line: Option<u32>,
    pub title: String,
    pub hint: Option<String>,
}

impl CompileDiagnostic {
    /// The compiler text with its `ERROR: 0:12:` prefix removed.
    pub fn detail(&self) -> &str {
        strip_location(&self.raw_message)
    }
}

/// Translates one compiler message.
pub fn translate(raw_message: &str, locale: Locale) -> CompileDiagnostic {
    let kind = table::classify(raw_message);
    let text = table::localized(kind, locale);
    CompileDiagnostic {
        kind,
        raw_message: raw_message.trim().to_string(),
        source_line: source_line(raw_message),
        title: text.title.to_string(),
        hint: text.hint.map(str::to_string),
    }
}

/// Translates a multi-line compiler log, one diagnostic per error line.
///
/// Lines that do not start a new error (notes, context lines) are folded into
/// the preceding message. A log without any `ERROR:` marker still yields one
/// diagnostic so callers always have a headline.
pub fn translate_log(log: &str, locale: Locale) -> Vec<CompileDiagnostic> {
    let mut messages: Vec<String> = Vec::new();
    for line in log.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if starts_error(trimmed) || messages.is_empty() {
            messages.push(trimmed.to_string());
        } else if let Some(last) = messages.last_mut() {
            last.push(' ');
            last.push_str(trimmed);
        }
    }
    if messages.is_empty() {
        messages.push(log.trim().to_string());
    }
    messages
        .iter()
        .map(|message| translate(message, locale))
        .collect()
}

/// The headline diagnostic of a compile attempt.
pub fn primary(diagnostics: &[CompileDiagnostic]) -> Option<&CompileDiagnostic> {
    diagnostics
        .iter()
        .find(|diagnostic| diagnostic.kind != ErrorKind::Unknown)
        .or_else(|| diagnostics.first())
}

fn starts_error(line: &str) -> bool {
    let lowered = line.to_ascii_lowercase();
    lowered.starts_with("error:") || lowered.contains(": error:")
}

/// Extracts the line from `ERROR: <string>:<line>: ...` or `<file>:<line>: error: ...`.
fn source_line(message: &str) -> Option<u32> {
    let trimmed = message.trim();
    let lowered = trimmed.to_ascii_lowercase();
    let line = if lowered.starts_with("error:") {
        let rest = trimmed["error:".len()..].trim_start();
        let mut parts = rest.splitn(3, ':');
        let _string_index: u32 = parts.next()?.trim().parse().ok()?;
        parts.next()?.trim().parse::<u32>().ok()?
    } else {
        let marker = lowered.find(": error:")?;
        let location = &trimmed[..marker];
        location.rsplit(':').next()?.trim().parse::<u32>().ok()?
    };
    // glslang reports file-scope problems on line 0.
    (line > 0).then_some(line)
}

fn strip_location(message: &str) -> &str {
    let trimmed = message.trim();
    if trimmed
        .get(.."error:".len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("error:"))
    {
        let rest = trimmed["error:".len()..].trim_start();
        let mut remainder = rest;
        for _ in 0..2 {
            match remainder.split_once(':') {
                Some((head, tail)) if head.trim().chars().all(|ch| ch.is_ascii_digit()) => {
                    remainder = tail;
                }
                _ => break,
            }
        }
        return remainder.trim();
    }
    trimmed
}
