//! Log sanitization for patient identifiers.
//!
//! Cohort records carry an `identificacion` number, and request payloads may
//! carry contact details. Formatted log lines pass through
//! [`SanitizingMakeWriter`], which redacts:
//! - `identificacion=...` / `"identificacion": ...` pairs
//! - bare 7-10 digit identification numbers
//! - UUIDs
//! - e-mail addresses
//! - phone numbers written with separators or a country prefix
//!
//! Input is capped at `GLYCO_SANITIZE_MAX_BYTES` (16 KiB by default) per call.

use regex::{Regex, RegexSet};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

const DEFAULT_SANITIZE_MAX_BYTES: usize = 16 * 1024;

struct Rule {
    regex: Regex,
    replacement: &'static str,
}

struct Patterns {
    set: RegexSet,
    rules: Vec<Rule>,
}

fn truncate_to_char_boundary(input: &str, max_bytes: usize) -> (&str, bool) {
    if input.len() <= max_bytes {
        return (input, false);
    }
    let mut end = max_bytes.min(input.len());
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    (&input[..end], true)
}

fn max_sanitize_bytes() -> usize {
    std::env::var("GLYCO_SANITIZE_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_SANITIZE_MAX_BYTES)
}

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| {
        // Applied in order: the keyed identifier and phone rules run before the
        // bare digit rule so their replacements carry the more specific tag.
        let rules: Vec<(&'static str, &'static str)> = vec![
            (
                r#"(?i)"?identificacion"?\s*[:=]\s*"?\d+"?"#,
                "identificacion=[REDACTED-ID]",
            ),
            (
                r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
                "[REDACTED-UUID]",
            ),
            (
                r"(?i)\b[a-z0-9](?:[a-z0-9._%+-]{0,62}[a-z0-9])?@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b",
                "[REDACTED-EMAIL]",
            ),
            (
                r"\+\d{1,3}[\s.-]?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b",
                "[REDACTED-PHONE]",
            ),
            (
                r"\b\(?\d{3}\)?[\s.-]\d{3}[\s.-]\d{4}\b",
                "[REDACTED-PHONE]",
            ),
            (r"\b\d{7,10}\b", "[REDACTED-ID]"),
        ];

        let set = RegexSet::new(rules.iter().map(|(p, _)| *p)).expect("valid regex set");
        let rules = rules
            .into_iter()
            .map(|(pattern, replacement)| Rule {
                regex: Regex::new(pattern).expect("valid regex"),
                replacement,
            })
            .collect();
        Patterns { set, rules }
    })
}

/// Redact identifiers from `input`.
#[must_use]
pub fn sanitize(input: &str) -> String {
    sanitize_with_limit(input, max_sanitize_bytes())
}

fn sanitize_with_limit(input: &str, max_bytes: usize) -> String {
    let patterns = patterns();
    let (prefix, truncated) = truncate_to_char_boundary(input, max_bytes);

    let mut result = prefix.to_string();
    if patterns.set.is_match(prefix) {
        // Re-check each rule against the current text: an earlier replacement
        // may already have consumed what a later rule matched.
        for rule in &patterns.rules {
            if rule.regex.is_match(&result) {
                result = rule.regex.replace_all(&result, rule.replacement).into_owned();
            }
        }
    }

    if truncated {
        result.push_str(" [TRUNCATED]");
    }
    result
}

/// Whether `input` contains anything [`sanitize`] would redact.
#[must_use]
pub fn contains_pii(input: &str) -> bool {
    let (prefix, _) = truncate_to_char_boundary(input, max_sanitize_bytes());
    patterns().set.is_match(prefix)
}

/// A `tracing_subscriber` writer wrapper that sanitizes each formatted line
/// before it reaches the underlying sink.
#[derive(Debug, Clone)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
}

impl<M> SanitizingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

pub struct SanitizingWriter<W> {
    inner: W,
    buffer: Vec<u8>,
}

impl<W> SanitizingWriter<W>
where
    W: std::io::Write,
{
    fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    fn flush_lines(&mut self) -> std::io::Result<()> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let sanitized = sanitize(&String::from_utf8_lossy(&line));
            self.inner.write_all(sanitized.as_bytes())?;
        }
        Ok(())
    }
}

impl<W> std::io::Write for SanitizingWriter<W>
where
    W: std::io::Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);

        // A formatter that never emits a newline must not grow the buffer forever.
        let hard_cap = max_sanitize_bytes().saturating_mul(2);
        if self.buffer.len() > hard_cap {
            let sanitized = sanitize(&String::from_utf8_lossy(&self.buffer));
            self.inner.write_all(sanitized.as_bytes())?;
            self.inner.write_all(b"\n")?;
            self.buffer.clear();
            return Ok(buf.len());
        }

        self.flush_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_lines()?;
        if !self.buffer.is_empty() {
            let sanitized = sanitize(&String::from_utf8_lossy(&self.buffer));
            self.inner.write_all(sanitized.as_bytes())?;
            self.buffer.clear();
        }
        self.inner.flush()
    }
}

impl<'a, M> MakeWriter<'a> for SanitizingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter::new(self.inner.make_writer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sanitize_identificacion_pair() {
        let sanitized = sanitize(r#"record {"identificacion": 1000042, "edad": 55}"#);
        assert!(sanitized.contains("identificacion=[REDACTED-ID]"));
        assert!(!sanitized.contains("1000042"));
        assert!(sanitized.contains("\"edad\": 55"));
    }

    #[test]
    fn test_sanitize_bare_id_number() {
        let sanitized = sanitize("patient 1023456789 predicted 131.2 mg/dL");
        assert_eq!(sanitized, "patient [REDACTED-ID] predicted 131.2 mg/dL");
    }

    #[test]
    fn test_clinical_values_survive() {
        let line = "edad=55 imc=28.5 tas=135 glucose=118.42 n_samples=1000";
        assert_eq!(sanitize(line), line);
        assert!(!contains_pii(line));
    }

    #[test]
    fn test_sanitize_uuid_and_email() {
        let sanitized =
            sanitize("run 550e8400-e29b-41d4-a716-446655440000 by ana.perez@clinica.org");
        assert!(sanitized.contains("[REDACTED-UUID]"));
        assert!(sanitized.contains("[REDACTED-EMAIL]"));
        assert!(!sanitized.contains("clinica.org"));
    }

    #[test]
    fn test_sanitize_phone() {
        assert!(sanitize("tel +57 310 555 1234").contains("[REDACTED-PHONE]"));
        assert!(sanitize("tel (604) 555-1234").contains("[REDACTED-PHONE]"));
    }

    #[test]
    fn test_truncates_large_inputs() {
        let sanitized = sanitize_with_limit("prefix 1234567 suffix", 10);
        assert!(sanitized.ends_with("[TRUNCATED]"));
        assert!(!sanitized.contains("1234567"));
    }

    #[test]
    fn test_writer_sanitizes_lines() {
        let mut out = Vec::new();
        {
            let mut writer = SanitizingWriter::new(&mut out);
            writer.write_all(b"id 12345678\npartial ").expect("write");
            writer.write_all(b"99887766").expect("write");
            writer.flush().expect("flush");
        }
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text, "id [REDACTED-ID]\npartial [REDACTED-ID]");
    }
}
