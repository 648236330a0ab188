//! Response matching over accumulated modem lines
//!
//! Modems write replies in arbitrary chunks, so one logical line can arrive
//! as several physical ones. A template is matched at a line index by its
//! literal prefix (the text before the first placeholder). When the line at
//! that index is itself a prefix of the template, following lines are
//! appended until the joined text matches or stops being a prefix.

use serde::{Deserialize, Serialize};

use crate::driver::DriverProfile;
use crate::error::ModemErrorKind;
use crate::template;

/// Split a raw chunk into trimmed, non-empty lines
pub fn clean_lines(chunk: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(chunk)
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Split a captured value into comma-separated fields, honoring quotes
pub fn tokenize(value: &str) -> Vec<String> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in value.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => tokens.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    tokens.push(current.trim().to_string());
    tokens
}

fn quotes_balanced(text: &str) -> bool {
    text.chars().filter(|&c| c == '"').count() % 2 == 0
}

/// A response template compiled for matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Template id (`RESPONSE_*`)
    pub id: String,
    /// Literal prefix identifying the line
    pub prefix: String,
    /// Whether the template captures a value after the prefix
    pub has_value: bool,
}

impl Template {
    /// Compile a template string
    pub fn new(id: impl Into<String>, pattern: &str) -> Self {
        let expanded = template::expand_escapes(pattern);
        let prefix = template::literal_prefix(&expanded).trim().to_string();
        Self {
            id: id.into(),
            has_value: expanded.len() > prefix.len() && expanded.contains('%'),
            prefix,
        }
    }

    /// Compile the driver's template for `id`, if it has one
    pub fn from_driver(driver: &DriverProfile, id: &str) -> Option<Self> {
        driver
            .get(id)
            .map(|pattern| Self::new(id, pattern))
            .filter(|t| !t.prefix.is_empty())
    }

    /// Match at line `at`
    ///
    /// `join` enables continuation across lines while the captured value has
    /// an unbalanced quote; continuation lines are appended with `join` in
    /// between.
    pub fn match_at(&self, lines: &[String], at: usize, join: Option<&str>) -> Option<Capture> {
        let mut end = at;
        let mut text = lines.get(at)?.clone();

        if !text.starts_with(&self.prefix) {
            if !(self.prefix.len() > text.len() && self.prefix.starts_with(text.as_str())) {
                return None;
            }
            loop {
                end += 1;
                text.push_str(lines.get(end)?);
                if text.starts_with(&self.prefix) {
                    break;
                }
                if !self.prefix.starts_with(text.as_str()) {
                    return None;
                }
            }
        }

        let rest = &text[self.prefix.len()..];
        if !self.has_value && rest.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            // A bare literal covers the whole word: `OK` is not `OKAY`
            return None;
        }
        let mut value = rest.trim().to_string();
        if self.has_value && value.is_empty() {
            // Header split right after the prefix
            if let Some(next) = lines.get(end + 1) {
                end += 1;
                value = next.clone();
            }
        }
        if let Some(sep) = join {
            while !quotes_balanced(&value) {
                end += 1;
                value.push_str(sep);
                value.push_str(lines.get(end)?);
            }
        }

        Some(Capture {
            id: self.id.clone(),
            start: at,
            end,
            tokens: tokenize(&value),
            value,
        })
    }
}

/// A template matched against a run of lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Template id
    pub id: String,
    /// First line index covered
    pub start: usize,
    /// Last line index covered (inclusive)
    pub end: usize,
    /// Raw text after the prefix
    pub value: String,
    /// Comma-separated fields of `value`
    pub tokens: Vec<String>,
}

/// How a transaction's accumulated lines were classified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum MatchKind {
    /// A caller-supplied pattern (such as the send prompt)
    Expected(String),
    /// `OK`
    Ok,
    /// An error-class result code
    Error(ModemErrorKind),
}

/// Classification of a line buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// What matched
    pub kind: MatchKind,
    /// The matched span and captured value
    pub capture: Capture,
}

impl MatchResult {
    /// Whether the transaction failed
    pub fn is_error(&self) -> bool {
        matches!(self.kind, MatchKind::Error(_))
    }

    /// Numeric CME/CMS code, when one was reported
    pub fn code(&self) -> Option<u16> {
        match self.kind {
            MatchKind::Error(ModemErrorKind::Cme | ModemErrorKind::Cms) => {
                self.capture.value.trim().parse().ok()
            }
            _ => None,
        }
    }

    /// Split lines into responses (through the match) and extras (after it)
    pub fn split(&self, mut lines: Vec<String>) -> (Vec<String>, Vec<String>) {
        let cut = (self.capture.end + 1).min(lines.len());
        let extras = lines.split_off(cut);
        (lines, extras)
    }
}

/// Classifies accumulated lines as expected / OK / error
#[derive(Debug, Clone)]
pub struct ResponseMatcher {
    ok: Template,
    errors: Vec<(ModemErrorKind, Template)>,
}

impl Default for ResponseMatcher {
    fn default() -> Self {
        Self::from_driver(&DriverProfile::generic())
    }
}

impl ResponseMatcher {
    /// Build from a driver's `RESPONSE_*` result-code templates
    pub fn from_driver(driver: &DriverProfile) -> Self {
        let compile = |id: &str, fallback: &str| {
            Template::from_driver(driver, id).unwrap_or_else(|| Template::new(id, fallback))
        };
        Self {
            ok: compile("RESPONSE_OK", "OK"),
            errors: vec![
                (ModemErrorKind::Error, compile("RESPONSE_ERROR", "ERROR")),
                (
                    ModemErrorKind::NoCarrier,
                    compile("RESPONSE_NO_CARRIER", "NO CARRIER"),
                ),
                (
                    ModemErrorKind::NotSupported,
                    compile("RESPONSE_NOT_SUPPORTED", "COMMAND NOT SUPPORT"),
                ),
                (
                    ModemErrorKind::Cme,
                    compile("RESPONSE_CME", "+CME ERROR: %CODE%"),
                ),
                (
                    ModemErrorKind::Cms,
                    compile("RESPONSE_CMS", "+CMS ERROR: %CODE%"),
                ),
            ],
        }
    }

    /// Classify `lines`
    ///
    /// Expected patterns are tried first, then `OK`, then the error class.
    /// Within each stage the earliest line index wins.
    pub fn classify(&self, lines: &[String], expected: &[Template]) -> Option<MatchResult> {
        for template in expected {
            if let Some(capture) = (0..lines.len()).find_map(|p| template.match_at(lines, p, None)) {
                return Some(MatchResult {
                    kind: MatchKind::Expected(template.id.clone()),
                    capture,
                });
            }
        }

        if let Some(capture) = (0..lines.len()).find_map(|p| self.ok.match_at(lines, p, None)) {
            return Some(MatchResult {
                kind: MatchKind::Ok,
                capture,
            });
        }

        (0..lines.len()).find_map(|p| {
            self.errors.iter().find_map(|(kind, template)| {
                template.match_at(lines, p, None).map(|capture| MatchResult {
                    kind: MatchKind::Error(*kind),
                    capture,
                })
            })
        })
    }

    /// Whether `line` is a final result code on its own
    pub fn is_final(&self, line: &str) -> bool {
        let lines = [line.to_string()];
        self.ok.match_at(&lines, 0, None).is_some()
            || self
                .errors
                .iter()
                .any(|(_, t)| t.match_at(&lines, 0, None).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_clean_lines() {
        assert_eq!(
            clean_lines(b"\r\n+CSQ: 20,99\r\n\r\nOK\r\n"),
            lines(&["+CSQ: 20,99", "OK"])
        );
        assert_eq!(clean_lines(b"\r\n> "), lines(&[">"]));
        assert!(clean_lines(b"\r\n\r\n").is_empty());
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(tokenize("\"SM\",3"), lines(&["SM", "3"]));
        assert_eq!(
            tokenize("0,\"Balance: 1,000\",15"),
            lines(&["0", "Balance: 1,000", "15"])
        );
        assert_eq!(tokenize(",123"), lines(&["", "123"]));
        assert!(tokenize("  ").is_empty());
    }

    #[test]
    fn test_ok_match() {
        let matcher = ResponseMatcher::default();
        let buf = lines(&["+CSQ: 20,99", "OK"]);
        let result = matcher.classify(&buf, &[]).unwrap();
        assert_eq!(result.kind, MatchKind::Ok);
        assert_eq!(result.capture.start, 1);
        assert!(!result.is_error());
    }

    #[test]
    fn test_bare_literal_is_whole_word() {
        let matcher = ResponseMatcher::default();
        assert!(matcher.classify(&lines(&["OKAY"]), &[]).is_none());
        assert!(matcher.classify(&lines(&["ERRORS: 0"]), &[]).is_none());
        assert!(!matcher.is_final("OK2"));

        let ring = Template::new("RESPONSE_RING", "RING");
        assert!(ring.match_at(&lines(&["RINGBACK"]), 0, None).is_none());
        assert!(ring.match_at(&lines(&["RING"]), 0, None).is_some());

        let result = matcher.classify(&lines(&["OKAY", "OK"]), &[]).unwrap();
        assert_eq!(result.capture.start, 1);
    }

    #[test]
    fn test_no_conclusion_yet() {
        let matcher = ResponseMatcher::default();
        assert!(matcher.classify(&lines(&["+CSQ: 20,99"]), &[]).is_none());
        assert!(matcher.classify(&[], &[]).is_none());
    }

    #[test]
    fn test_cme_error_is_not_ok() {
        let matcher = ResponseMatcher::default();
        let result = matcher
            .classify(&lines(&["+CME ERROR: 100"]), &[])
            .unwrap();
        assert_eq!(result.kind, MatchKind::Error(ModemErrorKind::Cme));
        assert_eq!(result.code(), Some(100));
        assert_eq!(result.capture.end, 0);
    }

    #[test]
    fn test_error_kinds() {
        let matcher = ResponseMatcher::default();
        let cases = [
            ("ERROR", ModemErrorKind::Error),
            ("NO CARRIER", ModemErrorKind::NoCarrier),
            ("COMMAND NOT SUPPORT", ModemErrorKind::NotSupported),
            ("+CMS ERROR: 500", ModemErrorKind::Cms),
        ];
        for (line, kind) in cases {
            let result = matcher.classify(&lines(&[line]), &[]).unwrap();
            assert_eq!(result.kind, MatchKind::Error(kind), "{}", line);
        }
        assert!(matcher.is_final("OK"));
        assert!(matcher.is_final("+CME ERROR: 10"));
        assert!(!matcher.is_final("+CMTI: \"SM\",1"));
    }

    #[test]
    fn test_verbose_cme_has_no_code() {
        let matcher = ResponseMatcher::default();
        let result = matcher
            .classify(&lines(&["+CME ERROR: SIM not inserted"]), &[])
            .unwrap();
        assert_eq!(result.code(), None);
        assert_eq!(result.capture.value, "SIM not inserted");
    }

    #[test]
    fn test_expected_pattern_wins() {
        let matcher = ResponseMatcher::default();
        let prompt = Template::new("RESPONSE_PROMPT", ">");
        let result = matcher
            .classify(&lines(&["OK", ">"]), std::slice::from_ref(&prompt))
            .unwrap();
        assert_eq!(result.kind, MatchKind::Expected("RESPONSE_PROMPT".into()));
        assert_eq!(result.capture.start, 1);
    }

    #[test]
    fn test_split_line_is_joined() {
        let matcher = ResponseMatcher::default();
        let buf = lines(&["+CME ER", "ROR: 3", "+CMTI: \"SM\",2"]);
        let result = matcher.classify(&buf, &[]).unwrap();
        assert_eq!(result.kind, MatchKind::Error(ModemErrorKind::Cme));
        assert_eq!((result.capture.start, result.capture.end), (0, 1));
        assert_eq!(result.code(), Some(3));

        let (responses, extras) = result.split(buf);
        assert_eq!(responses.len(), 2);
        assert_eq!(extras, lines(&["+CMTI: \"SM\",2"]));
    }

    #[test]
    fn test_extras_after_ok() {
        let matcher = ResponseMatcher::default();
        let buf = lines(&["OK", "RING", "+CLIP: \"0812\",129"]);
        let result = matcher.classify(&buf, &[]).unwrap();
        let (responses, extras) = result.split(buf);
        assert_eq!(responses, lines(&["OK"]));
        assert_eq!(extras.len(), 2);
    }

    #[test]
    fn test_template_value_and_join() {
        let cusd = Template::new("RESPONSE_CUSD", "+CUSD: %STATUS%,%MESSAGE%,%DCS%");
        let buf = lines(&["+CUSD: 0,\"Your balance", "is 5.00\",15", "OK"]);
        assert!(cusd.match_at(&buf, 0, None).unwrap().tokens.len() == 2);

        let capture = cusd.match_at(&buf, 0, Some("\n")).unwrap();
        assert_eq!(capture.end, 1);
        assert_eq!(capture.tokens, lines(&["0", "Your balance\nis 5.00", "15"]));

        // Unbalanced quote with nothing following: not matched yet
        assert!(cusd.match_at(&buf[..1], 0, Some("\n")).is_none());
    }

    #[test]
    fn test_header_split_after_prefix() {
        let cmti = Template::new("RESPONSE_CMTI", "+CMTI: %STORAGE%,%INDEX%");
        let buf = lines(&["+CMTI:", "\"ME\",7"]);
        let capture = cmti.match_at(&buf, 0, None).unwrap();
        assert_eq!(capture.tokens, lines(&["ME", "7"]));
        assert_eq!(capture.end, 1);
    }
}
