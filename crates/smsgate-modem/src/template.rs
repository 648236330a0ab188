//! Command template expansion
//!
//! Templates carry two kinds of markup: `$XX` two-hex-digit escapes standing
//! for a literal byte (`$1A` is Ctrl-Z, `$0D` is CR), and `%NAME%`
//! placeholders filled from a variable map. Escapes are expanded first.
//! Commands are written as ASCII, so only escapes `$00`-`$7F` are valid.

use std::collections::HashMap;

use crate::error::{ModemError, Result};

/// Built-in variables available to every template
const BUILTINS: [(&str, &str); 3] = [("NONE", ""), ("CR", "\r"), ("LF", "\n")];

/// Byte named by a `$XX` escape at the start of `tail` (text after the `$`)
fn escape_at(tail: &str) -> Option<u8> {
    let digits = tail.get(..2)?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}

/// Reject escapes naming a byte outside ASCII
pub fn check_escapes(template: &str) -> Result<()> {
    for (pos, _) in template.match_indices('$') {
        if let Some(byte) = escape_at(&template[pos + 1..]) {
            if !byte.is_ascii() {
                return Err(ModemError::InvalidDriverConfig(format!(
                    "escape ${:02X} in {:?} is not an ASCII byte",
                    byte, template
                )));
            }
        }
    }
    Ok(())
}

/// Replace every `$XX` escape with the byte it names
///
/// A `$` not followed by two hex digits, or naming a non-ASCII byte, is
/// kept as is.
pub fn expand_escapes(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        match escape_at(tail) {
            Some(byte) if byte.is_ascii() => {
                out.push(char::from(byte));
                rest = &tail[2..];
            }
            _ => {
                out.push('$');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Fill `%NAME%` placeholders
///
/// `vars` take precedence over the built-ins. Unknown placeholders are left
/// in place so a missing variable shows up in the written command.
pub fn substitute(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('%') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('%') else {
            break;
        };
        let name = &after[..close];
        let value = vars.get(name).map(String::as_str).or_else(|| {
            BUILTINS
                .iter()
                .find(|(builtin, _)| *builtin == name)
                .map(|(_, v)| *v)
        });
        out.push_str(&rest[..open]);
        match value {
            Some(v) => {
                out.push_str(v);
                rest = &after[close + 1..];
            }
            None => {
                // Keep the opening `%` and rescan from the closing one
                out.push('%');
                out.push_str(name);
                rest = &after[close..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Expand escapes, then fill placeholders
pub fn render(template: &str, vars: &HashMap<&str, String>) -> String {
    substitute(&expand_escapes(template), vars)
}

/// Literal text before the first placeholder
///
/// This is the part of a response template that identifies a line.
pub fn literal_prefix(template: &str) -> &str {
    match template.find('%') {
        Some(pos) => &template[..pos],
        None => template,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn test_expand_escapes() {
        assert_eq!(expand_escapes("%PDU%$1A"), "%PDU%\u{1a}");
        assert_eq!(expand_escapes("$0D$0A"), "\r\n");
        assert_eq!(expand_escapes("cost $5"), "cost $5");
        assert_eq!(expand_escapes("$ZZ$"), "$ZZ$");
    }

    #[test]
    fn test_non_ascii_escapes() {
        assert_eq!(expand_escapes("AT$FF"), "AT$FF");
        assert!(expand_escapes("$80").is_ascii());
        assert!(check_escapes("%PDU%$1A").is_ok());
        assert!(check_escapes("cost $5").is_ok());
        assert!(matches!(
            check_escapes("AT$80"),
            Err(ModemError::InvalidDriverConfig(_))
        ));
    }

    #[test]
    fn test_substitute_placeholders() {
        let v = vars(&[("LEN", "23")]);
        assert_eq!(substitute("AT+CMGS=%LEN%", &v), "AT+CMGS=23");
        assert_eq!(substitute("A%NONE%B%CR%", &v), "AB\r");
    }

    #[test]
    fn test_vars_override_builtins() {
        let v = vars(&[("CR", "<cr>")]);
        assert_eq!(substitute("%CR%", &v), "<cr>");
    }

    #[test]
    fn test_unknown_placeholder_kept() {
        let v = vars(&[("INDEX", "4")]);
        assert_eq!(substitute("%MISSING%,%INDEX%", &v), "%MISSING%,4");
        assert_eq!(substitute("100%", &v), "100%");
    }

    #[test]
    fn test_render_escapes_before_placeholders() {
        let v = vars(&[("PDU", "0011")]);
        assert_eq!(render("%PDU%$1A", &v), "0011\u{1a}");
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("+CMTI: %STORAGE%,%INDEX%"), "+CMTI: ");
        assert_eq!(literal_prefix("OK"), "OK");
    }
}
