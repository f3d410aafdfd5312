//! Text helpers applied at the boundaries of the engine: normalising user
//! input before it is written, and escaping record text before it is handed
//! to a markup renderer.

use crate::constants::MAX_MESSAGE_CHARS;
use crate::error::ValidationError;

/// Trim user input and check it is sendable.
pub fn normalize_message(text: &str) -> Result<String, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    let len = trimmed.chars().count();
    if len > MAX_MESSAGE_CHARS {
        return Err(ValidationError::TooLong {
            len,
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(trimmed.to_string())
}

/// Escape text for inclusion in HTML. Message text is never trusted as markup.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims() {
        assert_eq!(normalize_message("  hello \n").unwrap(), "hello");
    }

    #[test]
    fn test_normalize_rejects_blank() {
        assert_eq!(normalize_message(""), Err(ValidationError::EmptyText));
        assert_eq!(normalize_message(" \t\n "), Err(ValidationError::EmptyText));
    }

    #[test]
    fn test_normalize_rejects_oversized() {
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            normalize_message(&long),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<img src="x" onerror='a&b'>"#),
            "&lt;img src=&quot;x&quot; onerror=&#39;a&amp;b&#39;&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }
}
