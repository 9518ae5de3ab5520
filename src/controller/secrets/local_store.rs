//! # Local Key/Value Store
//!
//! One `KEY=VALUE` per line, `#` comments and blank lines ignored, no line
//! continuation. The value is everything after the first `=`, verbatim.

use super::error::{MalformedEntryError, MalformedEntryReason};
use super::SecretBundle;

/// Parse local-store lines into a bundle named `name`
///
/// Keys are trimmed; values are kept exactly as written (embedded `=`,
/// quotes, surrounding spaces, non-ASCII). A repeated key overwrites the
/// earlier value in place.
///
/// # Errors
///
/// Returns [`MalformedEntryError`] with the 1-based line number for a line
/// without `=` or with an empty key.
pub fn from_local_store<I, S>(name: &str, lines: I) -> Result<SecretBundle, MalformedEntryError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut bundle = SecretBundle::new(name);

    for (idx, line) in lines.into_iter().enumerate() {
        let line = line.as_ref();
        let line = line.strip_suffix('\r').unwrap_or(line);
        let trimmed = line.trim_start();

        // Skip comments and empty lines
        if trimmed.trim_end().is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(MalformedEntryError {
                line: idx + 1,
                reason: MalformedEntryReason::MissingSeparator,
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(MalformedEntryError {
                line: idx + 1,
                reason: MalformedEntryReason::EmptyKey,
            });
        }

        bundle.insert(key.to_string(), value.to_string());
    }

    Ok(bundle)
}

/// Render a bundle back into local-store text, one `KEY=VALUE\n` per entry
///
/// # Errors
///
/// Returns [`MalformedEntryError`] (with the 1-based entry position) for a
/// value containing `\n` or `\r`, or a key that would not parse back.
pub fn to_local_store(bundle: &SecretBundle) -> Result<String, MalformedEntryError> {
    let mut out = String::new();
    for (idx, entry) in bundle.entries().enumerate() {
        let key_invalid = entry.key.trim().is_empty() || entry.key.contains(['=', '\n', '\r']);
        if key_invalid {
            return Err(MalformedEntryError {
                line: idx + 1,
                reason: MalformedEntryReason::EmptyKey,
            });
        }
        if entry.value().contains(['\n', '\r']) {
            return Err(MalformedEntryError {
                line: idx + 1,
                reason: MalformedEntryReason::MultilineValue,
            });
        }
        out.push_str(&entry.key);
        out.push('=');
        out.push_str(entry.value());
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comments_and_blank_lines_skipped_in_order() {
        let bundle = from_local_store(
            "app",
            ["DB_PASS=p@ss'word", "# comment", "", "EMPTY="],
        )
        .expect("store should parse");

        assert_eq!(bundle.keys().collect::<Vec<_>>(), vec!["DB_PASS", "EMPTY"]);
        assert_eq!(bundle.get("DB_PASS"), Some("p@ss'word"));
        assert_eq!(bundle.get("EMPTY"), Some(""));
    }

    #[test]
    fn test_value_kept_verbatim() {
        let bundle = from_local_store(
            "app",
            ["URL=postgres://u:p@h/db?sslmode=require", "QUOTED=\"a b\" ", "UNI=日本語 ✓"],
        )
        .expect("store should parse");

        assert_eq!(bundle.get("URL"), Some("postgres://u:p@h/db?sslmode=require"));
        assert_eq!(bundle.get("QUOTED"), Some("\"a b\" "));
        assert_eq!(bundle.get("UNI"), Some("日本語 ✓"));
    }

    #[test]
    fn test_duplicate_key_last_write_wins() {
        let bundle = from_local_store("app", ["A=1", "B=2", "A=3"]).expect("store should parse");
        assert_eq!(bundle.keys().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(bundle.get("A"), Some("3"));
    }

    #[test]
    fn test_line_without_key_is_malformed() {
        let err = from_local_store("app", ["A=1", "=orphan"]).expect_err("must fail");
        assert_eq!(err.line, 2);
        assert_eq!(err.reason, MalformedEntryReason::EmptyKey);

        let err = from_local_store("app", ["# ok", "JUSTAKEY"]).expect_err("must fail");
        assert_eq!(err.line, 2);
        assert_eq!(err.reason, MalformedEntryReason::MissingSeparator);
    }

    #[test]
    fn test_malformed_error_never_echoes_line_content() {
        let err = from_local_store("app", ["s3cr3t-without-separator"]).expect_err("must fail");
        assert!(!err.to_string().contains("s3cr3t"));
    }

    #[test]
    fn test_crlf_lines_are_stripped() {
        let bundle = from_local_store("app", ["A=1\r", "B=x\r"]).expect("store should parse");
        assert_eq!(bundle.get("A"), Some("1"));
        assert_eq!(bundle.get("B"), Some("x"));
    }

    #[test]
    fn test_to_local_store_reproduces_canonical_text() {
        let text = "DB_PASS=p@ss'word\nEMPTY=\nEQ=a=b=c\n";
        let bundle = from_local_store("app", text.lines()).expect("store should parse");
        assert_eq!(to_local_store(&bundle).expect("should render"), text);
    }

    #[test]
    fn test_to_local_store_rejects_multiline_value() {
        let bundle = SecretBundle::from_entries(
            "app",
            vec![
                ("OK".to_string(), "1".to_string()),
                ("PEM".to_string(), "line1\nline2".to_string()),
            ],
        );
        let err = to_local_store(&bundle).expect_err("multiline must fail");
        assert_eq!(err.line, 2);
        assert_eq!(err.reason, MalformedEntryReason::MultilineValue);
    }
}
