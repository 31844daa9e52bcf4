//! URI normalisation
//!
//! The bridge accepts plain filesystem paths, relative paths, and fully
//! formed URIs, and every LSP request goes out with a normalised
//! `file://` URI. Windows drive letters and UNC paths keep their shape
//! with backslashes folded to forward slashes; equality on Windows paths
//! is case-insensitive for the drive letter only.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::path::Path;

/// Bytes escaped inside the path portion of a `file://` URI.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'?')
    .add(b'#')
    .add(b'%')
    .add(b'{')
    .add(b'}');

/// Normalise caller input to URI form.
///
/// - anything already carrying a scheme is returned unchanged
/// - an absolute path becomes a `file://` URI
/// - a relative path is absolutised against the current working directory
///
/// Normalisation is idempotent: a second pass sees the scheme and returns
/// its input.
pub fn normalize_uri(input: &str) -> String {
    if has_scheme(input) {
        return input.to_string();
    }

    let forward = input.replace('\\', "/");

    // UNC form //server/share keeps the server as the URI authority.
    if let Some(unc) = forward.strip_prefix("//") {
        return format!("file://{}", encode_path(unc));
    }

    if is_windows_drive_path(&forward) {
        return format!("file:///{}", encode_path(&forward));
    }

    if forward.starts_with('/') {
        return format!("file://{}", encode_path(&forward));
    }

    // Relative: absolutise against the working directory.
    let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("/"));
    let joined = cwd.join(&forward);
    path_to_file_uri(&joined)
}

/// Build a `file://` URI from a filesystem path.
pub fn path_to_file_uri(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    if let Some(unc) = text.strip_prefix("//") {
        return format!("file://{}", encode_path(unc));
    }
    if is_windows_drive_path(&text) {
        return format!("file:///{}", encode_path(&text));
    }
    format!("file://{}", encode_path(&text))
}

/// Extract a filesystem path from a `file://` URI; other inputs are
/// returned as-is.
pub fn uri_to_path(uri: &str) -> String {
    let Some(rest) = uri.strip_prefix("file://") else {
        return uri.to_string();
    };
    let decoded = percent_encoding::percent_decode_str(rest)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| rest.to_string());

    // file:///C:/x carries a spurious leading slash before the drive.
    if decoded.len() >= 3 && decoded.starts_with('/') && is_windows_drive_path(&decoded[1..]) {
        return decoded[1..].to_string();
    }
    decoded
}

/// URI equality. Windows drive letters compare case-insensitively; the
/// rest of the path is case-sensitive, as on Unix.
pub fn uris_equal(a: &str, b: &str) -> bool {
    let a = normalize_uri(a);
    let b = normalize_uri(b);
    if a == b {
        return true;
    }

    let (da, ra) = split_drive(&a);
    let (db, rb) = split_drive(&b);
    match (da, db) {
        (Some(da), Some(db)) => da.eq_ignore_ascii_case(&db) && ra == rb,
        _ => false,
    }
}

fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_ENCODE_SET).to_string()
}

/// Whether the input starts with a URI scheme (`scheme://`).
fn has_scheme(input: &str) -> bool {
    let Some(idx) = input.find("://") else {
        return false;
    };
    let scheme = &input[..idx];
    !scheme.is_empty()
        && scheme
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'))
}

/// `C:/...` style prefix check.
fn is_windows_drive_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || bytes[2] == b'/')
}

/// Split `file:///C:/rest` into its drive letter and remainder.
fn split_drive(uri: &str) -> (Option<char>, &str) {
    if let Some(rest) = uri.strip_prefix("file:///") {
        let bytes = rest.as_bytes();
        if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            return (Some(bytes[0] as char), &rest[2..]);
        }
    }
    (None, uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_path_normalises_to_file_uri() {
        assert_eq!(normalize_uri("/a/b.go"), "file:///a/b.go");
    }

    #[test]
    fn test_scheme_input_unchanged() {
        assert_eq!(normalize_uri("file:///a/b.go"), "file:///a/b.go");
        assert_eq!(
            normalize_uri("https://example.com/x"),
            "https://example.com/x"
        );
        assert_eq!(normalize_uri("untitled://buffer-1"), "untitled://buffer-1");
    }

    #[test]
    fn test_normalisation_is_idempotent() {
        for input in ["/a/b.go", "rel/path.rs", "C:\\code\\x.ts", "file:///z.py"] {
            let once = normalize_uri(input);
            assert_eq!(normalize_uri(&once), once, "input {:?}", input);
        }
    }

    #[test]
    fn test_relative_path_absolutised_against_cwd() {
        let uri = normalize_uri("src/main.go");
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(uri, format!("file://{}/src/main.go", cwd.display()));
    }

    #[test]
    fn test_windows_drive_path() {
        assert_eq!(
            normalize_uri("C:\\Users\\dev\\main.ts"),
            "file:///C:/Users/dev/main.ts"
        );
    }

    #[test]
    fn test_unc_path() {
        assert_eq!(
            normalize_uri("\\\\server\\share\\x.go"),
            "file://server/share/x.go"
        );
    }

    #[test]
    fn test_spaces_percent_encoded() {
        assert_eq!(
            normalize_uri("/tmp/space file.rs"),
            "file:///tmp/space%20file.rs"
        );
    }

    #[test]
    fn test_uri_to_path_round_trip() {
        assert_eq!(uri_to_path("file:///a/b.go"), "/a/b.go");
        assert_eq!(uri_to_path("file:///tmp/space%20file.rs"), "/tmp/space file.rs");
        assert_eq!(uri_to_path("file:///C:/code/x.ts"), "C:/code/x.ts");
    }

    #[test]
    fn test_drive_letter_equality_case_insensitive() {
        assert!(uris_equal("file:///C:/code/x.ts", "file:///c:/code/x.ts"));
        assert!(!uris_equal("file:///C:/code/x.ts", "file:///C:/Code/x.ts"));
    }

    #[test]
    fn test_unix_equality_case_sensitive() {
        assert!(uris_equal("/a/b.go", "file:///a/b.go"));
        assert!(!uris_equal("/a/b.go", "/a/B.go"));
    }
}
