//! Destination table names, upload file names, and URL checks

use once_cell::sync::Lazy;
use regex::Regex;

static NON_WORD_OR_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s]").expect("valid regex"));
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^https?://",
        r"(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+[A-Z]{2,6}\.?|",
        r"localhost|",
        r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
        r"(?::\d+)?",
        r"(?:/?|[/?]\S+)$",
    ))
    .expect("valid regex")
});

/// File extensions accepted for CSV uploads
pub const ALLOWED_UPLOAD_EXTENSIONS: &[&str] = &["csv", "txt"];

/// Destination table name for a job: `etl_data_<cleaned name>_<id>`
pub fn table_name(job_name: &str, job_id: i64) -> String {
    let cleaned = NON_WORD_OR_SPACE.replace_all(job_name, "");
    let cleaned = WHITESPACE_RUN.replace_all(&cleaned, "_");
    let cleaned = cleaned.to_lowercase();
    format!("etl_data_{}_{}", cleaned.trim_matches('_'), job_id)
}

/// Whether `url` looks like an http(s) endpoint on a domain, localhost, or IPv4 host
pub fn is_valid_url(url: &str) -> bool {
    URL_PATTERN.is_match(url)
}

/// Whether an upload's file name carries an accepted extension
pub fn is_allowed_upload(file_name: &str) -> bool {
    file_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ALLOWED_UPLOAD_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Staged name for a job's upload, or `None` if nothing usable is left of the name
pub fn upload_file_name(job_id: i64, original: &str) -> Option<String> {
    let secured = secure_file_name(original);
    if secured.is_empty() {
        return None;
    }
    Some(format!("job_{}_{}", job_id, secured))
}

/// Reduce a user-supplied file name to ASCII letters, digits, `.`, `_` and `-`
fn secure_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let joined = base.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    kept.trim_matches(['.', '_']).to_string()
}
