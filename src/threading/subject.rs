use once_cell::sync::Lazy;
use regex::Regex;

const REPLY_PREFIXES: [&str; 4] = ["re:", "fwd:", "fw:", "aw:"];
const MATCHING_PREFIXES: [&str; 6] = ["re:", "fwd:", "fw:", "aw:", "[patch]", "[rfc]"];

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static SERIES_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[PATCH\s+([^\]]*?)\s+\d+/\d+\]").expect("valid regex")
});

/// Strips leading `Re:`/`Fwd:`/`Fw:`/`Aw:` tokens, any number of times and in
/// any case. Bracketed markers such as `[PATCH 1/2]` are kept.
pub fn subject_base(subject: &str) -> String {
    strip_prefixes(subject.trim(), &REPLY_PREFIXES).trim().to_string()
}

/// Full Unicode lowercase. Stored subjects and search keywords both go
/// through this so matching agrees beyond ASCII.
pub fn fold_case(text: &str) -> String {
    text.to_lowercase()
}

pub fn is_reply_subject(subject: &str) -> bool {
    starts_with_ignore_case(subject.trim_start(), "re:")
}

/// Key used to anchor messages whose references resolve nowhere: lowercased,
/// reply and `[PATCH]`/`[RFC]` prefixes removed, whitespace collapsed.
pub fn matching_key(subject: &str) -> String {
    let lowered = subject.trim().to_lowercase();
    let stripped = strip_prefixes(&lowered, &MATCHING_PREFIXES);
    WHITESPACE.replace_all(stripped, " ").trim().to_string()
}

/// Identifies a patch series: `[PATCH v3 net-next 03/12]` → `v3 net-next/12`.
/// Untagged series (`[PATCH 1/2]`) have no identifier.
pub fn series_key(subject: &str, series_total: i32) -> Option<String> {
    let caps = SERIES_MARKER.captures(subject)?;
    let tag = caps.get(1)?.as_str().trim();
    if tag.is_empty() {
        return None;
    }
    Some(format!("{}/{}", tag.to_lowercase(), series_total))
}

fn strip_prefixes<'a>(mut subject: &'a str, prefixes: &[&str]) -> &'a str {
    loop {
        let mut changed = false;
        for prefix in prefixes {
            if starts_with_ignore_case(subject, prefix) {
                subject = subject[prefix.len()..].trim_start();
                changed = true;
                break;
            }
        }
        if !changed {
            return subject;
        }
    }
}

fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
    haystack
        .get(..prefix.len())
        .map(|head| head.eq_ignore_ascii_case(prefix))
        .unwrap_or(false)
}
