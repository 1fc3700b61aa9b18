//! Short previews of message bodies for tree nodes.

const MIN_DIFF_LINES: usize = 3;
const WRAP_WIDTH: usize = 80;

/// True when the body carries an unquoted diff: at least three consecutive
/// diff lines outside quoted text.
pub fn has_diff_content(body: &str) -> bool {
    let mut consecutive = 0usize;

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('>') {
            consecutive = 0;
            continue;
        }

        let is_diff_line = trimmed.starts_with("diff --git")
            || trimmed.starts_with("--- a/")
            || trimmed.starts_with("+++ b/")
            || (trimmed.starts_with("@@") && trimmed[2..].contains("@@"))
            || (trimmed.starts_with("index ") && trimmed.len() > 10)
            || trimmed.starts_with("new file mode")
            || trimmed.starts_with("deleted file mode")
            || (consecutive > 0 && (trimmed.starts_with('+') || trimmed.starts_with('-')));

        if is_diff_line {
            consecutive += 1;
            if consecutive >= MIN_DIFF_LINES {
                return true;
            }
        } else {
            consecutive = 0;
        }
    }

    false
}

/// The author's own words: attribution lines, quotes, signature and diff
/// hunks removed, wrapped to 80 columns and capped at `max_lines`. Falls back
/// to the first raw lines when nothing is left.
pub fn body_preview(body: &str, max_lines: usize) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut in_diff = false;

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || is_attribution(trimmed) || trimmed.starts_with('>') {
            continue;
        }
        if trimmed == "--" {
            break;
        }
        if trimmed == "---"
            || trimmed.starts_with("diff --git")
            || trimmed.starts_with("--- a/")
            || trimmed.starts_with("+++ b/")
        {
            in_diff = true;
        }
        if in_diff {
            let diff_like = trimmed.starts_with(&['+', '-', '@'][..])
                || trimmed.starts_with("index ")
                || trimmed.starts_with("diff ")
                || trimmed.chars().next().is_some_and(|c| c.is_ascii_punctuation());
            if diff_like {
                continue;
            }
            in_diff = false;
        }
        kept.push(line.trim_end());
    }

    let wrapped = wrap(&kept.join("\n"), WRAP_WIDTH);
    let preview: Vec<&str> = wrapped.lines().take(max_lines).collect();
    if !preview.is_empty() {
        return preview.join("\n");
    }

    body.lines()
        .map(str::trim_end)
        .take(max_lines)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn is_attribution(trimmed: &str) -> bool {
    if (trimmed.starts_with("On ") || trimmed.starts_with("Am ")) && trimmed.contains(" wrote:") {
        return true;
    }
    (trimmed.starts_with("On ") || trimmed.starts_with("Am "))
        && (trimmed.contains(", 20") || trimmed.contains(", 19"))
        && trimmed.ends_with(':')
}

fn wrap(text: &str, width: usize) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        if line.chars().count() <= width {
            out.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            if current.is_empty() {
                current.push_str(word);
            } else if current.chars().count() + word.chars().count() < width {
                current.push(' ');
                current.push_str(word);
            } else {
                out.push(std::mem::take(&mut current));
                current.push_str(word);
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
    }
    out.join("\n")
}
