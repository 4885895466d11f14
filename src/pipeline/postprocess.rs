//! Deterministic cleanup of VLM-generated Markdown.
//!
//! Even well-prompted models occasionally wrap their answer in a
//! ```` ```markdown ```` fence, emit `\r\n`, invent `![figure](image.png)`
//! links to files that do not exist, or scatter separator rows through a
//! table. The rules below repair that without touching content.
//!
//! Rules work on one page at a time ([`clean_page`]); [`join_pages`] then
//! stitches the cleaned pages into the final document.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

type Rule = fn(&str) -> String;

/// Page rules, in application order. Fences go first so later rules see the
/// bare content; image removal runs before whitespace trimming, and
/// blank-line collapsing goes last, because both can leave blanks behind.
const PAGE_RULES: &[(&str, Rule)] = &[
    ("strip-fences", strip_outer_fence),
    ("placeholder-images", remove_placeholder_images),
    ("line-endings", normalise_line_endings),
    ("invisible-chars", remove_invisible_chars),
    ("tables", normalise_tables),
    ("blank-lines", collapse_blank_lines),
];

/// Clean one transcribed page. The result has no leading or trailing blank
/// lines.
pub fn clean_page(raw: &str) -> String {
    let mut text = raw.to_string();
    for (name, rule) in PAGE_RULES {
        let next = rule(&text);
        if next != text {
            trace!("postprocess rule '{}' changed the page", name);
        }
        text = next;
    }
    text.trim_matches('\n').to_string()
}

/// Join cleaned pages with one blank line, skipping empty pages. The
/// document ends with exactly one newline.
pub fn join_pages<S: AsRef<str>>(pages: &[S]) -> String {
    let body = pages
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{}\n", body)
}

// ── Fences ───────────────────────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Whitespace ───────────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

const INVISIBLE: [char; 6] = [
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}',
];

fn remove_invisible_chars(input: &str) -> String {
    input.replace(INVISIBLE, "")
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

// ── Images ───────────────────────────────────────────────────────────────────

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

const PLACEHOLDER_HOSTS: &[&str] = &[
    "example.com",
    "placeholder.com",
    "placehold.it",
    "dummyimage.com",
    "lorempixel.com",
    "picsum.photos",
];

/// A page image never links to anything real unless it is an absolute URL
/// on a non-placeholder host.
fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    let absolute = u.starts_with("http://") || u.starts_with("https://");
    !absolute || PLACEHOLDER_HOSTS.iter().any(|h| u.contains(h))
}

/// Replace invented image links with their alt text in italics.
fn remove_placeholder_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            if !is_placeholder_url(&caps[2]) {
                return caps[0].to_string();
            }
            match caps[1].trim() {
                "" => String::new(),
                alt => format!("*{}*", alt),
            }
        })
        .into_owned()
}

// ── Tables ───────────────────────────────────────────────────────────────────

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    is_table_row(t)
        && t.contains('-')
        && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn separator_for(header: &str) -> String {
    let cols = header.trim().matches('|').count().saturating_sub(1).max(1);
    let mut sep = String::from("|");
    for _ in 0..cols {
        sep.push_str(" --- |");
    }
    sep
}

/// Give every table exactly one separator row, directly below its header.
fn normalise_tables(input: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    // Rows seen in the current table block; 0 outside a table.
    let mut row = 0usize;

    for line in input.lines() {
        if !is_table_row(line) {
            row = 0;
            out.push(line.to_string());
            continue;
        }

        row += 1;
        let sep = is_separator_row(line);
        match (row, sep) {
            // A table cannot start with a separator.
            (1, true) => row = 0,
            (2, true) => out.push(line.to_string()),
            (2, false) => {
                let header = out.last().map(String::as_str).unwrap_or(line);
                let fixed = separator_for(header);
                out.push(fixed);
                out.push(line.to_string());
                row = 3;
            }
            (_, true) => row -= 1,
            (_, false) => out.push(line.to_string()),
        }
    }

    out.join("\n")
}
