//! Text heuristics over spreadsheet cells: city-name extraction and number cleaning.
//!
//! Population labels are noisy (`"пос. Вязьма (город Вязьма)"`, `"г.Вязьма"`,
//! `"г. Вязьма Смоленской области"`). Extraction produces candidates in the
//! canonical `г. <Cyrillic words>` shape; the caller decides which one is valid.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Canonical city prefix.
pub const CITY_PREFIX: &str = "г.";

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bг\.\s*|\bгород\s+").expect("prefix pattern"))
}

fn words_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[А-ЯЁа-яё][А-ЯЁа-яё\s\-]*").expect("words pattern"))
}

fn shape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^г\. [А-ЯЁа-яё][А-ЯЁа-яё\- ]*[А-ЯЁа-яё]$|^г\. [А-ЯЁа-яё]$").expect("shape pattern")
    })
}

/// All `г. <words>` candidates in `label`, in order of appearance.
///
/// For each prefix occurrence the word sequence after it is offered longest
/// first, then with trailing words dropped one by one, so a label that runs
/// on past the city name still yields the bare name.
pub fn extract_city_candidates(label: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    for prefix in prefix_re().find_iter(label) {
        let rest = &label[prefix.end()..];
        let Some(seq) = words_re().find(rest) else {
            continue;
        };

        let words: Vec<&str> = seq
            .as_str()
            .split_whitespace()
            .map(|w| w.trim_end_matches('-'))
            .filter(|w| !w.is_empty())
            .collect();

        for n in (1..=words.len()).rev() {
            let candidate = format!("{CITY_PREFIX} {}", words[..n].join(" "));
            if is_canonical_shape(&candidate) && !out.contains(&candidate) {
                out.push(candidate);
            }
        }
    }

    out
}

/// First extracted candidate that names a city in `valid`.
pub fn extract_valid_city(label: &str, valid: &HashSet<String>) -> Option<String> {
    extract_city_candidates(label)
        .into_iter()
        .find(|c| valid.contains(c))
}

/// `true` for `г. Name`, `г. Two Words`, `г. Гусь-Хрустальный`.
pub fn is_canonical_shape(name: &str) -> bool {
    shape_re().is_match(name)
}

/// Bring a tax-dataset name to the shape extraction produces:
/// single spaces, exactly one space after `г.`.
pub fn normalize_city_name(name: &str) -> String {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.strip_prefix(CITY_PREFIX) {
        Some(rest) => format!("{CITY_PREFIX} {}", rest.trim_start()),
        None => collapsed,
    }
}

/// `"г. Вязьма"` → `"Вязьма"`.
pub fn strip_city_prefix(name: &str) -> String {
    let trimmed = name.trim();
    trimmed
        .strip_prefix(CITY_PREFIX)
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Parse a human-formatted number: everything except digits, `.` and `,` is
/// dropped, `,` is read as a decimal point. `None` when nothing numeric is left.
pub fn clean_number(raw: &str) -> Option<f64> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if kept.is_empty() {
        return None;
    }
    kept.parse::<f64>().ok().filter(|n| n.is_finite())
}
