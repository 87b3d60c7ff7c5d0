//! Filename heuristics for comic archives
//!
//! Best-effort extraction of series name, issue number, year and volume from
//! names like `Saga 001 (2012) (Digital) [Group].cbz` or
//! `Paper_Girls_v2_03_of_06.cbr`. Failing to extract is not an error; the
//! caller flags the item instead.

use once_cell::sync::Lazy;
use paneltrack_common::text::normalize_issue_number;
use regex::Regex;
use std::path::Path;

use crate::models::ExtractedMetadata;

/// Extensions treated as comic files
pub const COMIC_EXTENSIONS: &[&str] = &["cbz", "cbr", "cb7", "cbt", "pdf", "epub"];

static YEAR_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\d{4})\)").expect("valid year regex"));
static TAG_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]|\{[^}]*\}").expect("valid tag regex"));
static COUNTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|\s)#?(\d+(?:\.\d+)?)\s+of\s+\d+\s*$").expect("valid counter regex")
});
static VOLUME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|\s)(?:v|vol\.?|volume)\s*(\d+)(?:\s|$)").expect("valid volume regex")
});
static HASH_ISSUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#\s*(\d+(?:\.\d+)?[a-zA-Z]*)").expect("valid issue regex"));
static TRAILING_ISSUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*?\S)[\s\-]+(\d+(?:\.\d+)?)\s*$").expect("valid trailing issue regex")
});

/// Whether `path` has one of the comic extensions (case-insensitive)
pub fn is_comic_path(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| COMIC_EXTENSIONS.contains(&ext.as_str()))
}

/// Lowercase extension of `path`
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// Extract metadata from the file name of `path`
pub fn parse_filename(path: &Path) -> ExtractedMetadata {
    let stem = match path.file_stem() {
        Some(stem) => stem.to_string_lossy().replace('_', " "),
        None => return ExtractedMetadata::default(),
    };
    parse_title(&stem)
}

/// Extract metadata from a title without extension
pub fn parse_title(title: &str) -> ExtractedMetadata {
    let mut metadata = ExtractedMetadata::default();
    let mut rest = title.to_string();

    if let Some(caps) = YEAR_GROUP.captures(&rest) {
        let year: Option<i32> = caps[1].parse().ok();
        if year.is_some_and(|y| (1900..=2100).contains(&y)) {
            metadata.year = year;
        }
    }
    rest = TAG_GROUP.replace_all(&rest, " ").into_owned();

    if let Some(caps) = COUNTER.captures(&rest) {
        metadata.issue_number = normalize_issue_number(&caps[1]);
        let start = caps.get(0).map_or(rest.len(), |m| m.start());
        rest.truncate(start);
    }

    if let Some(caps) = VOLUME.captures(&rest) {
        metadata.volume = caps[1].parse().ok();
        rest = VOLUME.replace(&rest, " ").into_owned();
    }

    if metadata.issue_number.is_none() {
        if let Some(caps) = HASH_ISSUE.captures(&rest) {
            metadata.issue_number = normalize_issue_number(&caps[1]);
            let start = caps.get(0).map_or(rest.len(), |m| m.start());
            rest.truncate(start);
        } else if let Some(caps) = TRAILING_ISSUE.captures(rest.trim_end()) {
            metadata.issue_number = normalize_issue_number(&caps[2]);
            rest = caps[1].to_string();
        }
    }

    let series = clean_series(&rest);
    if !series.is_empty() {
        metadata.series_name = Some(series);
    }

    metadata
}

fn clean_series(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c == '-' || c == ',' || c == '.' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str) -> ExtractedMetadata {
        parse_filename(Path::new(name))
    }

    #[test]
    fn test_scene_style_name() {
        let m = parse("/in/Saga 001 (2012) (Digital) [Empire].cbz");
        assert_eq!(m.series_name.as_deref(), Some("Saga"));
        assert_eq!(m.issue_number.as_deref(), Some("1"));
        assert_eq!(m.year, Some(2012));
        assert_eq!(m.volume, None);
    }

    #[test]
    fn test_volume_and_hash_issue() {
        let m = parse("Paper Girls v2 #3.cbr");
        assert_eq!(m.series_name.as_deref(), Some("Paper Girls"));
        assert_eq!(m.volume, Some(2));
        assert_eq!(m.issue_number.as_deref(), Some("3"));

        let m = parse("Monstress Vol. 4 012.cbz");
        assert_eq!(m.series_name.as_deref(), Some("Monstress"));
        assert_eq!(m.volume, Some(4));
        assert_eq!(m.issue_number.as_deref(), Some("12"));
    }

    #[test]
    fn test_underscores_and_counter() {
        let m = parse("Batman_-_Year_One_01_of_04.cbz");
        assert_eq!(m.series_name.as_deref(), Some("Batman - Year One"));
        assert_eq!(m.issue_number.as_deref(), Some("1"));
    }

    #[test]
    fn test_decimal_issue() {
        let m = parse("Invincible 012.5 (2004).cbz");
        assert_eq!(m.series_name.as_deref(), Some("Invincible"));
        assert_eq!(m.issue_number.as_deref(), Some("12.5"));
        assert_eq!(m.year, Some(2004));
    }

    #[test]
    fn test_series_without_issue() {
        let m = parse("Watchmen (1986).pdf");
        assert_eq!(m.series_name.as_deref(), Some("Watchmen"));
        assert_eq!(m.issue_number, None);
        assert_eq!(m.year, Some(1986));
    }

    #[test]
    fn test_nothing_extractable() {
        let m = parse("(2012) [scans].cbz");
        assert!(!m.is_extracted());
        assert_eq!(m.year, Some(2012));
    }

    #[test]
    fn test_comic_extensions() {
        assert!(is_comic_path(Path::new("a/B.CBZ")));
        assert!(is_comic_path(Path::new("a/b.epub")));
        assert!(!is_comic_path(Path::new("a/cover.jpg")));
        assert!(!is_comic_path(Path::new("a/noext")));
    }
}
