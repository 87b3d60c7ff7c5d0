//! Text normalization shared by catalog lookups and scoring
//!
//! Both sides of every comparison go through the same function, so the local
//! catalog index and the scoring engine always agree on what "same name" means.

/// Canonical form of a series name
///
/// Lowercase, `&` spelled out, punctuation folded to spaces, whitespace
/// collapsed, and a leading "the " dropped.
pub fn normalize_series_name(name: &str) -> String {
    let mut folded = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '&' {
            folded.push_str(" and ");
        } else if c.is_alphanumeric() {
            folded.extend(c.to_lowercase());
        } else if c == '\'' || c == '\u{2019}' {
            // "Jonah's" and "Jonahs" compare equal
        } else {
            folded.push(' ');
        }
    }

    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.strip_prefix("the ") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => collapsed,
    }
}

/// Canonical form of an issue number
///
/// Leading zeros are stripped from the integer part ("007" is "7", "000" is
/// "0"), a zero fraction is dropped ("12.0" is "12", "12.50" is "12.5"), and a
/// non-numeric suffix is kept lowercase ("001AU" is "1au"). Returns `None` for
/// blank input.
pub fn normalize_issue_number(number: &str) -> Option<String> {
    let trimmed = number.trim().trim_start_matches('#').trim();
    if trimmed.is_empty() {
        return None;
    }

    let lower = trimmed.to_lowercase();
    let digits_end = lower
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(lower.len());

    if digits_end == 0 {
        return Some(lower);
    }

    let (int_part, rest) = lower.split_at(digits_end);
    let int_part = match int_part.trim_start_matches('0') {
        "" => "0",
        stripped => stripped,
    };

    let rest = match rest.strip_prefix('.') {
        Some(fraction) if !fraction.is_empty() && fraction.chars().all(|c| c.is_ascii_digit()) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                String::new()
            } else {
                format!(".{}", fraction)
            }
        }
        _ => rest.to_string(),
    };

    Some(format!("{}{}", int_part, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_name_folding() {
        assert_eq!(normalize_series_name("The Amazing Spider-Man"), "amazing spider man");
        assert_eq!(normalize_series_name("  Saga  "), "saga");
        assert_eq!(normalize_series_name("Cloak & Dagger"), "cloak and dagger");
        assert_eq!(normalize_series_name("Jonah's War"), "jonahs war");
        assert_eq!(normalize_series_name("The"), "the");
    }

    #[test]
    fn test_issue_number_folding() {
        assert_eq!(normalize_issue_number("007").as_deref(), Some("7"));
        assert_eq!(normalize_issue_number("#12").as_deref(), Some("12"));
        assert_eq!(normalize_issue_number("000").as_deref(), Some("0"));
        assert_eq!(normalize_issue_number("12.50").as_deref(), Some("12.5"));
        assert_eq!(normalize_issue_number("12.0").as_deref(), Some("12"));
        assert_eq!(normalize_issue_number("001AU").as_deref(), Some("1au"));
        assert_eq!(normalize_issue_number("Annual").as_deref(), Some("annual"));
        assert_eq!(normalize_issue_number("  "), None);
    }
}
