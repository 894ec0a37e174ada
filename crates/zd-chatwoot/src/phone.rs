//! Phone number matching for contact lookup
//!
//! Brazilian mobiles exist in two forms, with and without the ninth digit
//! (`55 DD 9XXXXXXXX` / `55 DD XXXXXXXX`). With merging on, both resolve
//! to the same contact.

use std::sync::LazyLock;

use regex::Regex;

static BRAZIL_MOBILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^55(\d{2})9?(\d{8})$").expect("valid Brazil mobile pattern"));

/// Digit strings that identify the same subscriber, the given form first
pub fn variants(digits: &str, merge_brazil: bool) -> Vec<String> {
    let mut out = vec![digits.to_string()];
    if !merge_brazil {
        return out;
    }
    if let Some(caps) = BRAZIL_MOBILE.captures(digits) {
        let (ddd, rest) = (&caps[1], &caps[2]);
        for candidate in [format!("55{}9{}", ddd, rest), format!("55{}{}", ddd, rest)] {
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        }
    }
    out
}

/// Stable cache key: the nine-digit form when merging
pub fn canonical(digits: &str, merge_brazil: bool) -> String {
    if merge_brazil {
        if let Some(caps) = BRAZIL_MOBILE.captures(digits) {
            return format!("55{}9{}", &caps[1], &caps[2]);
        }
    }
    digits.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brazil_variants() {
        assert_eq!(
            variants("5511987654321", true),
            vec!["5511987654321", "551187654321"]
        );
        assert_eq!(
            variants("551187654321", true),
            vec!["551187654321", "5511987654321"]
        );
        assert_eq!(variants("5511987654321", false), vec!["5511987654321"]);
        assert_eq!(variants("15551234567", true), vec!["15551234567"]);
    }

    #[test]
    fn test_canonical_form() {
        assert_eq!(canonical("551187654321", true), "5511987654321");
        assert_eq!(canonical("551187654321", false), "551187654321");
        assert_eq!(canonical("15551234567", true), "15551234567");
    }
}
