//! PII masking applied before any content reaches persistent storage.
//!
//! [`PatternRedactor`] replaces detected personally identifiable substrings
//! with fixed per-category placeholder tags. Patterns run in strict
//! precedence order — payment cards before government IDs before phone
//! numbers, and so on — because a later, shorter pattern can otherwise
//! partially match inside an earlier, longer one (a phone regex applied first
//! would chew the middle out of a 16-digit card number). The placeholders
//! contain no digits and match no pattern, so redaction is idempotent:
//! `redact(redact(x)) == redact(x)`.
//!
//! Redaction is a total function. It never fails; text with no PII passes
//! through unchanged.

use once_cell::sync::Lazy;
use regex::Regex;

pub const CARD_TAG: &str = "[CARD]";
pub const SSN_TAG: &str = "[SSN]";
pub const PHONE_TAG: &str = "[PHONE]";
pub const EMAIL_TAG: &str = "[EMAIL]";
pub const IP_TAG: &str = "[IP]";
pub const DOB_TAG: &str = "[DOB]";

/// Masks PII in text. Total over all inputs; implementations never error.
pub trait Redactor: Send + Sync {
    fn redact(&self, text: &str) -> String;

    /// Pattern category names, in application order. For audit logging.
    fn patterns_handled(&self) -> &[&'static str];

    /// Redact and report whether anything changed. The report is used only
    /// for audit logging, never persisted.
    fn redact_with_report(&self, text: &str) -> (String, bool) {
        let out = self.redact(text);
        let changed = out != text;
        (out, changed)
    }
}

// Application order is load-bearing; see module docs.
static PATTERNS: Lazy<Vec<(&'static str, Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            "payment_card",
            // 13-16 digits with optional single space/dash separators.
            Regex::new(r"\b\d(?:[ -]?\d){12,15}\b").unwrap(),
            CARD_TAG,
        ),
        (
            "government_id",
            Regex::new(r"\b\d{3}[- ]\d{2}[- ]\d{4}\b").unwrap(),
            SSN_TAG,
        ),
        (
            "phone",
            Regex::new(r"(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]\d{3}[-. ]\d{4}\b").unwrap(),
            PHONE_TAG,
        ),
        (
            "email",
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
            EMAIL_TAG,
        ),
        (
            "ip_address",
            // IPv4, then IPv6 (two or more hextet groups).
            Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b|\b(?:[0-9A-Fa-f]{1,4}:){2,7}[0-9A-Fa-f]{1,4}\b")
                .unwrap(),
            IP_TAG,
        ),
        (
            "date_of_birth",
            Regex::new(
                r"\b(?:0?[1-9]|1[0-2])/(?:0?[1-9]|[12]\d|3[01])/(?:19|20)\d{2}\b|\b(?:19|20)\d{2}-(?:0?[1-9]|1[0-2])-(?:0?[1-9]|[12]\d|3[01])\b",
            )
            .unwrap(),
            DOB_TAG,
        ),
    ]
});

// Spelled-out dates are only treated as DOB after a birth cue, to avoid
// masking ordinary dates in running text.
static DOB_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(born on|born|date of birth|dob)[:,]?\s+(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+(?:19|20)\d{2}\b",
    )
    .unwrap()
});

static PATTERN_NAMES: Lazy<Vec<&'static str>> =
    Lazy::new(|| PATTERNS.iter().map(|(name, _, _)| *name).collect());

/// The reference redactor: sequential regex substitution in fixed precedence
/// order.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternRedactor;

impl Redactor for PatternRedactor {
    fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (_, pattern, tag) in PATTERNS.iter() {
            out = pattern.replace_all(&out, *tag).into_owned();
        }
        out = DOB_CUE
            .replace_all(&out, format!("$1 {}", DOB_TAG))
            .into_owned();
        out
    }

    fn patterns_handled(&self) -> &[&'static str] {
        &PATTERN_NAMES
    }
}

/// Identity redactor for tests and benchmarks that need unredacted content.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRedactor;

impl Redactor for NoopRedactor {
    fn redact(&self, text: &str) -> String {
        text.to_string()
    }

    fn patterns_handled(&self) -> &[&'static str] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redact(text: &str) -> String {
        PatternRedactor.redact(text)
    }

    #[test]
    fn test_card_number_variants() {
        for input in [
            "4111111111111111",
            "4111 1111 1111 1111",
            "4111-1111-1111-1111",
        ] {
            let out = redact(input);
            assert!(out.contains(CARD_TAG), "missed card in {:?}", input);
            assert!(!out.chars().any(|c| c.is_ascii_digit()), "digits left: {}", out);
        }
    }

    #[test]
    fn test_card_before_phone_precedence() {
        // A phone pattern applied first would partially match inside the
        // card number. The card must win whole.
        let out = redact("Call 555-123-4567 or card 4111 1111 1111 1111");
        assert!(out.contains(PHONE_TAG), "no phone tag: {}", out);
        assert!(out.contains(CARD_TAG), "no card tag: {}", out);
        assert!(!out.chars().any(|c| c.is_ascii_digit()), "digits left: {}", out);
    }

    #[test]
    fn test_ssn() {
        assert_eq!(redact("ssn 123-45-6789 on file"), format!("ssn {} on file", SSN_TAG));
    }

    #[test]
    fn test_phone_forms() {
        for input in ["(555) 123-4567", "555-123-4567", "+1 555 123 4567", "555.123.4567"] {
            let out = redact(input);
            assert!(out.contains(PHONE_TAG), "missed phone in {:?}: {}", input, out);
            assert!(!out.chars().any(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_email() {
        let out = redact("write to jane.doe+spam@example.co.uk today");
        assert_eq!(out, format!("write to {} today", EMAIL_TAG));
    }

    #[test]
    fn test_ip_addresses() {
        let out = redact("host 192.168.1.10 and fe80:0:0:0:0:0:0:1 reachable");
        assert_eq!(out, format!("host {} and {} reachable", IP_TAG, IP_TAG));
    }

    #[test]
    fn test_dob_formats() {
        assert!(redact("dob 04/12/1985").contains(DOB_TAG));
        assert!(redact("born 1985-04-12").contains(DOB_TAG));
        let cued = redact("She was born on March 3, 1990 in Ohio");
        assert!(cued.contains(DOB_TAG), "cue form missed: {}", cued);
        assert!(!cued.contains("1990"));
    }

    #[test]
    fn test_plain_dates_in_text_survive() {
        // No birth cue, spelled-out month: not DOB.
        let out = redact("The meeting is on March 3 at noon");
        assert_eq!(out, "The meeting is on March 3 at noon");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "Call 555-123-4567 or card 4111 1111 1111 1111",
            "ssn 123-45-6789, mail a@b.com, ip 10.0.0.1, dob 01/02/1990",
            "no pii here at all",
            "",
        ];
        for input in inputs {
            let once = redact(input);
            let twice = redact(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_clean_text_unchanged() {
        let text = "Dock rules: trucks over 40 feet must use Dock 7 or 8 between 6AM-10AM.";
        let (out, changed) = PatternRedactor.redact_with_report(text);
        assert_eq!(out, text);
        assert!(!changed);
    }

    #[test]
    fn test_noop_is_identity() {
        let text = "card 4111 1111 1111 1111";
        assert_eq!(NoopRedactor.redact(text), text);
        assert!(NoopRedactor.patterns_handled().is_empty());
    }

    #[test]
    fn test_patterns_handled_order() {
        let names = PatternRedactor.patterns_handled();
        assert_eq!(
            names,
            &[
                "payment_card",
                "government_id",
                "phone",
                "email",
                "ip_address",
                "date_of_birth"
            ]
        );
    }
}
