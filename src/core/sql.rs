// src/core/sql.rs

//! Minimal SQL inspection: read-only toggles and transaction boundaries.
//! This is deliberately not a parser; the wrapper only needs to recognize a
//! handful of statement shapes.

use once_cell::sync::Lazy;
use regex::Regex;

static SET_READ_ONLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*SET\s+(SESSION\s+)?(CHARACTERISTICS\s+AS\s+)?TRANSACTION\s+READ\s+(?P<mode>ONLY|WRITE)\s*;?\s*$",
    )
    .expect("read-only pattern is valid")
});

static BEGIN_TRANSACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(BEGIN|START\s+TRANSACTION)\b").expect("begin pattern is valid")
});

static END_TRANSACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(COMMIT|ROLLBACK|END)\b").expect("end pattern is valid")
});

/// `Some(true)` for a `SET ... TRANSACTION READ ONLY`, `Some(false)` for the
/// `READ WRITE` form, `None` for anything else.
pub fn parse_set_read_only(sql: &str) -> Option<bool> {
    let caps = SET_READ_ONLY.captures(sql)?;
    Some(caps["mode"].eq_ignore_ascii_case("ONLY"))
}

pub fn starts_transaction(sql: &str) -> bool {
    BEGIN_TRANSACTION.is_match(sql)
}

pub fn closes_transaction(sql: &str) -> bool {
    END_TRANSACTION.is_match(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_read_only_toggles() {
        assert_eq!(
            parse_set_read_only("SET SESSION TRANSACTION READ ONLY"),
            Some(true)
        );
        assert_eq!(
            parse_set_read_only("set session characteristics as transaction read write;"),
            Some(false)
        );
        assert_eq!(parse_set_read_only("SELECT 1"), None);
    }

    #[test]
    fn recognizes_transaction_boundaries() {
        assert!(starts_transaction("BEGIN"));
        assert!(starts_transaction("start transaction read only"));
        assert!(closes_transaction("COMMIT"));
        assert!(closes_transaction("rollback"));
        assert!(!starts_transaction("SELECT 1"));
        assert!(!closes_transaction("SELECT 1"));
    }
}
