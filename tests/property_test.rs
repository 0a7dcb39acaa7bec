// tests/property_test.rs

//! Property-based coverage for the pure helpers: URL classification and the
//! SQL statement inspectors must never panic and must obey their structural
//! invariants on arbitrary input.

use auroralink::core::rds_url;
use auroralink::core::sql;
use proptest::prelude::*;

proptest! {
    #[test]
    fn identify_never_panics(host in ".{0,253}") {
        let _ = rds_url::identify(&host);
    }

    #[test]
    fn green_prefix_removal_is_idempotent(host in "[a-z0-9-]{1,40}\\.[a-z0-9.-]{1,100}") {
        let once = rds_url::remove_green_prefix(&host);
        let twice = rds_url::remove_green_prefix(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn cluster_endpoints_classify_consistently(
        id in "[a-z][a-z0-9-]{0,30}",
        sub in "[a-z0-9]{1,14}",
        region in "[a-z]{2}-[a-z]{4,9}-[1-9]",
    ) {
        let writer = format!("{id}.cluster-{sub}.{region}.rds.amazonaws.com");
        let reader = format!("{id}.cluster-ro-{sub}.{region}.rds.amazonaws.com");
        prop_assert_eq!(rds_url::identify(&writer), rds_url::RdsUrlType::RdsWriterCluster);
        prop_assert_eq!(rds_url::identify(&reader), rds_url::RdsUrlType::RdsReaderCluster);
        // Both shapes of the same cluster share an instance pattern.
        prop_assert_eq!(
            rds_url::instance_pattern(&writer),
            rds_url::instance_pattern(&reader)
        );
        prop_assert_eq!(rds_url::extract_region(&writer), Some(region));
    }

    #[test]
    fn statement_inspection_never_panics(stmt in ".{0,200}") {
        let _ = sql::parse_set_read_only(&stmt);
        let _ = sql::starts_transaction(&stmt);
        let _ = sql::closes_transaction(&stmt);
    }

    #[test]
    fn read_only_toggles_round_trip(session in proptest::bool::ANY, read_only in proptest::bool::ANY) {
        let prefix = if session { "SET SESSION TRANSACTION" } else { "SET TRANSACTION" };
        let mode = if read_only { "READ ONLY" } else { "READ WRITE" };
        let stmt = format!("{prefix} {mode}");
        prop_assert_eq!(sql::parse_set_read_only(&stmt), Some(read_only));
    }
}
