// tests/unit_selector_test.rs

use auroralink::config::WrapperSettings;
use auroralink::core::WrapperError;
use auroralink::core::host::{HostAvailability, HostInfo, HostRole};
use auroralink::core::selectors::{
    HighestWeightHostSelector, HostSelector, LeastConnectionsHostSelector, PoolStatus,
    RandomHostSelector, RoundRobinHostSelector, SelectorRegistry,
};
use std::collections::HashMap;
use std::sync::Arc;

fn reader(id: &str, weight: u64) -> HostInfo {
    HostInfo::new(format!("{id}.cluster.local"), Some(5432), HostRole::Reader)
        .with_host_id(id)
        .with_weight(weight)
}

fn writer(id: &str) -> HostInfo {
    HostInfo::new(format!("{id}.cluster.local"), Some(5432), HostRole::Writer).with_host_id(id)
}

#[test]
fn weighted_round_robin_is_deterministic() {
    let selector = RoundRobinHostSelector::new();
    let settings = WrapperSettings {
        round_robin_host_weight_pairs: "r1:2,r2:3".to_string(),
        ..WrapperSettings::default()
    };
    let hosts = vec![writer("w1"), reader("r1", 100), reader("r2", 100)];

    let picks: Vec<String> = (0..10)
        .map(|_| {
            selector
                .select(&hosts, HostRole::Reader, &settings)
                .unwrap()
                .host_id_or_host()
                .to_string()
        })
        .collect();
    assert_eq!(
        picks,
        vec!["r1", "r1", "r2", "r2", "r2", "r1", "r1", "r2", "r2", "r2"]
    );
}

#[test]
fn round_robin_weight_distribution_holds_over_many_picks() {
    let selector = RoundRobinHostSelector::new();
    let settings = WrapperSettings {
        round_robin_host_weight_pairs: "r1:2,r2:3".to_string(),
        ..WrapperSettings::default()
    };
    let hosts = vec![reader("r1", 100), reader("r2", 100)];

    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..50 {
        let pick = selector.select(&hosts, HostRole::Reader, &settings).unwrap();
        *counts.entry(pick.host_id_or_host().to_string()).or_insert(0) += 1;
    }
    assert_eq!(counts["r1"], 20);
    assert_eq!(counts["r2"], 30);
}

#[test]
fn round_robin_rejects_invalid_weights() {
    let selector = RoundRobinHostSelector::new();
    let hosts = vec![reader("r1", 100)];

    let bad_pair = WrapperSettings {
        round_robin_host_weight_pairs: "r1:heavy".to_string(),
        ..WrapperSettings::default()
    };
    assert!(matches!(
        selector.select(&hosts, HostRole::Reader, &bad_pair),
        Err(WrapperError::IllegalArgument(_))
    ));

    let zero_weight = WrapperSettings {
        round_robin_host_weight_pairs: "r1:0".to_string(),
        ..WrapperSettings::default()
    };
    assert!(matches!(
        selector.select(&hosts, HostRole::Reader, &zero_weight),
        Err(WrapperError::IllegalArgument(_))
    ));
}

#[test]
fn highest_weight_picks_the_heaviest_reader() {
    let selector = HighestWeightHostSelector;
    let settings = WrapperSettings::default();
    let hosts = vec![reader("r1", 10), reader("r2", 90), reader("r3", 50)];
    let pick = selector.select(&hosts, HostRole::Reader, &settings).unwrap();
    assert_eq!(pick.host_id_or_host(), "r2");
}

struct FixedPoolStatus(HashMap<String, usize>);

impl PoolStatus for FixedPoolStatus {
    fn in_use_count(&self, url: &str) -> usize {
        self.0.get(url).copied().unwrap_or(0)
    }
}

#[test]
fn least_connections_picks_the_idlest_host() {
    let counts = HashMap::from([
        ("r1.cluster.local:5432".to_string(), 4),
        ("r2.cluster.local:5432".to_string(), 1),
        ("r3.cluster.local:5432".to_string(), 2),
    ]);
    let selector = LeastConnectionsHostSelector::new(Arc::new(FixedPoolStatus(counts)));
    let settings = WrapperSettings::default();
    let hosts = vec![reader("r1", 100), reader("r2", 100), reader("r3", 100)];
    let pick = selector.select(&hosts, HostRole::Reader, &settings).unwrap();
    assert_eq!(pick.host_id_or_host(), "r2");
}

#[test]
fn selectors_fail_when_no_host_matches_the_role() {
    let settings = WrapperSettings::default();
    let only_writer = vec![writer("w1")];
    assert!(matches!(
        RandomHostSelector.select(&only_writer, HostRole::Reader, &settings),
        Err(WrapperError::UnavailableHost(_))
    ));

    let down_reader =
        vec![reader("r1", 100).with_availability(HostAvailability::NotAvailable)];
    assert!(matches!(
        RandomHostSelector.select(&down_reader, HostRole::Reader, &settings),
        Err(WrapperError::UnavailableHost(_))
    ));
}

#[test]
fn registry_rejects_unknown_strategies() {
    let registry = SelectorRegistry::new(None);
    assert!(registry.for_strategy("random").is_ok());
    assert!(matches!(
        registry.for_strategy("fastest"),
        Err(WrapperError::UnsupportedStrategy(_))
    ));
}
