// src/core/rds_url.rs

//! Classifies RDS hostnames and extracts cluster/instance identifiers.
//!
//! These are pure functions over DNS names; no lookups happen here.

use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use strum_macros::Display;

/// What kind of endpoint a hostname denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum RdsUrlType {
    /// `name.cluster-xyz.region.rds.amazonaws.com`
    RdsWriterCluster,
    /// `name.cluster-ro-xyz.region.rds.amazonaws.com`
    RdsReaderCluster,
    /// `name.cluster-custom-xyz.region.rds.amazonaws.com`
    RdsCustomCluster,
    /// `name.shardgrp-xyz.region.rds.amazonaws.com`
    RdsLimitless,
    /// `name.proxy-xyz.region.rds.amazonaws.com`
    RdsProxy,
    /// `name.xyz.region.rds.amazonaws.com`
    RdsInstance,
    /// An `rds.amazonaws.com` name that fits none of the shapes above.
    OtherRds,
    /// Anything else, including IP addresses and on-prem hostnames.
    NotRds,
}

impl RdsUrlType {
    pub fn is_rds(&self) -> bool {
        *self != RdsUrlType::NotRds
    }

    pub fn is_rds_cluster(&self) -> bool {
        matches!(
            self,
            RdsUrlType::RdsWriterCluster | RdsUrlType::RdsReaderCluster
        )
    }
}

static RDS_DNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<id>[^.]+)\.(?P<dns>proxy-|cluster-|cluster-ro-|cluster-custom-|shardgrp-|limitless-)?(?P<sub>[a-zA-Z0-9]+)\.(?P<region>[a-zA-Z0-9-]+)\.rds\.(?P<domain>amazonaws\.com(\.cn)?)$",
    )
    .expect("RDS DNS pattern is valid")
});

static GREEN_HOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<prefix>.+)-green-[0-9a-z]{6}(?P<suffix>\..+)$")
        .expect("green-host pattern is valid")
});

/// Classifies a hostname.
pub fn identify(host: &str) -> RdsUrlType {
    let host = host.trim().trim_end_matches('.');
    if host.is_empty() || is_ip_address(host) {
        return RdsUrlType::NotRds;
    }
    let lowered = host.to_ascii_lowercase();
    let Some(caps) = RDS_DNS.captures(&lowered) else {
        if lowered.ends_with(".rds.amazonaws.com") || lowered.ends_with(".rds.amazonaws.com.cn") {
            return RdsUrlType::OtherRds;
        }
        return RdsUrlType::NotRds;
    };

    match caps.name("dns").map(|m| m.as_str()) {
        Some("cluster-") => RdsUrlType::RdsWriterCluster,
        Some("cluster-ro-") => RdsUrlType::RdsReaderCluster,
        Some("cluster-custom-") => RdsUrlType::RdsCustomCluster,
        Some("shardgrp-") | Some("limitless-") => RdsUrlType::RdsLimitless,
        Some("proxy-") => RdsUrlType::RdsProxy,
        _ => RdsUrlType::RdsInstance,
    }
}

/// The leading identifier of an RDS name: the cluster id for cluster
/// endpoints, the instance id for instance endpoints.
pub fn extract_identifier(host: &str) -> Option<String> {
    let lowered = host.trim().trim_end_matches('.').to_ascii_lowercase();
    RDS_DNS
        .captures(&lowered)
        .map(|caps| caps["id"].to_string())
}

/// The region portion of an RDS name.
pub fn extract_region(host: &str) -> Option<String> {
    let lowered = host.trim().trim_end_matches('.').to_ascii_lowercase();
    RDS_DNS
        .captures(&lowered)
        .map(|caps| caps["region"].to_string())
}

/// Derives the `?`-pattern used to build instance DNS names from any endpoint
/// of the same cluster: `my-cluster.cluster-xyz.region.rds.amazonaws.com`
/// becomes `?.xyz.region.rds.amazonaws.com`.
pub fn instance_pattern(host: &str) -> Option<String> {
    let lowered = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let caps = RDS_DNS.captures(&lowered)?;
    Some(format!(
        "?.{}.{}.rds.{}",
        &caps["sub"], &caps["region"], &caps["domain"]
    ))
}

/// Builds an instance endpoint from a `?`-pattern and an instance id.
pub fn apply_instance_pattern(pattern: &str, instance_id: &str) -> String {
    pattern.replacen('?', instance_id, 1)
}

/// True for the not-yet-promoted side of an RDS blue/green deployment
/// (`name-green-abc123.xyz.region.rds.amazonaws.com`).
pub fn is_green_host(host: &str) -> bool {
    GREEN_HOST.is_match(&host.to_ascii_lowercase())
}

/// Strips the `-green-xxxxxx` infix, producing the blue-side name.
pub fn remove_green_prefix(host: &str) -> String {
    match GREEN_HOST.captures(host) {
        Some(caps) => format!("{}{}", &caps["prefix"], &caps["suffix"]),
        None => host.to_string(),
    }
}

pub fn is_ip_address(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_cluster_endpoints() {
        assert_eq!(
            identify("my-cluster.cluster-abc123.us-east-2.rds.amazonaws.com"),
            RdsUrlType::RdsWriterCluster
        );
        assert_eq!(
            identify("my-cluster.cluster-ro-abc123.us-east-2.rds.amazonaws.com"),
            RdsUrlType::RdsReaderCluster
        );
        assert_eq!(
            identify("friday.cluster-custom-abc123.eu-west-1.rds.amazonaws.com"),
            RdsUrlType::RdsCustomCluster
        );
    }

    #[test]
    fn classifies_instance_and_misc() {
        assert_eq!(
            identify("instance-7.abc123.us-east-2.rds.amazonaws.com"),
            RdsUrlType::RdsInstance
        );
        assert_eq!(
            identify("grp.shardgrp-abc123.us-east-2.rds.amazonaws.com"),
            RdsUrlType::RdsLimitless
        );
        assert_eq!(
            identify("p.proxy-abc123.us-east-2.rds.amazonaws.com"),
            RdsUrlType::RdsProxy
        );
        assert_eq!(identify("10.0.1.14"), RdsUrlType::NotRds);
        assert_eq!(identify("db.internal.corp"), RdsUrlType::NotRds);
    }

    #[test]
    fn extracts_ids_and_patterns() {
        let host = "my-cluster.cluster-abc123.us-east-2.rds.amazonaws.com";
        assert_eq!(extract_identifier(host).as_deref(), Some("my-cluster"));
        assert_eq!(extract_region(host).as_deref(), Some("us-east-2"));
        assert_eq!(
            instance_pattern(host).as_deref(),
            Some("?.abc123.us-east-2.rds.amazonaws.com")
        );
        assert_eq!(
            apply_instance_pattern("?.abc123.us-east-2.rds.amazonaws.com", "instance-1"),
            "instance-1.abc123.us-east-2.rds.amazonaws.com"
        );
    }

    #[test]
    fn green_host_round_trip() {
        let green = "my-db-green-1a2b3c.abc.us-east-2.rds.amazonaws.com";
        assert!(is_green_host(green));
        assert_eq!(
            remove_green_prefix(green),
            "my-db.abc.us-east-2.rds.amazonaws.com"
        );
        assert!(!is_green_host("my-db.abc.us-east-2.rds.amazonaws.com"));
    }
}
