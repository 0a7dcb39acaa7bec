// src/core/custom_endpoint/mod.rs

//! Custom-endpoint support: background reconciliation of an RDS custom
//! endpoint's member list into per-logical-connection allow/block sets.

mod monitor;

pub use monitor::CustomEndpointMonitor;

use crate::core::errors::WrapperError;
use async_trait::async_trait;
use std::collections::HashSet;

/// The instance filter a custom endpoint induces. `None` on a side means "no
/// constraint from this side"; the effective allowed set is
/// `(allowed ?? ALL) \ (blocked ?? ∅)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllowedAndBlockedHosts {
    pub allowed: Option<HashSet<String>>,
    pub blocked: Option<HashSet<String>>,
}

impl AllowedAndBlockedHosts {
    pub fn allows(&self, instance_id: &str) -> bool {
        if let Some(blocked) = &self.blocked {
            if blocked.contains(instance_id) {
                return false;
            }
        }
        match &self.allowed {
            Some(allowed) => allowed.contains(instance_id),
            None => true,
        }
    }
}

/// How a custom endpoint describes its member list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberListType {
    /// The listed instances are the members.
    Static,
    /// Every cluster instance except the listed ones is a member.
    Exclusion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomEndpointRoleType {
    Any,
    Reader,
    Writer,
}

/// The control-plane description of one custom endpoint, as returned by
/// `DescribeDBClusterEndpoints`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbClusterEndpoint {
    pub endpoint_identifier: String,
    pub cluster_identifier: String,
    pub url: String,
    pub role_type: CustomEndpointRoleType,
    pub static_members: Vec<String>,
    pub excluded_members: Vec<String>,
}

/// The reconciled view the monitor diffs against. Equality is structural on
/// every field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomEndpointInfo {
    pub endpoint_id: String,
    pub cluster_id: String,
    pub url: String,
    pub role_type: CustomEndpointRoleType,
    pub member_list_type: MemberListType,
    pub members: HashSet<String>,
}

impl CustomEndpointInfo {
    pub fn from_endpoint(endpoint: &DbClusterEndpoint) -> Self {
        let (member_list_type, members) = if endpoint.excluded_members.is_empty() {
            (
                MemberListType::Static,
                endpoint.static_members.iter().cloned().collect(),
            )
        } else {
            (
                MemberListType::Exclusion,
                endpoint.excluded_members.iter().cloned().collect(),
            )
        };
        Self {
            endpoint_id: endpoint.endpoint_identifier.clone(),
            cluster_id: endpoint.cluster_identifier.clone(),
            url: endpoint.url.clone(),
            role_type: endpoint.role_type,
            member_list_type,
            members,
        }
    }

    /// The allow/block sets this endpoint's member list induces.
    pub fn to_allowed_and_blocked(&self) -> AllowedAndBlockedHosts {
        match self.member_list_type {
            MemberListType::Static => AllowedAndBlockedHosts {
                allowed: Some(self.members.clone()),
                blocked: None,
            },
            MemberListType::Exclusion => AllowedAndBlockedHosts {
                allowed: None,
                blocked: Some(self.members.clone()),
            },
        }
    }
}

/// Narrow control-plane seam; the AWS SDK is out of scope and tests supply an
/// in-memory implementation.
#[async_trait]
pub trait RdsApiClient: Send + Sync {
    async fn describe_custom_endpoints(
        &self,
        endpoint_identifier: &str,
        region: &str,
    ) -> Result<Vec<DbClusterEndpoint>, WrapperError>;
}

/// Receives allow/block publications; implemented by the plugin service.
pub trait AllowedHostsSink: Send + Sync {
    fn apply_allowed_and_blocked(&self, hosts: AllowedAndBlockedHosts);
}
