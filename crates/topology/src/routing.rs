//! Host-header routing from a shared listener to a service.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::{
    error::{Result, TopologyError},
    locator::{ListenerRef, NetworkRef, Protocol},
    service::ServiceDeployment,
};

/// Highest rule priority a listener accepts.
pub const MAX_RULE_PRIORITY: i64 = 50_000;
/// Maximum number of host-header values in one rule condition.
pub const MAX_HOST_HEADERS: usize = 5;
/// Maximum length of a target group name.
pub const MAX_TARGET_GROUP_NAME_LEN: usize = 32;
/// Health check path used for new target groups.
pub const DEFAULT_HEALTH_CHECK_PATH: &str = "/";

/// How a target group addresses its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TargetType {
    /// Targets are task IPs (awsvpc networking).
    Ip,
}

/// Pool of targets the listener forwards to. Bound to exactly one service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TargetGroup {
    pub name: String,
    pub port: u16,
    pub network: NetworkRef,
    pub protocol: Protocol,
    pub target_type: TargetType,
    /// The service registered as the sole target.
    pub target_service: String,
    pub health_check_path: String,
}

/// Listener rule forwarding matching host names to target groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingRule {
    pub priority: u32,
    pub host_headers: BTreeSet<String>,
    pub target_groups: Vec<TargetGroup>,
    pub listener: ListenerRef,
}

/// Create the target group for `service` and a host-header rule on `listener`.
///
/// Priority uniqueness across the live listener is not checked here; the
/// provisioning backend rejects collisions.
pub fn route(
    service: &ServiceDeployment,
    listener: &ListenerRef,
    host_headers: impl IntoIterator<Item = impl AsRef<str>>,
    priority: i64,
) -> Result<(TargetGroup, RoutingRule)> {
    route_with_health_check(
        service,
        listener,
        host_headers,
        priority,
        DEFAULT_HEALTH_CHECK_PATH,
    )
}

/// Like [`route`], with an explicit health check path.
pub fn route_with_health_check(
    service: &ServiceDeployment,
    listener: &ListenerRef,
    host_headers: impl IntoIterator<Item = impl AsRef<str>>,
    priority: i64,
    health_check_path: &str,
) -> Result<(TargetGroup, RoutingRule)> {
    let priority = validate_priority(priority)?;
    let host_headers = normalize_host_headers(host_headers)?;

    if !health_check_path.starts_with('/') {
        return Err(TopologyError::invalid(
            "health check path",
            format!("{health_check_path:?} must start with '/'"),
        ));
    }

    let target_group = TargetGroup {
        name: target_group_name(&service.service_name),
        port: service.task.port(),
        network: service.network.clone(),
        protocol: Protocol::Http,
        target_type: TargetType::Ip,
        target_service: service.service_name.clone(),
        health_check_path: health_check_path.to_string(),
    };

    let rule = RoutingRule {
        priority,
        host_headers,
        target_groups: vec![target_group.clone()],
        listener: listener.clone(),
    };

    tracing::debug!(
        target_group = %target_group.name,
        port = target_group.port,
        priority,
        listener = listener.arn(),
        "Composed routing rule"
    );

    Ok((target_group, rule))
}

/// Priorities must be in `1..=50000`.
pub fn validate_priority(priority: i64) -> Result<u32> {
    if priority <= 0 {
        return Err(TopologyError::invalid(
            "priority",
            format!("{priority} is not a positive integer"),
        ));
    }
    if priority > MAX_RULE_PRIORITY {
        return Err(TopologyError::invalid(
            "priority",
            format!("{priority} exceeds the maximum of {MAX_RULE_PRIORITY}"),
        ));
    }
    Ok(priority as u32)
}

/// Lowercase and check host names; `*` and `?` wildcards are allowed.
pub fn normalize_host_headers(
    host_headers: impl IntoIterator<Item = impl AsRef<str>>,
) -> Result<BTreeSet<String>> {
    let mut normalized = BTreeSet::new();
    for host in host_headers {
        let host = host.as_ref().trim().to_ascii_lowercase();
        let valid = !host.is_empty()
            && host.len() <= 128
            && host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '*' | '?'));
        if !valid {
            return Err(TopologyError::invalid(
                "host header",
                format!("{host:?} is not a valid host name"),
            ));
        }
        normalized.insert(host);
    }

    if normalized.is_empty() {
        return Err(TopologyError::invalid(
            "host headers",
            "at least one host name is required",
        ));
    }
    if normalized.len() > MAX_HOST_HEADERS {
        return Err(TopologyError::invalid(
            "host headers",
            format!(
                "{} host names given, a rule matches at most {MAX_HOST_HEADERS}",
                normalized.len()
            ),
        ));
    }
    Ok(normalized)
}

/// `<service>-tg`, limited to letters, digits and hyphens and to 32 characters.
pub fn target_group_name(service_name: &str) -> String {
    let sanitized: String = service_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let suffix = "-tg";
    let mut base: String = sanitized
        .chars()
        .take(MAX_TARGET_GROUP_NAME_LEN - suffix.len())
        .collect();
    while base.ends_with('-') {
        base.pop();
    }
    format!("{base}{suffix}")
}

/// Rules routed so far, checked for priority collisions per listener.
///
/// A rule re-added for the same service at the same priority replaces
/// the earlier one, so re-running an assembly for the same service is not a
/// collision.
#[derive(Debug, Default)]
pub struct RoutingPlan {
    rules: Vec<RoutingRule>,
    // listener arn -> priority -> routed service
    taken: BTreeMap<String, BTreeMap<u32, String>>,
}

impl RoutingPlan {
    /// Add a rule; fails when another service already uses its priority on the same listener.
    pub fn add(&mut self, rule: RoutingRule) -> Result<()> {
        let owner = rule_owner(&rule);
        let taken = self.taken.entry(rule.listener.arn().to_string()).or_default();

        match taken.get(&rule.priority).cloned() {
            Some(existing) if existing != owner => {
                return Err(TopologyError::invalid(
                    "priority",
                    format!(
                        "{} on listener {} is already used by {existing}",
                        rule.priority,
                        rule.listener.arn()
                    ),
                ));
            }
            Some(_) => {
                self.rules.retain(|r| {
                    !(r.priority == rule.priority && r.listener.arn() == rule.listener.arn())
                });
            }
            None => {
                taken.insert(rule.priority, owner);
            }
        }

        tracing::debug!(
            priority = rule.priority,
            listener = %rule.listener.arn(),
            "Routing rule added to plan"
        );
        self.rules.push(rule);
        Ok(())
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn into_rules(self) -> Vec<RoutingRule> {
        self.rules
    }
}

fn rule_owner(rule: &RoutingRule) -> String {
    rule.target_groups
        .iter()
        .map(|tg| tg.target_service.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
