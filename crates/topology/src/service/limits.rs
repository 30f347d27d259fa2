//! Ranges the container backend accepts, checked before any external call.

use crate::error::{Result, TopologyError};

/// Log retention periods, in days, accepted by the log backend.
pub const LOG_RETENTION_DAYS: &[u32] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

/// Maximum length of a service name.
pub const MAX_SERVICE_NAME_LEN: usize = 255;

/// Memory sizes (MiB) valid for a CPU size (units, 1024 = one vCPU).
fn memory_options(cpu: u32) -> Option<Vec<u32>> {
    let stepped = |from: u32, to: u32, step: u32| -> Vec<u32> {
        (from..=to).step_by(step as usize).collect()
    };
    match cpu {
        256 => Some(vec![512, 1024, 2048]),
        512 => Some(stepped(1024, 4096, 1024)),
        1024 => Some(stepped(2048, 8192, 1024)),
        2048 => Some(stepped(4096, 16384, 1024)),
        4096 => Some(stepped(8192, 30720, 1024)),
        8192 => Some(stepped(16384, 61440, 4096)),
        16384 => Some(stepped(32768, 122880, 8192)),
        _ => None,
    }
}

/// Check a task's CPU/memory pair against the supported task sizes.
pub fn validate_task_size(cpu: u32, memory_mib: u32) -> Result<()> {
    let options = memory_options(cpu).ok_or_else(|| {
        TopologyError::invalid(
            "cpu",
            format!("{cpu} is not a supported task size (256, 512, 1024, 2048, 4096, 8192, 16384)"),
        )
    })?;

    if !options.contains(&memory_mib) {
        return Err(TopologyError::invalid(
            "memory",
            format!(
                "{memory_mib} MiB is not valid with {cpu} cpu units (valid: {})",
                options
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ));
    }
    Ok(())
}

pub fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(TopologyError::invalid("port", "must be a positive integer"));
    }
    Ok(())
}

pub fn validate_desired_count(desired_count: u32) -> Result<()> {
    if desired_count == 0 {
        return Err(TopologyError::invalid("desired count", "must be at least 1"));
    }
    Ok(())
}

pub fn validate_log_retention(days: u32) -> Result<()> {
    if !LOG_RETENTION_DAYS.contains(&days) {
        return Err(TopologyError::invalid(
            "log retention",
            format!("{days} days is not a supported retention period"),
        ));
    }
    Ok(())
}

/// Letters, digits, hyphens and underscores, starting with a letter.
pub fn validate_service_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_SERVICE_NAME_LEN
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(TopologyError::invalid(
            "service name",
            format!("{name:?} must start with a letter and contain only letters, digits, '-' or '_'"),
        ));
    }
    Ok(())
}

/// Log group names: 1-512 characters from `[A-Za-z0-9_\-/.#]`.
pub fn validate_log_group_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 512
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/' | '.' | '#'));
    if !valid {
        return Err(TopologyError::invalid(
            "log group name",
            format!("{name:?} is not a valid log group name"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_sizes() {
        assert!(validate_task_size(256, 512).is_ok());
        assert!(validate_task_size(256, 2048).is_ok());
        assert!(validate_task_size(1024, 3072).is_ok());
        assert!(validate_task_size(8192, 20480).is_ok());

        assert!(validate_task_size(256, 4096).is_err());
        assert!(validate_task_size(300, 512).is_err());
        assert!(validate_task_size(512, 512).is_err());
        assert!(validate_task_size(8192, 18432).is_err());
    }

    #[test]
    fn test_port_and_count() {
        assert!(validate_port(4000).is_ok());
        assert!(validate_port(0).unwrap_err().is_invalid_spec());
        assert!(validate_desired_count(1).is_ok());
        assert!(validate_desired_count(0).is_err());
    }

    #[test]
    fn test_log_retention() {
        assert!(validate_log_retention(7).is_ok());
        assert!(validate_log_retention(3653).is_ok());
        assert!(validate_log_retention(8).is_err());
        assert!(validate_log_retention(0).is_err());
    }

    #[test]
    fn test_names() {
        assert!(validate_service_name("functional-vote_api").is_ok());
        assert!(validate_service_name("1api").is_err());
        assert!(validate_service_name("api.v1").is_err());
        assert!(validate_log_group_name("/ecs/functional-vote").is_ok());
        assert!(validate_log_group_name("").is_err());
        assert!(validate_log_group_name("has space").is_err());
    }
}
