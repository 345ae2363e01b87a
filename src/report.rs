//! Discovery report persistence (C8): the JSON file `find` writes and
//! `send` reads back, per SPEC_FULL §6 "Local state" / §4's
//! `DiscoveryReportEntry`.

use crate::discovery::ServiceRecord;
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::path::Path;
use std::time::SystemTime;
use tracing::warn;

/// A peer's discovery state, serialized field-for-field from
/// [`ServiceRecord`] the way `original_source/opendrop/cli.py`'s
/// `node_info` dict does.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveryReportEntry {
    pub name: Option<String>,
    pub hostname: String,
    pub address: Ipv6Addr,
    pub port: u16,
    pub id: String,
    pub flags: u32,
    pub discoverable: bool,
}

impl From<&ServiceRecord> for DiscoveryReportEntry {
    fn from(record: &ServiceRecord) -> Self {
        Self {
            name: record.name.clone(),
            hostname: record.hostname.clone(),
            address: record.address,
            port: record.port,
            id: record.service_id.clone(),
            flags: record.flags,
            discoverable: record.discoverable(),
        }
    }
}

pub fn write(path: &Path, entries: &[DiscoveryReportEntry]) -> std::io::Result<()> {
    let json = serde_json::to_string(entries)?;
    std::fs::write(path, json)
}

pub fn read(path: &Path) -> std::io::Result<Vec<DiscoveryReportEntry>> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Age of the discovery report in seconds, `None` if it doesn't exist yet.
/// Callers warn (not fail) when this exceeds 60s, per SPEC_FULL §8.
pub fn age_seconds(path: &Path) -> std::io::Result<f64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(SystemTime::now()
        .duration_since(modified)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0))
}

pub const STALE_AFTER_SECS: f64 = 60.0;

pub fn warn_if_stale(path: &Path) {
    match age_seconds(path) {
        Ok(age) if age > STALE_AFTER_SECS => {
            warn!(
                "discovery report is {:.1}s old, consider running `find` again",
                age
            );
        }
        Ok(_) => {}
        Err(e) => warn!("could not stat discovery report: {}", e),
    }
}

/// Resolves a receiver selector against a discovery report: by list index,
/// then by 12-hex service id, then by computer name, in that order
/// (`original_source/opendrop/cli.py::_get_receiver_info`).
pub fn resolve_selector<'a>(
    entries: &'a [DiscoveryReportEntry],
    selector: &str,
) -> Option<&'a DiscoveryReportEntry> {
    if let Ok(index) = selector.parse::<usize>() {
        if let Some(entry) = entries.get(index) {
            return Some(entry);
        }
    }
    if selector.len() == 12 {
        if let Some(entry) = entries.iter().find(|e| e.id == selector) {
            return Some(entry);
        }
    }
    entries.iter().find(|e| e.name.as_deref() == Some(selector))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<DiscoveryReportEntry> {
        vec![
            DiscoveryReportEntry {
                name: Some("Jane's Mac".to_string()),
                hostname: "jane.local.".to_string(),
                address: "fe80::1".parse().unwrap(),
                port: 8770,
                id: "aaaaaaaaaaaa".to_string(),
                flags: 0x88,
                discoverable: true,
            },
            DiscoveryReportEntry {
                name: None,
                hostname: "quiet.local.".to_string(),
                address: "fe80::2".parse().unwrap(),
                port: 8771,
                id: "bbbbbbbbbbbb".to_string(),
                flags: 0x08,
                discoverable: false,
            },
        ]
    }

    #[test]
    fn resolves_by_index_then_id_then_name() {
        let entries = sample();
        assert_eq!(resolve_selector(&entries, "0").unwrap().id, "aaaaaaaaaaaa");
        assert_eq!(
            resolve_selector(&entries, "bbbbbbbbbbbb").unwrap().hostname,
            "quiet.local."
        );
        assert_eq!(
            resolve_selector(&entries, "Jane's Mac").unwrap().id,
            "aaaaaaaaaaaa"
        );
        assert!(resolve_selector(&entries, "nonexistent").is_none());
    }
}
