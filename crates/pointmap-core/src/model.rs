//! Mapping data model.
//!
//! Three durable record kinds flow through the engine:
//! - [`DeviceGroup`]: a device-type template (the raw points every device of
//!   that type is expected to expose)
//! - [`DeviceInstance`]: one concrete device and the mappings resolved so far
//! - [`MappingRecord`]: the result of mapping one raw point of one device

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalizer::clean_point_name;

/// A raw BMS point as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPoint {
    /// Vendor tag name (e.g. `CHWRT`, `AHU-1_SaTemp`)
    #[serde(alias = "point")]
    pub name: String,
    /// Explicit device id, when the export tags it
    #[serde(default, alias = "deviceId", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Explicit device type, when the export tags it
    #[serde(default, alias = "deviceType", skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
}

impl RawPoint {
    /// Create an untagged raw point.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_id: None,
            device_type: None,
        }
    }

    /// Tag the point with its device id.
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Tag the point with its device type.
    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }
}

/// Identifies the subject of a [`MappingRecord`]: one point on one device.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceId {
    pub device_id: String,
    pub point: String,
}

impl SourceId {
    pub fn new(device_id: impl Into<String>, point: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            point: point.into(),
        }
    }

    /// Storage key form: `{device_id}:{point}`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.device_id, self.point)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device_id, self.point)
    }
}

/// Device-type template.
///
/// Created the first time a device type shows up in a batch, with the cleaned
/// point names seen for that type. The template is never rewritten by the
/// engine afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceGroup {
    pub id: String,
    /// Unique per type (e.g. `AHU`)
    pub device_type: String,
    /// Ordered, de-duplicated template points
    pub raw_points: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl DeviceGroup {
    pub fn new(device_type: impl Into<String>, raw_points: Vec<String>) -> Self {
        let mut points: Vec<String> = Vec::with_capacity(raw_points.len());
        for point in raw_points {
            if !points.contains(&point) {
                points.push(point);
            }
        }
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_type: device_type.into(),
            raw_points: points,
            created_at: Utc::now(),
        }
    }
}

/// Completion state of a device instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Pending,
    Partial,
    Complete,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Partial => "partial",
            InstanceStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point of a device instance that resolved to an EnOS path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPoint {
    pub enos_path: String,
    pub confidence: f32,
}

/// One concrete device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInstance {
    pub id: String,
    pub device_id: String,
    /// Lookup key of the owning [`DeviceGroup`] (its device type)
    pub device_type: String,
    /// Cleaned point name -> resolved path
    #[serde(default)]
    pub mappings: BTreeMap<String, ResolvedPoint>,
    #[serde(default)]
    pub status: InstanceStatus,
    pub updated_at: DateTime<Utc>,
}

impl DeviceInstance {
    pub fn new(device_id: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.into(),
            device_type: device_type.into(),
            mappings: BTreeMap::new(),
            status: InstanceStatus::Pending,
            updated_at: Utc::now(),
        }
    }

    /// Merge one accepted mapping, keeping every other point untouched.
    pub fn merge(&mut self, point: impl Into<String>, resolved: ResolvedPoint) {
        self.mappings.insert(point.into(), resolved);
        self.updated_at = Utc::now();
    }

    /// Derive the status from the group template.
    ///
    /// Template points are compared in cleaned form, so a curated template
    /// may carry vendor spellings (`CHW_Flow`). A template point counts as
    /// covered only when its mapping carries a confidence at or above
    /// `threshold`. An empty template is trivially complete.
    pub fn compute_status(&self, group: &DeviceGroup, threshold: f32) -> InstanceStatus {
        let template: BTreeSet<String> = group
            .raw_points
            .iter()
            .map(|point| clean_point_name(point))
            .filter(|point| !point.is_empty())
            .collect();

        let covered = template
            .iter()
            .filter(|point| {
                self.mappings
                    .get(point.as_str())
                    .is_some_and(|resolved| resolved.confidence >= threshold)
            })
            .count();

        if covered == template.len() {
            InstanceStatus::Complete
        } else if covered == 0 {
            InstanceStatus::Pending
        } else {
            InstanceStatus::Partial
        }
    }

    /// Recompute and store the status. Returns the new status.
    pub fn refresh_status(&mut self, group: &DeviceGroup, threshold: f32) -> InstanceStatus {
        self.status = self.compute_status(group, threshold);
        self.status
    }
}

/// Durable result of mapping one raw point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRecord {
    pub id: String,
    pub source_id: SourceId,
    pub enos_path: String,
    /// Always within [0, 1]
    pub confidence: f32,
    pub justification: String,
    pub last_validated: DateTime<Utc>,
}

impl MappingRecord {
    pub fn new(
        source_id: SourceId,
        enos_path: impl Into<String>,
        confidence: f32,
        justification: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id,
            enos_path: enos_path.into(),
            confidence,
            justification: justification.into(),
            last_validated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(confidence: f32) -> ResolvedPoint {
        ResolvedPoint {
            enos_path: "AHU/points/AHU_raw_status".to_string(),
            confidence,
        }
    }

    #[test]
    fn test_group_dedups_template() {
        let group = DeviceGroup::new(
            "AHU",
            vec!["SATEMP".to_string(), "RATEMP".to_string(), "SATEMP".to_string()],
        );
        assert_eq!(group.raw_points, vec!["SATEMP", "RATEMP"]);
    }

    #[test]
    fn test_status_pending_partial_complete() {
        let group = DeviceGroup::new("CHPL", vec!["CHWRT".to_string(), "CHW_FLOW".to_string()]);
        let mut instance = DeviceInstance::new("CHPL-1", "CHPL");
        assert_eq!(instance.refresh_status(&group, 0.7), InstanceStatus::Pending);

        instance.merge("CHWRT", resolved(0.9));
        assert_eq!(instance.refresh_status(&group, 0.7), InstanceStatus::Partial);

        instance.merge("CHW_FLOW", resolved(0.8));
        assert_eq!(instance.refresh_status(&group, 0.7), InstanceStatus::Complete);
    }

    #[test]
    fn test_status_ignores_mappings_below_threshold() {
        let group = DeviceGroup::new("CHPL", vec!["CHWRT".to_string()]);
        let mut instance = DeviceInstance::new("CHPL-1", "CHPL");
        instance.merge("CHWRT", resolved(0.75));

        assert_eq!(instance.compute_status(&group, 0.7), InstanceStatus::Complete);
        assert_eq!(instance.compute_status(&group, 0.8), InstanceStatus::Pending);
    }

    #[test]
    fn test_status_ignores_points_outside_template() {
        let group = DeviceGroup::new("CHPL", vec!["CHWRT".to_string()]);
        let mut instance = DeviceInstance::new("CHPL-1", "CHPL");
        instance.merge("EXTRA", resolved(1.0));
        assert_eq!(instance.compute_status(&group, 0.7), InstanceStatus::Pending);
    }

    #[test]
    fn test_status_matches_vendor_spelled_template() {
        let group = DeviceGroup::new("CHPL", vec!["CHWRT".to_string(), "CHW_Flow".to_string()]);
        let mut instance = DeviceInstance::new("CHPL-1", "CHPL");
        instance.merge("CHWRT", resolved(0.9));
        assert_eq!(instance.compute_status(&group, 0.7), InstanceStatus::Partial);

        instance.merge("CHW_FLOW", resolved(0.9));
        assert_eq!(instance.compute_status(&group, 0.7), InstanceStatus::Complete);
    }

    #[test]
    fn test_empty_template_is_complete() {
        let group = DeviceGroup::new("METER", Vec::new());
        let instance = DeviceInstance::new("METER-1", "METER");
        assert_eq!(instance.compute_status(&group, 0.7), InstanceStatus::Complete);
    }

    #[test]
    fn test_source_id_key() {
        let id = SourceId::new("CHPL-1", "CHWRT");
        assert_eq!(id.key(), "CHPL-1:CHWRT");
        assert_eq!(id.to_string(), "CHPL-1:CHWRT");
    }

    #[test]
    fn test_raw_point_deserialize_aliases() {
        let point: RawPoint =
            serde_json::from_str(r#"{"point":"CHWRT","deviceId":"CHPL-1"}"#).unwrap();
        assert_eq!(point.name, "CHWRT");
        assert_eq!(point.device_id.as_deref(), Some("CHPL-1"));
        assert!(point.device_type.is_none());
    }
}
