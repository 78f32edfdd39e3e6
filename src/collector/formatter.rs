/**
 * ============================================================================
 * RECORD FORMATTER MODULE
 * ============================================================================
 *
 * PURPOSE: Convert raw device records into the collector's JSON payload
 *
 * RECORD FORMAT (comma-separated, positional):
 * timestamp,steps,yaw,pitch,vmc,light,activity,hrbpm
 *
 * PAYLOAD FORMAT:
 * [{"timestamp":"...","steps":"...", ...}, ...]  (bundle order preserved)
 *
 * Fields keep their original string representation; the collector is
 * responsible for numeric interpretation. Records with fewer than 8
 * components are sent with the missing fields omitted.
 *
 * ============================================================================
 */

use serde::{Deserialize, Serialize};

/// Number of positional fields in a complete record
pub const RECORD_FIELD_COUNT: usize = 8;

/**
 * Structured view of one device record
 * Absent fields are skipped on serialization
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yaw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vmc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hrbpm: Option<String>,
}

impl HealthRecord {
    /**
     * Check whether all 8 positional fields were present in the source line
     */
    pub fn is_complete(&self) -> bool {
        [
            &self.timestamp,
            &self.steps,
            &self.yaw,
            &self.pitch,
            &self.vmc,
            &self.light,
            &self.activity,
            &self.hrbpm,
        ]
        .iter()
        .all(|field| field.is_some())
    }
}

/**
 * Parse a raw comma-separated record
 * Never fails: missing trailing components stay None, extra components are ignored
 */
pub fn parse_record(line: &str) -> HealthRecord {
    let mut components = line.split(',').map(str::to_string);

    HealthRecord {
        timestamp: components.next(),
        steps: components.next(),
        yaw: components.next(),
        pitch: components.next(),
        vmc: components.next(),
        light: components.next(),
        activity: components.next(),
        hrbpm: components.next(),
    }
}

/**
 * Serialize a bundle of raw lines as the JSON array posted to the collector
 */
pub fn format_bundle(lines: &[String]) -> Result<String, String> {
    let records: Vec<HealthRecord> = lines
        .iter()
        .map(|line| {
            let record = parse_record(line);
            if !record.is_complete() {
                log::warn!(
                    "Record has fewer than {} fields, sending partial data: {:?}",
                    RECORD_FIELD_COUNT,
                    line
                );
            }
            record
        })
        .collect();

    serde_json::to_string(&records).map_err(|e| format!("Failed to serialize bundle: {}", e))
}
