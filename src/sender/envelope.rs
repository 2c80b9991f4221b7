use crate::logging::record::LogRecord;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SDK_VERSION_TAG: &str = "ai.internal.sdkVersion";
pub const ROLE_INSTANCE_TAG: &str = "ai.cloud.roleInstance";
pub const ROLE_TAG: &str = "ai.cloud.role";

/// One Application Insights telemetry item (`MessageData`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub name: String,
    pub time: String,
    #[serde(rename = "iKey")]
    pub ikey: String,
    pub tags: BTreeMap<String, String>,
    pub data: EnvelopeData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeData {
    pub base_type: String,
    pub base_data: MessageData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub ver: u8,
    pub message: String,
    pub severity_level: u8,
    pub properties: BTreeMap<String, String>,
}

impl Envelope {
    pub fn message(ikey: &str, tags: &BTreeMap<String, String>, record: &LogRecord) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert("process".to_string(), process_label(record));
        properties.insert("module".to_string(), record.module().to_string());
        properties.insert("fileName".to_string(), record.file.clone().unwrap_or_default());
        properties.insert(
            "lineNumber".to_string(),
            record.line.unwrap_or(0).to_string(),
        );
        properties.insert("level".to_string(), record.level.as_str().to_string());
        properties.insert("logger".to_string(), record.name.clone());
        for (key, value) in &record.fields {
            properties.entry(key.clone()).or_insert_with(|| value.clone());
        }

        Self {
            name: "Microsoft.ApplicationInsights.Message".to_string(),
            time: record
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            ikey: ikey.to_string(),
            tags: tags.clone(),
            data: EnvelopeData {
                base_type: "MessageData".to_string(),
                base_data: MessageData {
                    ver: 2,
                    message: record.message.clone(),
                    severity_level: record.level.severity_level(),
                    properties,
                },
            },
        }
    }
}

fn process_label(record: &LogRecord) -> String {
    let thread = record.thread_name.as_deref().unwrap_or("unnamed");
    format!("{}:{thread}", std::process::id())
}

/// Tags attached to every envelope sent from this process.
pub fn default_tags() -> BTreeMap<String, String> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    let role = std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());

    let mut tags = BTreeMap::new();
    tags.insert(ROLE_INSTANCE_TAG.to_string(), host);
    tags.insert(ROLE_TAG.to_string(), role);
    tags.insert(
        SDK_VERSION_TAG.to_string(),
        format!("rust:{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
    );
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LogLevel;

    #[test]
    fn test_message_envelope_shape() {
        let mut record = LogRecord::new(LogLevel::Warn, "pkg_a::jobs", "quota low");
        record.module_path = Some("pkg_a::jobs".to_string());
        record.line = Some(42);
        record.fields.insert("job".to_string(), "train-1".to_string());

        let envelope = Envelope::message("1234-abcd", &default_tags(), &record);
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["name"], "Microsoft.ApplicationInsights.Message");
        assert_eq!(json["iKey"], "1234-abcd");
        assert_eq!(json["data"]["baseType"], "MessageData");
        assert_eq!(json["data"]["baseData"]["ver"], 2);
        assert_eq!(json["data"]["baseData"]["message"], "quota low");
        assert_eq!(json["data"]["baseData"]["severityLevel"], 2);
        assert_eq!(json["data"]["baseData"]["properties"]["module"], "jobs");
        assert_eq!(json["data"]["baseData"]["properties"]["lineNumber"], "42");
        assert_eq!(json["data"]["baseData"]["properties"]["job"], "train-1");
        assert!(json["tags"][SDK_VERSION_TAG].as_str().unwrap().starts_with("rust:"));
        assert!(json["time"].as_str().unwrap().ends_with('Z'));
    }
}
