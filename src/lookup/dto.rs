use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct HostRequest {
    pub host: String,
}

#[derive(Debug, Deserialize)]
pub struct PortScanRequest {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    80
}

/// Combined research request. `fields` selects a subset of the checks; a bare
/// string and a list are both accepted, and omission means "run everything".
#[derive(Debug, Deserialize)]
pub struct LookupRequest {
    pub domain: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub fields: Option<Fields>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Fields {
    One(String),
    Many(Vec<String>),
}

impl Fields {
    pub fn into_list(self) -> Vec<String> {
        match self {
            Self::One(field) => vec![field],
            Self::Many(fields) => fields,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct WhoisInfo {
    pub domain_name: Option<String>,
    pub registrar: Option<String>,
    pub creation_date: Option<String>,
    pub expiration_date: Option<String>,
    pub name_servers: Vec<String>,
    pub status: Vec<String>,
}

/// Per-record-type results; a failed type carries its error inline instead of
/// failing the other types.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RecordSet {
    Records(Vec<String>),
    Failed { error: String },
}

pub type DnsRecords = BTreeMap<&'static str, RecordSet>;

#[derive(Debug, Serialize)]
pub struct PortStatus {
    pub port: u16,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SpeedTestResult {
    pub download: String,
    pub upload: String,
    pub ping: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_accepts_string_or_list() {
        let req: LookupRequest =
            serde_json::from_str(r#"{"domain": "example.com", "fields": "whois"}"#).unwrap();
        assert_eq!(req.fields.unwrap().into_list(), vec!["whois"]);

        let req: LookupRequest =
            serde_json::from_str(r#"{"domain": "example.com", "fields": ["whois", "port_scan"]}"#)
                .unwrap();
        assert_eq!(req.fields.unwrap().into_list(), vec!["whois", "port_scan"]);

        let req: LookupRequest = serde_json::from_str(r#"{"domain": "example.com"}"#).unwrap();
        assert!(req.fields.is_none());
        assert_eq!(req.port, 80);
    }

    #[test]
    fn record_set_serializes_flat() {
        let ok = serde_json::to_value(RecordSet::Records(vec!["1.2.3.4".into()])).unwrap();
        assert_eq!(ok, serde_json::json!(["1.2.3.4"]));
        let failed = serde_json::to_value(RecordSet::Failed {
            error: "timed out".into(),
        })
        .unwrap();
        assert_eq!(failed, serde_json::json!({"error": "timed out"}));
    }
}
