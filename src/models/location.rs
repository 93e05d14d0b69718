use serde::{Deserialize, Serialize};

/// One retail outlet, identified upstream by an external provider id and
/// holding its own source API credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Location {
    pub id: String,
    pub name: String,
    #[serde(alias = "retailerId")]
    pub external_id: String,
    pub api_key: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub timezone: Option<String>,
    pub is_active: bool,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            external_id: String::new(),
            api_key: String::new(),
            address: None,
            city: None,
            state: None,
            timezone: None,
            is_active: true,
        }
    }
}

/// Credentials for the upstream source API, extracted from a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCredentials {
    pub api_key: String,
    pub retailer_id: String,
}

impl Location {
    /// Returns `Some` only when the location carries everything needed to
    /// talk to the source API. Locations without credentials are skipped by
    /// the orchestrator and counted, never fatal.
    pub fn credentials(&self) -> Option<SourceCredentials> {
        if self.api_key.trim().is_empty() || self.external_id.trim().is_empty() {
            return None;
        }
        Some(SourceCredentials {
            api_key: self.api_key.clone(),
            retailer_id: self.external_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_require_key_and_external_id() {
        let mut location = Location {
            id: "1".into(),
            name: "Downtown".into(),
            external_id: "ret-1".into(),
            api_key: "key".into(),
            ..Location::default()
        };
        assert!(location.credentials().is_some());

        location.api_key = "  ".into();
        assert!(location.credentials().is_none());

        location.api_key = "key".into();
        location.external_id = String::new();
        assert!(location.credentials().is_none());
    }

    #[test]
    fn deserializes_sink_location_row() {
        let row = serde_json::json!({
            "id": "3",
            "name": "Harborside",
            "externalId": "ret-3",
            "apiKey": "k-3",
            "city": "Oakland",
            "isActive": false
        });
        let location: Location = serde_json::from_value(row).unwrap();
        assert_eq!(location.external_id, "ret-3");
        assert!(!location.is_active);
    }
}
