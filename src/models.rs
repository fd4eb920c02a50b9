use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alternative {
    pub name: String,
    #[serde(default = "default_price")]
    pub price: String,
    #[serde(default)]
    pub link: Option<String>,
}

fn default_price() -> String {
    "Price Unavailable".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Alternatives {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub medicine_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub data: Alternatives,
    pub cached: bool,
}

/// Lookup key for a medicine name: trimmed, inner whitespace collapsed, lowercased.
pub fn normalize_medicine_name(name: &str) -> Option<String> {
    let normalized = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_medicine_name() {
        assert_eq!(
            normalize_medicine_name("  Dolo   650 ").as_deref(),
            Some("dolo 650")
        );
        assert_eq!(normalize_medicine_name("   "), None);
    }

    #[test]
    fn test_alternative_defaults() {
        let parsed: Alternatives =
            serde_json::from_str(r#"{"alternatives":[{"name":"Calpol"}]}"#).unwrap();
        assert_eq!(parsed.alternatives[0].price, "Price Unavailable");
        assert_eq!(parsed.alternatives[0].link, None);
    }

    #[test]
    fn test_search_request_camel_case() {
        let req: SearchRequest = serde_json::from_str(r#"{"medicineName":"Crocin"}"#).unwrap();
        assert_eq!(req.medicine_name.as_deref(), Some("Crocin"));
    }
}
