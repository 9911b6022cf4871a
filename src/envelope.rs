use serde::{Deserialize, Serialize};

/// A single error returned inside a control-plane envelope.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorItem {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Pagination metadata for list responses.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResultInfo {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub total_count: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<ApiErrorItem>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub result_info: Option<ResultInfo>,
}

/// Joins envelope errors as `code:message` pairs; code-less items contribute
/// their message only.
pub fn format_api_errors(items: &[ApiErrorItem]) -> String {
    if items.is_empty() {
        return "unknown API error".to_owned();
    }

    items
        .iter()
        .map(|item| {
            if item.code == 0 {
                item.message.clone()
            } else {
                format!("{}:{}", item.code, item.message)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
