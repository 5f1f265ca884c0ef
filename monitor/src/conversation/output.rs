//! Final-output normalization.
//!
//! Historical traces carry outputs produced by several backend generations:
//! current runs serialize a full result object, older runs a bare product
//! array, and failed runs arbitrary text. Every shape normalizes to a
//! `DiscoveryResult`; nothing here can fail.

use shared_types::{DiscoveryResult, Product};

/// Parse a trace's raw `final_output` into a structured result.
///
/// Empty or missing input and unparseable text both yield the empty result.
pub fn parse_final_output(raw: Option<&str>) -> DiscoveryResult {
    let Some(raw) = raw else {
        return DiscoveryResult::default();
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DiscoveryResult::default();
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return DiscoveryResult::default();
    };

    match value {
        serde_json::Value::Object(_) => serde_json::from_value(value).unwrap_or_default(),
        // Legacy shape: a bare product array with no wrapper object.
        serde_json::Value::Array(_) => {
            let products: Vec<Product> = serde_json::from_value(value).unwrap_or_default();
            DiscoveryResult {
                products,
                ..DiscoveryResult::default()
            }
        }
        _ => DiscoveryResult::default(),
    }
}
