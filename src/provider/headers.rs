//! Outbound header construction
//!
//! Headers are built only from the provider's template, the credential and a
//! fixed content type. Nothing from the incoming client request is forwarded.

use std::collections::HashMap;
use std::str::FromStr;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};

use super::ProviderAdapter;
use crate::error::{GatewayError, GatewayResult};
use crate::types::{KeyDescriptor, ProviderDescriptor};

/// Build the headers for one provider call
///
/// Template entries come first, then the variant's auth header, then
/// `Content-Type: application/json`; later entries replace earlier ones.
pub fn build_headers(
    provider: &ProviderDescriptor,
    adapter: &dyn ProviderAdapter,
    key: &KeyDescriptor,
) -> GatewayResult<HeaderMap> {
    let mut headers = HeaderMap::new();

    for (name, value) in parse_template(&provider.headers)? {
        insert(&mut headers, &name, &value)?;
    }

    let (auth_name, auth_value) = adapter.auth_header(&key.value);
    let auth_value = HeaderValue::from_str(&auth_value)
        .map_err(|_| {
            GatewayError::HeaderTemplate("credential is not a valid header value".into())
        })?;
    let auth_name = HeaderName::from_str(auth_name)
        .map_err(|e| GatewayError::HeaderTemplate(format!("{}: {}", auth_name, e)))?;
    headers.insert(auth_name, auth_value);

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(headers)
}

/// Decode a header template; a blank template has no entries
fn parse_template(template: &str) -> GatewayResult<HashMap<String, String>> {
    if template.trim().is_empty() {
        return Ok(HashMap::new());
    }
    serde_json::from_str(template).map_err(|e| GatewayError::HeaderTemplate(e.to_string()))
}

fn insert(headers: &mut HeaderMap, name: &str, value: &str) -> GatewayResult<()> {
    let header_name = HeaderName::from_str(name)
        .map_err(|e| GatewayError::HeaderTemplate(format!("{}: {}", name, e)))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| GatewayError::HeaderTemplate(format!("{}: {}", name, e)))?;
    headers.insert(header_name, header_value);
    Ok(())
}
