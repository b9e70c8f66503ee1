//! Request-scoped data exchanged with the portal.
//!
//! Nothing here outlives a single call: credentials come in with the request
//! and the bearer token goes back out inside the [`InvoiceBatch`].

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Login credentials plus the alias of the place of consumption to query.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub site_alias: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        site_alias: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            site_alias: site_alias.into(),
        }
    }

    /// Names of required fields that are empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.username.is_empty() {
            missing.push("username");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        if self.site_alias.is_empty() {
            missing.push("placeOfConsumption");
        }
        missing
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("site_alias", &self.site_alias)
            .finish()
    }
}

/// Contract resolved from the portal's contract list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    pub alias: String,
    /// Provider account identifier (`pa`).
    pub pa: String,
    /// Point of consumption number (`poc_number`).
    pub poc: String,
}

/// Typed read-only view of one invoice row.
///
/// The relay forwards the provider's JSON untouched; this view exists for
/// callers that want to render it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Invoice {
    #[serde(default, deserialize_with = "lenient_string")]
    pub invoice_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub invoiced_at: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub total: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub division: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub unpaid: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub download_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub energy_consumption: Option<String>,
}

/// Invoice history plus the bearer token needed for later downloads.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceBatch {
    /// History payload exactly as the portal returned it, usually an array.
    pub invoices: Value,
    pub token: String,
}

impl InvoiceBatch {
    pub fn new(invoices: Value, token: impl Into<String>) -> Self {
        Self {
            invoices,
            token: token.into(),
        }
    }

    /// Top-level history entries.
    pub fn entries(&self) -> &[Value] {
        match &self.invoices {
            Value::Array(items) => items,
            Value::Null => &[],
            other => std::slice::from_ref(other),
        }
    }

    /// Flatten the provider payload into typed rows.
    ///
    /// History entries are usually groups carrying their own `invoices`
    /// array; bare invoice objects are accepted as well.
    pub fn rows(&self) -> Vec<Invoice> {
        let mut rows = Vec::new();
        for entry in self.entries() {
            match entry.get("invoices") {
                Some(Value::Array(nested)) => rows.extend(nested.iter().filter_map(parse_invoice)),
                _ => rows.extend(parse_invoice(entry)),
            }
        }
        rows
    }
}

fn parse_invoice(value: &Value) -> Option<Invoice> {
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        other => Some(other.to_string()),
    })
}
