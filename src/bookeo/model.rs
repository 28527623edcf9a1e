//! Payload shapes returned by the Bookeo REST API.
//!
//! Every field the cache does not strictly need is optional so that a
//! provider-side schema drift drops a value instead of a whole page.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PageInfo {
    pub total_items: Option<u32>,
    pub total_pages: u32,
    pub current_page: Option<u32>,
    pub page_navigation_token: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct BookingsPage {
    pub info: PageInfo,
    pub data: Vec<Booking>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Booking {
    #[serde(deserialize_with = "lenient_string")]
    pub booking_number: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub event_id: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub customer_id: Option<String>,
    pub title: Option<String>,
    pub canceled: Option<bool>,
    pub accepted: Option<bool>,
    pub private_event: Option<bool>,
    pub no_show: Option<bool>,
    pub source_ip: Option<String>,
    pub creation_time: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub creation_agent: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub product_id: Option<String>,
    pub participants: Option<Participants>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct Participants {
    pub details: Vec<ParticipantDetail>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantDetail {
    #[serde(deserialize_with = "lenient_string")]
    pub people_category_id: Option<String>,
    pub person_details: Option<PersonDetails>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonDetails {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub custom_fields: Vec<CustomField>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct CustomField {
    pub id: Option<String>,
    pub name: Option<String>,
    pub value: Option<Value>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PeopleCategory {
    #[serde(deserialize_with = "required_string")]
    pub id: String,
    pub name: String,
}

/// `settings/peoplecategories` body. Older accounts answer with `data`.
#[derive(Deserialize, Debug)]
pub struct PeopleCategoryList {
    #[serde(alias = "data")]
    pub categories: Vec<PeopleCategory>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(deserialize_with = "required_string")]
    pub product_id: String,
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ProductList {
    #[serde(default)]
    pub info: PageInfo,
    pub data: Vec<Product>,
}

/// Render a scalar JSON value as text; `null` and containers become `None`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// Identifiers arrive as strings on most accounts and as numbers on some.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(scalar_text))
}

fn required_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    scalar_text(&value).ok_or_else(|| serde::de::Error::custom("expected a string or number"))
}
