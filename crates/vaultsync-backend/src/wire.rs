//! Typed request and response bodies, one per backend endpoint

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct GroupReadRequest<'a> {
    pub group: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct NameRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct IdRequest<'a> {
    pub id: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct GroupUpdateRequest<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub group_type: &'a str,
    pub policies: &'a [String],
}

#[derive(Debug, Serialize)]
pub(crate) struct GroupAliasRequest<'a> {
    pub canonical_id: &'a str,
    pub mount_accessor: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct EntityLookupRequest<'a> {
    pub alias_name: &'a str,
    pub alias_mount_accessor: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct EntityAliasRequest<'a> {
    pub name: &'a str,
    pub mount_accessor: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct EntityUpdateRequest<'a> {
    pub name: &'a str,
    pub policies: &'a [String],
    pub disabled: bool,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReadRequest<'a> {
    pub path: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct WriteRequest<'a, T: Serialize> {
    pub path: &'a str,
    pub data: &'a T,
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct GroupReadResponse {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "string_or_seq")]
    pub policies: Vec<String>,
    #[serde(default)]
    pub alias: Option<AliasBody>,
}

/// Alias as embedded in a group read; the backend returns `{}` when the
/// group has none
#[derive(Debug, Default, Deserialize)]
pub(crate) struct AliasBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub canonical_id: Option<String>,
    #[serde(default)]
    pub mount_accessor: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// `{ "data": { "id": ... } }`, shared by group update and alias creation
#[derive(Debug, Deserialize)]
pub(crate) struct CreatedResponse {
    #[serde(default)]
    pub data: Option<CreatedData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedData {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EntityLookupResponse {
    pub data: EntityData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EntityData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "string_or_seq")]
    pub policies: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenLookupResponse {
    #[serde(default, deserialize_with = "string_or_seq")]
    pub policies: Vec<String>,
    #[serde(default, deserialize_with = "string_or_seq")]
    pub identity_policies: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MountListResponse {
    #[serde(default)]
    pub data: HashMap<String, MountInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MountInfo {
    #[serde(default)]
    pub accessor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReadResponse<T> {
    pub data: T,
}

/// Policies arrive as an array or a comma-separated string, and may be null
pub(crate) fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrSeq {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<StringOrSeq>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(StringOrSeq::Many(values)) => values,
        Some(StringOrSeq::One(value)) => value
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
    })
}
