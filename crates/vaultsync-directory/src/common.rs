//! Wire types and helpers shared by the directory queries

use serde::{Deserialize, Deserializer};

/// Collection envelope returned by every search endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct GraphListResponse<T> {
    #[serde(default)]
    pub value: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphTokenResponse {
    pub access_token: Option<String>,
}

/// Group record as returned by a `$filter` search
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GraphGroup {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
    /// Outer `None`: field absent. `Some(None)`: explicit null.
    #[serde(
        rename = "onPremisesSyncEnabled",
        default,
        deserialize_with = "deserialize_present"
    )]
    pub on_premises_sync_enabled: Option<Option<bool>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GraphUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(rename = "onPremisesExtensionAttributes", default)]
    pub extension_attributes: Option<GraphExtensionAttributes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GraphExtensionAttributes {
    #[serde(rename = "extensionAttribute15", default)]
    pub extension_attribute_15: Option<String>,
}

/// A user endpoint answers with the object itself for a direct path and
/// with a collection for a filtered search.
#[derive(Debug, Deserialize)]
pub(crate) struct GraphUserResponse {
    #[serde(flatten)]
    pub user: GraphUser,
    #[serde(default)]
    pub value: Vec<GraphUser>,
}

impl GraphUserResponse {
    pub fn into_user(self) -> Option<GraphUser> {
        let has_id = self
            .user
            .id
            .as_deref()
            .map(|id| !id.trim().is_empty())
            .unwrap_or(false);
        if has_id {
            Some(self.user)
        } else {
            self.value.into_iter().next()
        }
    }
}

fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Pick one object id among groups sharing a display name.
///
/// A record whose sync flag is explicitly null is cloud-managed and wins
/// outright. Otherwise the last record flagged as synced wins, and with no
/// flag at all the first record is taken.
pub(crate) fn select_group_object_id(groups: &[GraphGroup]) -> Option<String> {
    let mut synced = None;
    for group in groups {
        match group.on_premises_sync_enabled {
            Some(None) => return Some(group.id.clone()),
            Some(Some(true)) => synced = Some(group.id.clone()),
            _ => {}
        }
    }
    synced.or_else(|| groups.first().map(|g| g.id.clone()))
}

/// Quote a value for use inside an OData string literal
pub(crate) fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// One `"property:value"` clause of a `$search` expression, with
/// backslashes and double quotes in the value escaped
pub(crate) fn search_clause(property: &str, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}:{}\"", property, escaped)
}
