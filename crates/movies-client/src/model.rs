use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// A movie as exposed by the Movies API.
///
/// `id` is assigned by the server. An unassigned id (`0`) is left out of the
/// request body on create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    #[serde(default, skip_serializing_if = "is_unassigned")]
    pub id: i32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default, deserialize_with = "deserialize_release_date")]
    pub release_date: NaiveDateTime,
    #[serde(default)]
    pub owner: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_unassigned(id: &i32) -> bool {
    *id == 0
}

/// Accepts `YYYY-MM-DDTHH:MM:SS[.f]`, the same with a `Z` or `+HH:MM` suffix
/// (kept as UTC), and a bare `YYYY-MM-DD` (at midnight).
fn deserialize_release_date<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_release_date(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("invalid release date `{raw}`"))
    })
}

fn parse_release_date(raw: &str) -> Option<NaiveDateTime> {
    raw.parse::<NaiveDateTime>()
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|d| d.naive_utc()))
        .or_else(|| {
            raw.parse::<NaiveDate>()
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl Movie {
    /// `true` if `user_name` owns this movie. Comparison ignores case.
    #[must_use]
    pub fn is_owned_by(&self, user_name: &str) -> bool {
        if self.owner.is_ascii() && user_name.is_ascii() {
            self.owner.eq_ignore_ascii_case(user_name)
        } else {
            self.owner.to_uppercase() == user_name.to_uppercase()
        }
    }
}

/// A single claim about the authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub claim_type: String,
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// Claims returned by the identity provider's user-info endpoint, in response order.
///
/// A claim type may occur more than once. Use [`UserInfo::multi_valued`] to keep
/// every value, or [`UserInfo::collapsed`] for one value per type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    claims: Vec<Claim>,
}

impl UserInfo {
    #[must_use]
    pub fn new(claims: Vec<Claim>) -> Self {
        Self { claims }
    }

    /// Build from a user-info JSON object.
    ///
    /// String values are taken as is, arrays yield one claim per element, other
    /// values are kept as their JSON text and `null` values are skipped.
    ///
    /// Returns `None` if `json` is not an object.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        let object = json.as_object()?;
        let mut claims = Vec::with_capacity(object.len());

        for (claim_type, value) in object {
            match value {
                serde_json::Value::Array(items) => claims.extend(
                    items
                        .iter()
                        .filter_map(claim_value)
                        .map(|v| Claim::new(claim_type.as_str(), v)),
                ),
                other => {
                    if let Some(v) = claim_value(other) {
                        claims.push(Claim::new(claim_type.as_str(), v));
                    }
                }
            }
        }

        Some(Self { claims })
    }

    #[must_use]
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// All values of `claim_type`, in response order.
    pub fn values<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.claims
            .iter()
            .filter(move |c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    /// The last value of `claim_type`, matching [`UserInfo::collapsed`].
    #[must_use]
    pub fn get(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .rev()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    /// Claim types in order of first appearance, each with all of its values.
    #[must_use]
    pub fn multi_valued(&self) -> Vec<(String, Vec<String>)> {
        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
        for claim in &self.claims {
            match grouped.iter_mut().find(|(t, _)| *t == claim.claim_type) {
                Some((_, values)) => values.push(claim.value.clone()),
                None => grouped.push((claim.claim_type.clone(), vec![claim.value.clone()])),
            }
        }
        grouped
    }

    /// One value per claim type, in order of first appearance.
    /// When a type repeats, the later value replaces the earlier one.
    #[must_use]
    pub fn collapsed(&self) -> Vec<(String, String)> {
        let mut collapsed: Vec<(String, String)> = Vec::new();
        for claim in &self.claims {
            match collapsed.iter_mut().find(|(t, _)| *t == claim.claim_type) {
                Some((_, value)) => value.clone_from(&claim.value),
                None => collapsed.push((claim.claim_type.clone(), claim.value.clone())),
            }
        }
        collapsed
    }
}

fn claim_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
