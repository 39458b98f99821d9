//! Remote record types and their mapping onto local merge commands.
//!
//! Records come back from the remote API as JSON objects. The engine keeps
//! them as [`serde_json::Value`] and only picks out the fields each merge
//! command needs, in the positional order the command expects.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::SqlValue;

/// A record as returned by the remote API.
pub type Record = Value;

/// The remote collections the engine syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Accounts,
    Checkins,
    Routes,
    Profile,
}

impl Entity {
    /// Event source name used for collection pulls.
    pub fn source(&self) -> &'static str {
        match self {
            Entity::Accounts => "accounts",
            Entity::Checkins => "checkins",
            Entity::Routes => "routes",
            Entity::Profile => "user profile",
        }
    }

    /// Event source name used for single-record pulls.
    pub fn item_source(&self) -> &'static str {
        match self {
            Entity::Accounts => "account",
            Entity::Checkins => "check-in",
            Entity::Routes => "route",
            Entity::Profile => "user profile",
        }
    }

    /// Merge command that upserts one record of this entity.
    pub fn merge_command(&self) -> &'static str {
        match self {
            Entity::Accounts => "MergeAccountsDetailed",
            Entity::Checkins => "MergeAccountCheckins",
            Entity::Routes => "MergeRoutes",
            Entity::Profile => "MergeUserProfiles",
        }
    }

    /// Build the merge arguments for a record of this entity.
    pub fn merge_args(&self, record: &Record) -> Vec<SqlValue> {
        match self {
            Entity::Accounts => account_args(record),
            Entity::Checkins => checkin_args(record),
            Entity::Routes => route_args(record),
            Entity::Profile => profile_args(record),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source())
    }
}

/// The record's remote identifier, if it has a usable one.
pub fn record_id(record: &Record) -> Option<i64> {
    match record.get("id")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn field(record: &Record, key: &str) -> SqlValue {
    record.get(key).map(SqlValue::from_json).unwrap_or(SqlValue::Null)
}

fn fields(record: &Record, keys: &[&str]) -> Vec<SqlValue> {
    keys.iter().map(|k| field(record, k)).collect()
}

const ACCOUNT_FIELDS: &[&str] = &[
    "id",
    "first_name",
    "last_name",
    "full_name",
    "phone_number",
    "email",
    "customer_id",
    "notes",
    "original_address",
    "crm_id",
    "account_owner",
    "days_since_last_checkin",
    "last_checkin_date",
    "last_modified_date",
    "follow_up_date",
];

/// `custom_numeric*` and `custom_text*` fields, kept together as one JSON column.
fn custom_fields(record: &Record) -> SqlValue {
    let custom: Map<String, Value> = record
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(k, _)| k.starts_with("custom_"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();
    if custom.is_empty() {
        SqlValue::Null
    } else {
        SqlValue::Text(Value::Object(custom).to_string())
    }
}

fn account_args(record: &Record) -> Vec<SqlValue> {
    let mut args = fields(record, ACCOUNT_FIELDS);
    args.push(custom_fields(record));
    args.push(field(record, "created_at"));
    args.push(field(record, "updated_at"));
    args
}

fn checkin_args(record: &Record) -> Vec<SqlValue> {
    fields(
        record,
        &[
            "id",
            "crm_id",
            "customer",
            "log_datetime",
            "type",
            "comments",
            "extra_fields",
            "created_by",
        ],
    )
}

fn route_args(record: &Record) -> Vec<SqlValue> {
    fields(
        record,
        &[
            "id",
            "name",
            "route_date",
            "duration",
            "start_address",
            "destination_address",
            "start_time",
        ],
    )
}

fn profile_args(profile: &Record) -> Vec<SqlValue> {
    let mut args = fields(
        profile,
        &[
            "id",
            "email",
            "first_name",
            "last_name",
            "is_manager",
            "is_hide_referral_ios_banner",
            "marker_icon",
            "manager",
        ],
    );
    let editable = profile
        .get("crm_editable_fields_list")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();
    args.push(editable.into());
    args.extend(fields(
        profile,
        &[
            "crm_base_url",
            "crm_type",
            "referral_url",
            "map_start_zoom",
            "map_start",
            "is_user_can_edit",
            "is_user_can_delete_checkins",
            "is_user_can_add_new_text_values",
            "has_data",
            "default_appt_length",
            "completed",
            "trial_days_left",
        ],
    ));
    let company = profile.get("company").cloned().unwrap_or(Value::Null);
    args.extend(fields(&company, &["id", "name", "short_name"]));
    args
}

/// The configuration settings derived from a profile.
pub fn profile_settings(profile: &Record) -> Vec<(&'static str, String)> {
    let text = |v: Option<&Value>| match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let company = profile.get("company");
    vec![
        ("ApiProfileId", text(profile.get("id"))),
        (
            "ApiProfileName",
            format!(
                "{} {}",
                text(profile.get("first_name")),
                text(profile.get("last_name"))
            ),
        ),
        ("CompanyId", text(company.and_then(|c| c.get("id")))),
        ("CompanyName", text(company.and_then(|c| c.get("name")))),
    ]
}

/// One dataset of a profile with the rows to insert for it.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSetRows {
    pub dataset: Vec<SqlValue>,
    pub values: Vec<Vec<SqlValue>>,
}

/// Build the `InsertDataSets` / `InsertDataSetValues` arguments of a profile.
pub fn profile_datasets(profile: &Record) -> Vec<DataSetRows> {
    let profile_id = field(profile, "id");
    let Some(datafields) = profile.get("datafields").and_then(Value::as_array) else {
        return Vec::new();
    };

    datafields
        .iter()
        .map(|df| {
            let name = field(df, "name");
            let position = field(df, "position");
            let mut dataset = vec![name.clone(), profile_id.clone()];
            dataset.extend(fields(
                df,
                &[
                    "filterable",
                    "label",
                    "position",
                    "type",
                    "has_data",
                    "is_user_can_add_new_text_values",
                    "rawmin",
                    "min",
                    "max",
                    "rawmax",
                    "account_field",
                ],
            ));
            let values = df
                .get("values")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .map(|v| {
                            vec![
                                name.clone(),
                                profile_id.clone(),
                                field(v, "text"),
                                field(v, "value"),
                                position.clone(),
                            ]
                        })
                        .collect()
                })
                .unwrap_or_default();
            DataSetRows { dataset, values }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_id_accepts_numbers_and_numeric_strings() {
        assert_eq!(record_id(&json!({"id": 7})), Some(7));
        assert_eq!(record_id(&json!({"id": "42"})), Some(42));
        assert_eq!(record_id(&json!({"id": null})), None);
        assert_eq!(record_id(&json!({"name": "x"})), None);
    }

    #[test]
    fn account_args_collect_custom_fields() {
        let account = json!({
            "id": 1,
            "full_name": "Ada Lovelace",
            "custom_numeric": 3.5,
            "custom_text2": "gold",
        });
        let args = Entity::Accounts.merge_args(&account);
        assert_eq!(args.len(), ACCOUNT_FIELDS.len() + 3);
        assert_eq!(args[0], SqlValue::Int(1));
        assert_eq!(args[3], SqlValue::Text("Ada Lovelace".into()));
        assert_eq!(args[1], SqlValue::Null);

        let SqlValue::Text(custom) = &args[ACCOUNT_FIELDS.len()] else {
            panic!("custom fields not captured");
        };
        let custom: Value = serde_json::from_str(custom).unwrap();
        assert_eq!(custom, json!({"custom_numeric": 3.5, "custom_text2": "gold"}));
    }

    #[test]
    fn profile_children_and_settings() {
        let profile = json!({
            "id": 9,
            "first_name": "Grace",
            "last_name": "Hopper",
            "crm_editable_fields_list": ["a", "b"],
            "company": {"id": 3, "name": "Navy", "short_name": "N"},
            "datafields": [
                {"name": "tier", "position": 2, "values": [{"text": "Gold", "value": 1}]},
                {"name": "notes", "position": 5}
            ]
        });

        let args = Entity::Profile.merge_args(&profile);
        assert_eq!(args.len(), 24);
        assert_eq!(args[8], SqlValue::Text("a,b".into()));
        assert_eq!(args[22], SqlValue::Text("Navy".into()));

        let sets = profile_datasets(&profile);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].dataset.len(), 13);
        assert_eq!(
            sets[0].values,
            vec![vec![
                SqlValue::Text("tier".into()),
                SqlValue::Int(9),
                SqlValue::Text("Gold".into()),
                SqlValue::Int(1),
                SqlValue::Int(2),
            ]]
        );
        assert!(sets[1].values.is_empty());

        let settings = profile_settings(&profile);
        assert_eq!(settings[0], ("ApiProfileId", "9".to_string()));
        assert_eq!(settings[1], ("ApiProfileName", "Grace Hopper".to_string()));
        assert_eq!(settings[3], ("CompanyName", "Navy".to_string()));
    }
}
