//! Flash data
//!
//! One-shot state carried from one request to the next inside a
//! [`SessionRecord`]'s data bag: info/error messages, submitted form values,
//! per-field validation errors and repeated form groups.
//!
//! Every `take_*` accessor removes its entry in the same call that reads it,
//! so a second read within the request observes absence. Every `set_*`
//! writer merges into any unread value of the same kind and marks the record
//! dirty.
//!
//! Values are stored as plain JSON (`string`, `{string: string}`,
//! `{string: [string]}`). Payloads of any other shape are logged and read as
//! empty; individual non-string leaves are skipped.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::error;

use crate::logging::targets;
use crate::sessions::SessionRecord;

/// Reserved data-bag key for the one-shot info message
pub const INFO_MESSAGE: &str = "InfoMessage";
/// Reserved data-bag key for the one-shot error message
pub const ERROR_MESSAGE: &str = "ErrorMessage";
/// Reserved data-bag key for per-field validation errors
pub const FORM_ERRORS: &str = "FormErrors";
/// Reserved data-bag key for submitted form values
pub const FORM_VALUES: &str = "FormValues";
/// Reserved data-bag key for repeated form group membership
pub const GROUP_VALUES: &str = "GroupValues";

/// Separates a group key from a member identifier in form field keys
pub const GROUP_DELIMITER: char = ':';

/// Field key -> value (or error message)
pub type FormMap = BTreeMap<String, String>;

/// Group key -> ordered member identifiers
pub type GroupMap = BTreeMap<String, Vec<String>>;

/// Build the form field key for member `id` of group `key` (`"key:id"`).
pub fn array_key(key: &str, id: &str) -> String {
    format!("{}{}{}", key, GROUP_DELIMITER, id)
}

// ============================================================================
// Codec
// ============================================================================

fn decode_string(key: &str, value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => {
            error!(target: targets::SESSION, flash_key = key, value = %other, "flash message is not a string");
            String::new()
        }
    }
}

fn decode_form_map(key: &str, value: Value) -> FormMap {
    let Value::Object(entries) = value else {
        error!(target: targets::SESSION, flash_key = key, value = %value, "flash payload is not a map");
        return FormMap::new();
    };

    let mut out = FormMap::new();
    for (field, v) in entries {
        match v {
            Value::String(s) => {
                out.insert(field, s);
            }
            other => {
                error!(target: targets::SESSION, flash_key = key, field = %field, value = %other, "skipping non-string flash value");
            }
        }
    }
    out
}

fn decode_group_map(key: &str, value: Value) -> GroupMap {
    let Value::Object(entries) = value else {
        error!(target: targets::SESSION, flash_key = key, value = %value, "flash payload is not a map");
        return GroupMap::new();
    };

    let mut out = GroupMap::new();
    for (group, v) in entries {
        let Value::Array(items) = v else {
            error!(target: targets::SESSION, flash_key = key, group = %group, value = %v, "skipping non-list flash group");
            continue;
        };
        let members = items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                other => {
                    error!(target: targets::SESSION, flash_key = key, group = %group, value = %other, "skipping non-string group member");
                    None
                }
            })
            .collect();
        out.insert(group, members);
    }
    out
}

fn encode_form_map(map: &FormMap) -> Value {
    let entries: Map<String, Value> = map
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(entries)
}

fn encode_group_map(map: &GroupMap) -> Value {
    let entries: Map<String, Value> = map
        .iter()
        .map(|(k, members)| {
            let list = members.iter().cloned().map(Value::String).collect();
            (k.clone(), Value::Array(list))
        })
        .collect();
    Value::Object(entries)
}

/// Decode a stored form map without consuming it.
fn peek_form_map(record: &SessionRecord, key: &str) -> FormMap {
    record
        .get(key)
        .cloned()
        .map(|v| decode_form_map(key, v))
        .unwrap_or_default()
}

fn peek_group_map(record: &SessionRecord, key: &str) -> GroupMap {
    record
        .get(key)
        .cloned()
        .map(|v| decode_group_map(key, v))
        .unwrap_or_default()
}

// ============================================================================
// Read-once accessors
// ============================================================================

/// Consume the info message. Returns an empty string if none is stored.
pub fn take_info_message(record: &mut SessionRecord) -> String {
    record
        .take(INFO_MESSAGE)
        .map(|v| decode_string(INFO_MESSAGE, v))
        .unwrap_or_default()
}

/// Consume the error message. Returns an empty string if none is stored.
pub fn take_error_message(record: &mut SessionRecord) -> String {
    record
        .take(ERROR_MESSAGE)
        .map(|v| decode_string(ERROR_MESSAGE, v))
        .unwrap_or_default()
}

/// Consume the per-field validation errors.
pub fn take_form_errors(record: &mut SessionRecord) -> FormMap {
    record
        .take(FORM_ERRORS)
        .map(|v| decode_form_map(FORM_ERRORS, v))
        .unwrap_or_default()
}

/// Consume the submitted form values.
pub fn take_form_values(record: &mut SessionRecord) -> FormMap {
    record
        .take(FORM_VALUES)
        .map(|v| decode_form_map(FORM_VALUES, v))
        .unwrap_or_default()
}

/// Consume the repeated form group membership.
pub fn take_group_values(record: &mut SessionRecord) -> GroupMap {
    record
        .take(GROUP_VALUES)
        .map(|v| decode_group_map(GROUP_VALUES, v))
        .unwrap_or_default()
}

// ============================================================================
// Merge-on-set writers
// ============================================================================

pub fn set_info_message(record: &mut SessionRecord, message: impl Into<String>) {
    record.insert(INFO_MESSAGE, Value::String(message.into()));
}

pub fn set_error_message(record: &mut SessionRecord, message: impl Into<String>) {
    record.insert(ERROR_MESSAGE, Value::String(message.into()));
}

/// Set the error message and merge per-field errors in one call.
pub fn set_errors(record: &mut SessionRecord, message: impl Into<String>, errors: FormMap) {
    set_error_message(record, message);
    set_form_errors(record, errors);
}

/// Merge per-field errors; new entries win on colliding keys.
pub fn set_form_errors(record: &mut SessionRecord, errors: FormMap) {
    let mut merged = peek_form_map(record, FORM_ERRORS);
    merged.extend(errors);
    record.insert(FORM_ERRORS, encode_form_map(&merged));
}

pub fn set_form_error(record: &mut SessionRecord, key: impl Into<String>, message: impl Into<String>) {
    set_form_errors(record, FormMap::from([(key.into(), message.into())]));
}

/// Merge form values; new entries win on colliding keys.
pub fn set_form_values(record: &mut SessionRecord, values: FormMap) {
    let mut merged = peek_form_map(record, FORM_VALUES);
    merged.extend(values);
    record.insert(FORM_VALUES, encode_form_map(&merged));
}

pub fn set_form_value(record: &mut SessionRecord, key: impl Into<String>, value: impl Into<String>) {
    set_form_values(record, FormMap::from([(key.into(), value.into())]));
}

/// Set the value of field `key` for group member `id` (stored as `key:id`).
pub fn set_form_array_value(record: &mut SessionRecord, key: &str, value: impl Into<String>, id: &str) {
    set_form_value(record, array_key(key, id), value);
}

/// Set the error of field `key` for group member `id` (stored as `key:id`).
pub fn set_form_array_error(record: &mut SessionRecord, key: &str, message: impl Into<String>, id: &str) {
    set_form_error(record, array_key(key, id), message);
}

/// Record `id` as the value of `key:id`.
pub fn set_group_value(record: &mut SessionRecord, key: &str, id: &str) {
    set_form_value(record, array_key(key, id), id);
}

/// Append `id` to the member list of group `key`.
pub fn set_group(record: &mut SessionRecord, key: impl Into<String>, id: impl Into<String>) {
    let mut groups = peek_group_map(record, GROUP_VALUES);
    groups.entry(key.into()).or_default().push(id.into());
    record.insert(GROUP_VALUES, encode_group_map(&groups));
}

/// Merge whole groups; new groups replace colliding ones.
pub fn set_group_values(record: &mut SessionRecord, values: GroupMap) {
    let mut groups = peek_group_map(record, GROUP_VALUES);
    groups.extend(values);
    record.insert(GROUP_VALUES, encode_group_map(&groups));
}
