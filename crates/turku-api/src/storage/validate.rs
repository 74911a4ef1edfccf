//! Field validators applied before a row is written.

/// Longest accepted value for short text fields.
pub const MAX_NAME_LEN: usize = 200;
/// Longest accepted SSH public key.
pub const MAX_KEY_LEN: usize = 2048;
/// Longest accepted serialized filter or exclude list.
pub const MAX_RULES_LEN: usize = 2048;

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn required(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "This field cannot be blank"));
    }
    max_len(field, value, max)
}

pub fn optional(
    field: &'static str,
    value: Option<&str>,
    max: usize,
) -> Result<(), ValidationError> {
    value.map_or(Ok(()), |v| max_len(field, v, max))
}

pub fn max_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len > max {
        return Err(ValidationError::new(
            field,
            format!("Ensure this value has at most {max} characters (it has {len})"),
        ));
    }
    Ok(())
}

pub fn uuid(field: &'static str, value: &str) -> Result<(), ValidationError> {
    uuid::Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| ValidationError::new(field, "Invalid UUID format"))
}

pub fn port(field: &'static str, value: i64) -> Result<(), ValidationError> {
    if (1..=65535).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new(field, "Must be between 1 and 65535"))
    }
}

pub fn non_negative(field: &'static str, value: i64) -> Result<(), ValidationError> {
    if value < 0 {
        return Err(ValidationError::new(field, "Must not be negative"));
    }
    Ok(())
}

/// Serialized rule list: a JSON array of strings within the length cap.
pub fn json_string_list(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<(), ValidationError> {
    max_len(field, value, max)?;
    serde_json::from_str::<Vec<String>>(value)
        .map(|_| ())
        .map_err(|_| ValidationError::new(field, "Must be a valid JSON string list"))
}

pub fn one_of(
    field: &'static str,
    value: Option<&str>,
    choices: &[&str],
) -> Result<(), ValidationError> {
    match value {
        Some(v) if !choices.contains(&v) => Err(ValidationError::new(
            field,
            format!("Value {v:?} is not a valid choice"),
        )),
        _ => Ok(()),
    }
}

/// Encode a rule or key list the way it is stored.
pub fn encode_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a stored list, treating corrupt values as empty.
pub fn decode_list(stored: &str) -> Vec<String> {
    serde_json::from_str(stored).unwrap_or_default()
}
