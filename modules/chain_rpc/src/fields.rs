//! Path-tracking JSON field access
//!
//! Validation is lenient but total: absent mandatory fields become
//! `MissingField` with the full dotted path, wrong types become
//! `TypeMismatch`. Nothing panics on arbitrary node output.

use serde_json::Value;
use tessera_common::ValidationError;

/// A cursor into a JSON document that remembers how it got there
#[derive(Debug, Clone)]
pub struct Json<'a> {
    value: Option<&'a Value>,
    path: String,
}

impl<'a> Json<'a> {
    pub fn root(value: &'a Value) -> Self {
        Self {
            value: Some(value),
            path: String::new(),
        }
    }

    fn child(&self, value: Option<&'a Value>, segment: String) -> Json<'a> {
        let path = if self.path.is_empty() {
            segment
        } else if segment.starts_with('[') {
            format!("{}{segment}", self.path)
        } else {
            format!("{}.{segment}", self.path)
        };
        Json { value, path }
    }

    /// Navigate an object key; missing keys surface when a value is required
    pub fn at(&self, key: &str) -> Json<'a> {
        let value = self.value.and_then(|v| v.get(key));
        self.child(value, key.to_string())
    }

    pub fn index(&self, i: usize) -> Json<'a> {
        let value = self.value.and_then(|v| v.get(i));
        self.child(value, format!("[{i}]"))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn exists(&self) -> bool {
        matches!(self.value, Some(v) if !v.is_null())
    }

    fn present(&self) -> Result<&'a Value, ValidationError> {
        match self.value {
            Some(v) if !v.is_null() => Ok(v),
            _ => Err(ValidationError::MissingField {
                path: self.path.clone(),
            }),
        }
    }

    fn mismatch(&self, expected: &'static str) -> ValidationError {
        ValidationError::TypeMismatch {
            path: self.path.clone(),
            expected,
        }
    }

    pub fn str(&self) -> Result<&'a str, ValidationError> {
        self.present()?.as_str().ok_or_else(|| self.mismatch("string"))
    }

    /// Integers arrive either as JSON numbers or as decimal strings
    /// (the node serializes mutez and counters as strings)
    pub fn i64(&self) -> Result<i64, ValidationError> {
        let v = self.present()?;
        match v {
            Value::Number(n) => n.as_i64().ok_or_else(|| self.mismatch("int64")),
            Value::String(s) => s.parse().map_err(|_| self.mismatch("int64")),
            _ => Err(self.mismatch("int64")),
        }
    }

    pub fn i32(&self) -> Result<i32, ValidationError> {
        i32::try_from(self.i64()?).map_err(|_| self.mismatch("int32"))
    }

    pub fn bool(&self) -> Result<bool, ValidationError> {
        self.present()?.as_bool().ok_or_else(|| self.mismatch("bool"))
    }

    pub fn array(&self) -> Result<Vec<Json<'a>>, ValidationError> {
        let items = self.present()?.as_array().ok_or_else(|| self.mismatch("array"))?;
        Ok(items
            .iter()
            .enumerate()
            .map(|(i, v)| self.child(Some(v), format!("[{i}]")))
            .collect())
    }

    /// Optional view: None when absent or null
    pub fn opt(&self) -> Option<Json<'a>> {
        if self.exists() {
            Some(self.clone())
        } else {
            None
        }
    }

    pub fn raw(&self) -> Option<&'a Value> {
        self.value
    }

    /// RFC 3339 timestamp to UNIX seconds
    pub fn timestamp(&self) -> Result<i64, ValidationError> {
        let text = self.str()?;
        chrono::DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.timestamp())
            .map_err(|_| ValidationError::BadTimestamp {
                value: text.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_field_reports_full_path() {
        let doc = json!({"header": {"level": 5}});
        let root = Json::root(&doc);
        let err = root.at("header").at("predecessor").str().unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                path: "header.predecessor".into()
            }
        );
    }

    #[test]
    fn type_mismatch_reports_expectation() {
        let doc = json!({"header": {"level": "not a number at all"}});
        let err = Json::root(&doc).at("header").at("level").i64().unwrap_err();
        assert_eq!(
            err,
            ValidationError::TypeMismatch {
                path: "header.level".into(),
                expected: "int64"
            }
        );
    }

    #[test]
    fn integers_parse_from_numbers_and_strings() {
        let doc = json!({"a": 42, "b": "500000"});
        let root = Json::root(&doc);
        assert_eq!(root.at("a").i64().unwrap(), 42);
        assert_eq!(root.at("b").i64().unwrap(), 500_000);
    }

    #[test]
    fn array_paths_carry_indexes() {
        let doc = json!({"ops": [[{"hash": 5}]]});
        let root = Json::root(&doc);
        let groups = root.at("ops").array().unwrap();
        let inner = groups[0].array().unwrap();
        let err = inner[0].at("hash").str().unwrap_err();
        assert_eq!(
            err,
            ValidationError::TypeMismatch {
                path: "ops[0][0].hash".into(),
                expected: "string"
            }
        );
    }

    #[test]
    fn timestamps_parse_rfc3339() {
        let doc = json!({"t": "2020-09-28T08:49:34Z", "bad": "yesterday"});
        let root = Json::root(&doc);
        assert_eq!(root.at("t").timestamp().unwrap(), 1_601_282_974);
        assert!(matches!(
            root.at("bad").timestamp(),
            Err(ValidationError::BadTimestamp { .. })
        ));
    }
}
