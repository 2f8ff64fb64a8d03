//! Batch message body
//!
//! A [`Batch`] is the unit that travels through the queue: an ordered list of
//! raw field mappings, encoded as a JSON array of objects. Records inside a
//! batch are not validated yet; the consumer does that after decoding.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, RowpipeError};

/// One unvalidated row: column name to JSON value
pub type RawRecord = Map<String, Value>;

/// Ordered sequence of raw records carried by one queue message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch {
    records: Vec<RawRecord>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: RawRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<RawRecord> {
        self.records
    }

    /// Encode as the queue message body
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(RowpipeError::Serialization)
    }

    /// Decode a queue message body.
    ///
    /// Anything other than a JSON array of objects is rejected as
    /// [`RowpipeError::Deserialization`]. An empty array decodes to an empty
    /// batch; callers decide what to do with it.
    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(RowpipeError::Deserialization)
    }
}

impl From<Vec<RawRecord>> for Batch {
    fn from(records: Vec<RawRecord>) -> Self {
        Self { records }
    }
}

impl FromIterator<RawRecord> for Batch {
    fn from_iter<I: IntoIterator<Item = RawRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(name: &str) -> RawRecord {
        json!({ "name": name, "age": "30" }).as_object().cloned().unwrap()
    }

    #[test]
    fn test_encoding_is_a_json_array_of_objects() {
        let batch: Batch = vec![row("a"), row("b")].into();
        let body = batch.to_bytes().unwrap();

        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!([{ "name": "a", "age": "30" }, { "name": "b", "age": "30" }]));
    }

    #[test]
    fn test_decode_preserves_order() {
        let body = br#"[{"name":"first"},{"name":"second"},{"name":"third"}]"#;
        let batch = Batch::from_bytes(body).unwrap();

        let names: Vec<_> = batch.records().iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![json!("first"), json!("second"), json!("third")]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let bodies: [&[u8]; 5] = [b"not json", b"{\"name\":\"x\"}", b"[1, 2, 3]", b"", b"[{\"a\":1}"];
        for body in bodies {
            let err = Batch::from_bytes(body).unwrap_err();
            assert!(matches!(err, RowpipeError::Deserialization(_)), "{body:?}");
        }
    }

    #[test]
    fn test_empty_array_decodes_to_empty_batch() {
        let batch = Batch::from_bytes(b"[]").unwrap();
        assert!(batch.is_empty());
    }
}
