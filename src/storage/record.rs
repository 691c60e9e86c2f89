//! Blob operations for record storage.
//!
//! Every record is stored as a separate JSON file. The envelope carries the
//! record key (checked against the file name on read) and the time the
//! record was last written; the payload lives under `body`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, RecordKey};

/// A stored record: key, write timestamp and a JSON body.
///
/// The format stored in Git:
/// ```text
/// {
///   "_key": "01hx...",
///   "_written_at": "2024-01-01T00:00:00+00:00",
///   "body": { ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: RecordKey,
    pub written_at: String,
    pub body: Value,
}

impl Record {
    /// Wrap a serializable value into a record stamped with the current time.
    pub fn from_body<T: Serialize>(key: RecordKey, body: &T) -> StorageResult<Self> {
        Ok(Self {
            key,
            written_at: chrono::Utc::now().to_rfc3339(),
            body: serde_json::to_value(body)?,
        })
    }

    /// Decode the body into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> StorageResult<T> {
        serde_json::from_value(self.body.clone()).map_err(|e| StorageError::CorruptedData {
            path: format!("{}.json", self.key).into(),
            reason: e.to_string(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct RecordJson {
    #[serde(rename = "_key")]
    key: String,
    #[serde(rename = "_written_at")]
    written_at: String,
    body: Value,
}

/// serialize a record to JSON bytes
pub fn serialize_record(record: &Record) -> StorageResult<Vec<u8>> {
    let json = RecordJson {
        key: record.key.as_str().to_string(),
        written_at: record.written_at.clone(),
        body: record.body.clone(),
    };

    Ok(serde_json::to_vec_pretty(&json)?)
}

/// deserialize a record from JSON bytes
///
/// validates that the key in the JSON matches the file it was read from
pub fn deserialize_record(bytes: &[u8], expected_key: &RecordKey) -> StorageResult<Record> {
    let json: RecordJson = serde_json::from_slice(bytes)?;

    if json.key != expected_key.as_str() {
        return Err(StorageError::CorruptedData {
            path: format!("{}.json", expected_key).into(),
            reason: format!(
                "key mismatch: file name suggests '{}' but content has '{}'",
                expected_key, json.key
            ),
        });
    }

    Ok(Record {
        key: expected_key.clone(),
        written_at: json.written_at,
        body: json.body,
    })
}

/// write a record as a blob to the repository
pub fn write_blob(repo: &git2::Repository, record: &Record) -> StorageResult<BlobId> {
    let bytes = serialize_record(record)?;
    let oid = repo.blob(&bytes)?;
    Ok(BlobId::new(oid))
}

/// read a blob's content from the repository
pub fn read_blob(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}
