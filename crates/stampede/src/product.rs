// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The cached record and its wire encoding.

use bytes::Bytes;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// The record cached under the hot key.
///
/// `fetched_at` and `request_sequence` identify the backend call that produced the
/// record: two responses carrying the same pair came from the same fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Product identifier.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Price in minor currency units.
    pub price: u64,
    /// When the backend produced this record.
    pub fetched_at: Timestamp,
    /// The backend's monotonically increasing call number.
    pub request_sequence: u64,
}

/// A cached payload could not be encoded or decoded.
#[derive(Debug, thiserror::Error)]
#[error("malformed product payload")]
pub struct CodecError(#[from] serde_json::Error);

impl Product {
    /// Encodes the record as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if serialization fails.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decodes a record previously produced by [`Product::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if `payload` is not a valid encoded record.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Product {
        Product {
            id: 1,
            name: "Popular Product".to_string(),
            price: 9800,
            fetched_at: "2024-05-01T12:00:00.123456789Z".parse().unwrap(),
            request_sequence: 3,
        }
    }

    #[test]
    fn encodes_camel_case_fields() {
        let encoded = sample().encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(json["id"], 1);
        assert_eq!(json["name"], "Popular Product");
        assert_eq!(json["price"], 9800);
        assert_eq!(json["fetchedAt"], "2024-05-01T12:00:00.123456789Z");
        assert_eq!(json["requestSequence"], 3);
    }

    #[test]
    fn decode_restores_the_record() {
        let product = sample();
        assert_eq!(Product::decode(&product.encode().unwrap()).unwrap(), product);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let error = Product::decode(b"not json").unwrap_err();
        assert_eq!(error.to_string(), "malformed product payload");
    }
}
