use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::config::ConverterKind;
use shared::{Error, Result};

/// Turns values into the byte payload a remote store keeps, and back.
///
/// Only round-trips within one converter are guaranteed.
pub trait Converter: Clone + Send + Sync + 'static {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;
}

/// Self-describing and readable from other languages.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonConverter;

impl Converter for JsonConverter {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::EncodeFailed(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        serde_json::from_slice(data).map_err(|e| Error::DecodeFailed(e.to_string()))
    }
}

/// Compact and exact, but only readable by Rust peers using the same types.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeConverter;

impl Converter for BincodeConverter {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| Error::EncodeFailed(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        bincode::deserialize(data).map_err(|e| Error::DecodeFailed(e.to_string()))
    }
}

impl Converter for ConverterKind {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            ConverterKind::Json => JsonConverter.encode(value),
            ConverterKind::Binary => BincodeConverter.encode(value),
        }
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            ConverterKind::Json => JsonConverter.decode(data),
            ConverterKind::Binary => BincodeConverter.decode(data),
        }
    }
}
