// Canonical encoding shared by disk, wire and hash input.
// Bincode standard config; decoding refuses trailing bytes so a value has one encoding.
use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};

/// Serialize data using bincode 2.0 with standard configuration
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))
}

/// Deserialize data using bincode 2.0 with standard configuration
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard();
    let (data, read) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| BlockchainError::Serialization(format!("Deserialization failed: {e}")))?;
    if read != bytes.len() {
        return Err(BlockchainError::Serialization(format!(
            "Deserialization left {} trailing bytes",
            bytes.len() - read
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
    struct Record {
        id: u64,
        name: String,
        payload: Vec<Vec<u8>>,
    }

    #[test]
    fn test_serialize_deserialize() {
        let original = Record {
            id: 42,
            name: "record".to_string(),
            payload: vec![vec![1, 2], vec![], vec![3]],
        };

        let bytes = serialize(&original).expect("Serialization should work");
        let decoded: Record = deserialize(&bytes).expect("Deserialization should work");

        assert_eq!(original, decoded);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let record = Record {
            id: 7,
            name: "same".to_string(),
            payload: vec![vec![9; 4]],
        };
        assert_eq!(serialize(&record).unwrap(), serialize(&record.clone()).unwrap());
    }

    #[test]
    fn test_deserialize_rejects_trailing_bytes() {
        let mut bytes = serialize(&5u64).unwrap();
        bytes.push(0);
        let result: Result<u64> = deserialize(&bytes);
        assert!(matches!(result, Err(BlockchainError::Serialization(_))));
    }

    #[test]
    fn test_deserialize_invalid_data() {
        let invalid_bytes = vec![0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<Record> = deserialize(&invalid_bytes);
        assert!(result.is_err());
    }
}
