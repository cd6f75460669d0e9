//! Wire messages: a 12-byte zero-padded command tag followed by a JSON payload
//! that runs to the end of the stream. One message per connection.

use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const COMMAND_LENGTH: usize = 12;
pub const NODE_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Block,
    Tx,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpType::Block => write!(f, "block"),
            OpType::Tx => write!(f, "tx"),
        }
    }
}

/// `BestHeight` is -1 when the sender has no blocks at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Version {
    pub version: i64,
    pub best_height: i64,
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Addr {
    pub addr_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetBlocks {
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Inv {
    pub addr_from: String,
    #[serde(rename = "Type")]
    pub op_type: OpType,
    pub items: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetData {
    pub addr_from: String,
    #[serde(rename = "Type")]
    pub op_type: OpType,
    #[serde(rename = "ID")]
    pub id: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockData {
    pub addr_from: String,
    pub block: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TxData {
    #[serde(rename = "AddFrom")]
    pub addr_from: String,
    pub transaction: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(Version),
    Addr(Addr),
    GetBlocks(GetBlocks),
    Inv(Inv),
    GetData(GetData),
    Block(BlockData),
    Tx(TxData),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Addr(_) => "addr",
            Message::GetBlocks(_) => "getblocks",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
        }
    }

    /// Sender address; `addr` carries none.
    pub fn addr_from(&self) -> Option<&str> {
        match self {
            Message::Version(m) => Some(&m.addr_from),
            Message::Addr(_) => None,
            Message::GetBlocks(m) => Some(&m.addr_from),
            Message::Inv(m) => Some(&m.addr_from),
            Message::GetData(m) => Some(&m.addr_from),
            Message::Block(m) => Some(&m.addr_from),
            Message::Tx(m) => Some(&m.addr_from),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Message::Version(m) => serde_json::to_vec(m)?,
            Message::Addr(m) => serde_json::to_vec(m)?,
            Message::GetBlocks(m) => serde_json::to_vec(m)?,
            Message::Inv(m) => serde_json::to_vec(m)?,
            Message::GetData(m) => serde_json::to_vec(m)?,
            Message::Block(m) => serde_json::to_vec(m)?,
            Message::Tx(m) => serde_json::to_vec(m)?,
        };

        let mut frame = command_to_bytes(self.command()).to_vec();
        frame.extend(payload);
        Ok(frame)
    }

    pub fn decode(frame: &[u8]) -> Result<Message> {
        if frame.len() < COMMAND_LENGTH {
            return Err(BlockchainError::Protocol(format!(
                "Frame of {} bytes is shorter than the command tag",
                frame.len()
            )));
        }
        let (tag, payload) = frame.split_at(COMMAND_LENGTH);

        let message = match bytes_to_command(tag)?.as_str() {
            "version" => Message::Version(serde_json::from_slice(payload)?),
            "addr" => Message::Addr(serde_json::from_slice(payload)?),
            "getblocks" => Message::GetBlocks(serde_json::from_slice(payload)?),
            "inv" => Message::Inv(serde_json::from_slice(payload)?),
            "getdata" => Message::GetData(serde_json::from_slice(payload)?),
            "block" => Message::Block(serde_json::from_slice(payload)?),
            "tx" => Message::Tx(serde_json::from_slice(payload)?),
            unknown => {
                return Err(BlockchainError::Protocol(format!(
                    "Unknown command {unknown:?}"
                )))
            }
        };
        Ok(message)
    }
}

fn command_to_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0u8; COMMAND_LENGTH];
    for (slot, b) in bytes.iter_mut().zip(command.bytes()) {
        *slot = b;
    }
    bytes
}

fn bytes_to_command(bytes: &[u8]) -> Result<String> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|e| BlockchainError::Protocol(format!("Command tag is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let msg = Message::GetBlocks(GetBlocks {
            addr_from: "127.0.0.1:3000".to_string(),
        });
        let frame = msg.encode().unwrap();

        assert_eq!(&frame[..9], b"getblocks");
        assert!(frame[9..COMMAND_LENGTH].iter().all(|b| *b == 0));
        assert_eq!(&frame[COMMAND_LENGTH..], br#"{"AddrFrom":"127.0.0.1:3000"}"#);
        assert_eq!(Message::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_payload_field_names() {
        let tx = Message::Tx(TxData {
            addr_from: "a".to_string(),
            transaction: vec![1, 2],
        });
        let json = String::from_utf8(tx.encode().unwrap()[COMMAND_LENGTH..].to_vec()).unwrap();
        assert_eq!(json, r#"{"AddFrom":"a","Transaction":[1,2]}"#);

        let getdata = Message::GetData(GetData {
            addr_from: "a".to_string(),
            op_type: OpType::Block,
            id: vec![7],
        });
        let json =
            String::from_utf8(getdata.encode().unwrap()[COMMAND_LENGTH..].to_vec()).unwrap();
        assert_eq!(json, r#"{"AddrFrom":"a","Type":"block","ID":[7]}"#);

        let version = Message::Version(Version {
            version: NODE_VERSION,
            best_height: -1,
            addr_from: "a".to_string(),
        });
        let json =
            String::from_utf8(version.encode().unwrap()[COMMAND_LENGTH..].to_vec()).unwrap();
        assert_eq!(json, r#"{"Version":1,"BestHeight":-1,"AddrFrom":"a"}"#);
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        assert!(matches!(
            Message::decode(b"version"),
            Err(BlockchainError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_command() {
        let mut frame = command_to_bytes("ping").to_vec();
        frame.extend(b"{}");
        assert!(matches!(
            Message::decode(&frame),
            Err(BlockchainError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_payload() {
        let mut frame = command_to_bytes("inv").to_vec();
        frame.extend(br#"{"AddrFrom":"a","Type":"coin","Items":[]}"#);
        assert!(matches!(
            Message::decode(&frame),
            Err(BlockchainError::Protocol(_))
        ));
    }
}
