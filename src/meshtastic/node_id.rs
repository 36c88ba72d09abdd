//! Canonical node identifiers.
//!
//! Meshtastic nodes are 32-bit numbers. On the wire they show up as JSON
//! integers, `!`-prefixed hex strings, bare hex strings or decimal strings
//! depending on firmware and gateway. Everything is folded into [`NodeId`],
//! whose canonical text form is exactly 8 lowercase hex digits with no `!`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum NodeIdError {
    #[error("node id is empty")]
    Empty,

    #[error("node id '{0}' is neither decimal nor hex")]
    Invalid(String),

    #[error("node id {0} does not fit in 32 bits")]
    OutOfRange(u64),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Destination used for channel-wide broadcasts.
    pub const BROADCAST: NodeId = NodeId(0xffff_ffff);

    pub const fn new(num: u32) -> Self {
        NodeId(num)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    pub fn from_u64(num: u64) -> Result<Self, NodeIdError> {
        u32::try_from(num)
            .map(NodeId)
            .map_err(|_| NodeIdError::OutOfRange(num))
    }

    /// Interpret a JSON value (number or string) as a node id.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, NodeIdError> {
        match value {
            serde_json::Value::Number(n) => match n.as_u64() {
                Some(num) => Self::from_u64(num),
                None => Err(NodeIdError::Invalid(n.to_string())),
            },
            serde_json::Value::String(s) => s.parse(),
            other => Err(NodeIdError::Invalid(other.to_string())),
        }
    }
}

/// Parse a textual node id.
///
/// Precedence:
/// 1. `!`-prefixed strings and strings of exactly 8 hex digits are hex
///    (this keeps canonical ids stable even when they are all digits);
/// 2. all-decimal strings are integers;
/// 3. remaining strings of up to 8 hex digits (optionally `0x`-prefixed) are hex.
///
/// Name-based resolution needs a registry and lives in
/// [`Registry::resolve_node_id`](crate::registry::Registry::resolve_node_id).
impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(NodeIdError::Empty);
        }
        if let Some(hex) = s.strip_prefix('!') {
            return parse_hex(hex, raw);
        }
        if s.len() == 8 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return parse_hex(s, raw);
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            let num: u64 = s
                .parse()
                .map_err(|_| NodeIdError::Invalid(raw.to_string()))?;
            return Self::from_u64(num);
        }
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        parse_hex(hex, raw)
    }
}

fn parse_hex(hex: &str, raw: &str) -> Result<NodeId, NodeIdError> {
    if hex.is_empty() || hex.len() > 8 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(NodeIdError::Invalid(raw.to_string()));
    }
    u32::from_str_radix(hex, 16)
        .map(NodeId)
        .map_err(|_| NodeIdError::Invalid(raw.to_string()))
}

/// Canonical 8-char lowercase hex form of any accepted id spelling.
pub fn canonicalize(raw: &str) -> Result<String, NodeIdError> {
    raw.parse::<NodeId>().map(|id| id.to_string())
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:08x})", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(num: u32) -> Self {
        NodeId(num)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NodeIdVisitor;

        impl<'de> Visitor<'de> for NodeIdVisitor {
            type Value = NodeId;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a node id as an unsigned integer or a hex/decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<NodeId, E> {
                NodeId::from_u64(v).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<NodeId, E> {
                u64::try_from(v)
                    .map_err(|_| E::custom(NodeIdError::Invalid(v.to_string())))
                    .and_then(|v| NodeId::from_u64(v).map_err(E::custom))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<NodeId, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(NodeIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_is_eight_lowercase_hex() {
        for raw in ["!DA639058", "da639058", "3663958104", "0xda639058", "!1", "ff", "0"] {
            let c = canonicalize(raw).unwrap();
            assert_eq!(c.len(), 8, "{raw}");
            assert!(!c.starts_with('!'));
            assert_eq!(c, c.to_lowercase());
            assert_eq!(canonicalize(&c).unwrap(), c, "idempotent for {raw}");
        }
    }

    #[test]
    fn decimal_and_hex_spellings_agree() {
        assert_eq!(canonicalize("3663958104").unwrap(), "da639058");
        assert_eq!(canonicalize("!da639058").unwrap(), "da639058");
        assert_eq!(canonicalize("!00000001").unwrap(), "00000001");
    }

    #[test]
    fn eight_digit_ids_stay_hex() {
        // A canonical id made only of digits must not be re-read as decimal.
        let id = NodeId::new(0x1234_5678);
        assert_eq!(id.to_string(), "12345678");
        assert_eq!("12345678".parse::<NodeId>().unwrap(), id);
    }

    #[test]
    fn rejects_garbage_and_overflow() {
        assert_eq!("".parse::<NodeId>(), Err(NodeIdError::Empty));
        assert!(matches!("JTRC".parse::<NodeId>(), Err(NodeIdError::Invalid(_))));
        assert!(matches!("!123456789".parse::<NodeId>(), Err(NodeIdError::Invalid(_))));
        assert_eq!(
            "4294967296".parse::<NodeId>(),
            Err(NodeIdError::OutOfRange(4_294_967_296))
        );
    }

    #[test]
    fn serde_accepts_numbers_and_strings() {
        let a: NodeId = serde_json::from_str("3663958104").unwrap();
        let b: NodeId = serde_json::from_str("\"!da639058\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"da639058\"");
        assert!(serde_json::from_str::<NodeId>("-1").is_err());
    }
}
