//! Wire types exchanged between the relay and the tunnel client.
//!
//! Every frame is a single JSON document. Requests travel relay → client,
//! responses travel client → relay, and both carry the correlation ID in a
//! dedicated `id` field so it can never collide with application headers.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Ordered header list. Duplicate names are kept, in order.
pub type Headers = Vec<(String, String)>;

/// Connection-scoped headers that never cross the tunnel.
/// Bodies are fully buffered on both sides, so framing headers of one hop
/// mean nothing on the next.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Public HTTP request forwarded down the tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRequest {
    pub id: String,
    pub method: String,
    /// Request target: path plus `?query` when present
    pub path: String,
    #[serde(default, deserialize_with = "headers_format::deserialize")]
    pub headers: Headers,
    #[serde(default, deserialize_with = "body_format::deserialize")]
    pub body: Vec<u8>,
}

/// Reply produced by the tunnel client for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelResponse {
    pub id: String,
    pub status: u16,
    #[serde(default, deserialize_with = "headers_format::deserialize")]
    pub headers: Headers,
    #[serde(default, deserialize_with = "body_format::deserialize")]
    pub body: Vec<u8>,
}

/// Sent by the relay right after a client connection is installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registered {
    pub success: bool,
    pub epoch: u64,
    pub version: u8,
}

impl Registered {
    pub fn new(epoch: u64) -> Self {
        Self {
            success: true,
            epoch,
            version: PROTOCOL_VERSION,
        }
    }
}

impl TunnelRequest {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl TunnelResponse {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Accepts `[["name", "value"], ...]` as well as the object form
/// `{"name": ["v1", "v2"], "other": "v"}`, preserving document order.
mod headers_format {
    use serde::de::{Deserializer, MapAccess, SeqAccess, Visitor};
    use serde::Deserialize;
    use std::fmt;

    use super::Headers;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Values {
        One(String),
        Many(Vec<String>),
    }

    struct HeadersVisitor;

    impl<'de> Visitor<'de> for HeadersVisitor {
        type Value = Headers;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a list of header pairs or a header map")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut headers = Vec::new();
            while let Some(pair) = seq.next_element::<(String, String)>()? {
                headers.push(pair);
            }
            Ok(headers)
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut headers = Vec::new();
            while let Some((name, values)) = map.next_entry::<String, Values>()? {
                match values {
                    Values::One(v) => headers.push((name, v)),
                    Values::Many(vs) => {
                        headers.extend(vs.into_iter().map(|v| (name.clone(), v)));
                    }
                }
            }
            Ok(headers)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Headers, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(HeadersVisitor)
    }
}

/// Accepts a byte array, a UTF-8 string, or `null` (empty body).
mod body_format {
    use serde::de::{Deserializer, SeqAccess, Visitor};
    use std::fmt;

    struct BodyVisitor;

    impl<'de> Visitor<'de> for BodyVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a byte array or a string")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.as_bytes().to_vec())
        }

        fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
            Ok(v.into_bytes())
        }

        fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(b) = seq.next_element::<u8>()? {
                bytes.push(b);
            }
            Ok(bytes)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(BodyVisitor)
    }
}
