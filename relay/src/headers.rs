//! Header conversion between HTTP messages and tunnel frames
//!
//! Headers cross the tunnel as an ordered list of pairs so that duplicate
//! names survive in their original order. Hop-by-hop headers describe the
//! public connection only and are dropped in both directions.

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use revtun_shared::protocol::{is_hop_by_hop, Headers};

/// Flatten request headers for the tunnel, one pair per value.
///
/// `HeaderMap` groups values by name, so interleaved duplicates
/// (`A, B, A`) come out as `A, A, B`. Order within one name is kept.
pub fn to_tunnel(map: &HeaderMap) -> Headers {
    map.iter()
        .filter(|(k, _)| !is_hop_by_hop(k.as_str()))
        .filter_map(|(k, v)| match v.to_str() {
            Ok(val) => Some((k.as_str().to_string(), val.to_string())),
            Err(_) => {
                debug!(header = %k, "skipping non-text header value");
                None
            }
        })
        .collect()
}

/// Append the client's reply headers onto a response, keeping duplicates.
///
/// Returns the number of headers that were skipped.
pub fn apply_reply(target: &mut HeaderMap, headers: &[(String, String)]) -> usize {
    let mut skipped = 0;
    for (k, v) in headers {
        if is_hop_by_hop(k) {
            skipped += 1;
            continue;
        }
        match (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(v)) {
            (Ok(name), Ok(value)) => {
                target.append(name, value);
            }
            _ => {
                debug!(header = %k, "skipping invalid reply header");
                skipped += 1;
            }
        }
    }
    skipped
}
