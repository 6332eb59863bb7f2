use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::hops::Hop;

/// Message as carried on either bus.
///
/// Only the routing headers are typed; the body (`data` and anything else at
/// the top level) and unknown header fields are carried through untouched.
/// Conversion goes through a plain JSON object so number literals keep their
/// exact text on re-encode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Envelope {
    pub headers: Headers,
    pub body: Map<String, Value>,
}

/// Routing headers the broker reads or rewrites.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Headers {
    seen_by: Vec<Value>,
    pub reply_to: Option<String>,
    pub federation: Option<FederationHeader>,
    pub extra: Map<String, Value>,
}

/// Federation routing block attached by federated clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct FederationHeader {
    /// Request id, stable across every hop of a request and its replies.
    pub req: String,
    /// Reply subject of the originating client on the federation bus.
    pub reply_to: Option<String>,
    /// Collective subjects a request should be delivered to.
    pub target: Vec<String>,
    pub extra: Map<String, Value>,
}

const HEADERS: &str = "headers";
const SEEN_BY: &str = "seen-by";
const REPLY_TO: &str = "reply-to";
const FEDERATION: &str = "federation";
const REQ: &str = "req";
const TARGET: &str = "target";

impl Envelope {
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(bytes).map_err(|err| CoreError::Decode(err.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec(self).map_err(|err| CoreError::Encode(err.to_string()))
    }

    /// Request id from the federation header, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.headers
            .federation
            .as_ref()
            .map(|f| f.req.as_str())
            .filter(|req| !req.is_empty())
    }
}

impl Headers {
    /// Hops recorded so far, oldest first, exactly as received.
    pub fn seen_by(&self) -> &[Value] {
        &self.seen_by
    }

    pub fn hop_count(&self) -> usize {
        self.seen_by.len()
    }

    /// Appends one hop and returns the new hop count.
    ///
    /// Earlier entries are kept verbatim whatever their shape, including
    /// `null` servers written by peers that were not yet connected.
    pub fn record_hop(&mut self, hop: Hop) -> usize {
        self.seen_by.push(hop.into_entry());
        self.seen_by.len()
    }
}

impl TryFrom<Map<String, Value>> for Envelope {
    type Error = CoreError;

    fn try_from(mut body: Map<String, Value>) -> Result<Self, Self::Error> {
        let headers = match body.remove(HEADERS) {
            None => Headers::default(),
            Some(Value::Object(map)) => Headers::try_from(map)?,
            Some(_) => return Err(invalid(HEADERS, "an object")),
        };
        Ok(Self { headers, body })
    }
}

impl From<Envelope> for Map<String, Value> {
    fn from(envelope: Envelope) -> Self {
        let mut map = Map::with_capacity(envelope.body.len() + 1);
        map.insert(HEADERS.to_string(), Value::Object(envelope.headers.into()));
        map.extend(envelope.body);
        map
    }
}

impl TryFrom<Map<String, Value>> for Headers {
    type Error = CoreError;

    fn try_from(mut extra: Map<String, Value>) -> Result<Self, Self::Error> {
        let seen_by = match extra.remove(SEEN_BY) {
            None => Vec::new(),
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(invalid(SEEN_BY, "a list")),
        };
        let reply_to = optional_string(extra.remove(REPLY_TO), REPLY_TO)?;
        let federation = match extra.remove(FEDERATION) {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(FederationHeader::try_from(map)?),
            Some(_) => return Err(invalid(FEDERATION, "an object")),
        };
        Ok(Self {
            seen_by,
            reply_to,
            federation,
            extra,
        })
    }
}

impl From<Headers> for Map<String, Value> {
    fn from(headers: Headers) -> Self {
        let mut map = Map::new();
        map.insert(SEEN_BY.to_string(), Value::Array(headers.seen_by));
        if let Some(reply_to) = headers.reply_to {
            map.insert(REPLY_TO.to_string(), Value::String(reply_to));
        }
        if let Some(federation) = headers.federation {
            map.insert(FEDERATION.to_string(), Value::Object(federation.into()));
        }
        map.extend(headers.extra);
        map
    }
}

impl TryFrom<Map<String, Value>> for FederationHeader {
    type Error = CoreError;

    fn try_from(mut extra: Map<String, Value>) -> Result<Self, Self::Error> {
        let req = optional_string(extra.remove(REQ), REQ)?.unwrap_or_default();
        let reply_to = optional_string(extra.remove(REPLY_TO), REPLY_TO)?;
        let target = match extra.remove(TARGET) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(subject) => Ok(subject),
                    _ => Err(invalid(TARGET, "a list of strings")),
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(invalid(TARGET, "a list of strings")),
        };
        Ok(Self {
            req,
            reply_to,
            target,
            extra,
        })
    }
}

impl From<FederationHeader> for Map<String, Value> {
    fn from(header: FederationHeader) -> Self {
        let mut map = Map::new();
        map.insert(REQ.to_string(), Value::String(header.req));
        if let Some(reply_to) = header.reply_to {
            map.insert(REPLY_TO.to_string(), Value::String(reply_to));
        }
        if !header.target.is_empty() {
            let target = header.target.into_iter().map(Value::String).collect();
            map.insert(TARGET.to_string(), Value::Array(target));
        }
        map.extend(header.extra);
        map
    }
}

fn optional_string(value: Option<Value>, field: &'static str) -> Result<Option<String>, CoreError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(invalid(field, "a string")),
    }
}

fn invalid(field: &str, expected: &str) -> CoreError {
    CoreError::Decode(format!("`{field}` must be {expected}"))
}
