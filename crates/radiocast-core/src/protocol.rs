//! Control protocol codec
//!
//! The wire unit is a JSON array whose first element is a three-letter
//! command tag, e.g. `["PIN","MTIzNA=="]` or `["LFM",{"1":{"1001":true}}]`.
//! Unknown tags are ignored by both sides.

use crate::error::{Error, Result};
use crate::types::{Call, CallId, LivefeedMap, PublicConfig, SearchOptions, SearchResults};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

/// Protocol version request/reply
pub const CMD_VER: &str = "VER";
/// Credential presentation / ack
pub const CMD_PIN: &str = "PIN";
/// Credential expired or unknown; session will close
pub const CMD_XPR: &str = "XPR";
/// Concurrency limit reached; session will close
pub const CMD_MAX: &str = "MAX";
/// Public config push
pub const CMD_CFG: &str = "CFG";
/// Livefeed subscription map replacement
pub const CMD_LFM: &str = "LFM";
/// Single call fetch / push
pub const CMD_CAL: &str = "CAL";
/// Call list search
pub const CMD_LCL: &str = "LCL";
/// Listener count broadcast
pub const CMD_LSC: &str = "LSC";

/// A control frame sent by a client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["VER"]` — ask for branding and version
    Version,

    /// `["PIN", base64(code)]` — present a credential (decoded here)
    Pin(String),

    /// `["LFM", {sys→{tg→bool}} | null]` — replace the subscription map;
    /// `null` detaches the session from the live feed
    Livefeed(Option<LivefeedMap>),

    /// `["CAL", id, flag?]` — fetch one call; the flag is opaque and echoed
    Call {
        /// Call to fetch
        id: CallId,
        /// Opaque client intent marker
        flag: Option<Value>,
    },

    /// `["LCL", options]` — run a historical search
    List(SearchOptions),

    /// Any tag this server does not understand
    Unknown(String),
}

/// A control frame sent by the server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// `["VER", {branding, version}]`
    Version {
        /// Site branding string
        branding: String,
        /// Server version
        version: String,
    },

    /// `["PIN"]` — credential accepted
    PinAck,

    /// `["XPR"]` — credential expired or unknown
    Expired,

    /// `["MAX"]` — too many concurrent sessions for this credential
    TooMany,

    /// `["CFG", config]`
    Config(Box<PublicConfig>),

    /// `["CAL", call, flag?]`
    Call {
        /// The call, audio included when stored locally
        call: Box<Call>,
        /// Echo of the client's flag, absent on live-feed pushes
        flag: Option<Value>,
    },

    /// `["LCL", {count, options, results}]`
    List(Box<SearchResults>),

    /// `["LSC", count]`
    ListenerCount(usize),
}

fn protocol_error(message: impl Into<String>) -> Error {
    Error::Protocol {
        message: message.into(),
    }
}

/// Decode a client frame
///
/// # Errors
///
/// Returns a protocol error if the text is not a tagged JSON array or a
/// known tag carries a malformed payload. Unknown tags decode successfully
/// into [`ClientMessage::Unknown`] so callers can ignore them.
pub fn decode_client(text: &str) -> Result<ClientMessage> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Array(items) = value else {
        return Err(protocol_error("frame is not an array"));
    };
    let tag = items
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| protocol_error("frame has no command tag"))?;

    match tag {
        CMD_VER => Ok(ClientMessage::Version),
        CMD_PIN => {
            let encoded = items
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| protocol_error("PIN frame has no credential"))?;
            let decoded = BASE64
                .decode(encoded)
                .map_err(|e| protocol_error(format!("PIN credential is not base64: {e}")))?;
            let code = String::from_utf8(decoded)
                .map_err(|_| protocol_error("PIN credential is not UTF-8"))?;
            Ok(ClientMessage::Pin(code))
        }
        CMD_LFM => match items.get(1) {
            None | Some(Value::Null) => Ok(ClientMessage::Livefeed(None)),
            Some(map) => {
                let map: LivefeedMap = serde_json::from_value(map.clone())?;
                Ok(ClientMessage::Livefeed(Some(map)))
            }
        },
        CMD_CAL => {
            let id = items
                .get(1)
                .and_then(Value::as_i64)
                .ok_or_else(|| protocol_error("CAL frame has no call id"))?;
            let flag = items.get(2).filter(|v| !v.is_null()).cloned();
            Ok(ClientMessage::Call { id, flag })
        }
        CMD_LCL => {
            let options = match items.get(1) {
                None | Some(Value::Null) => SearchOptions::default(),
                Some(value) => serde_json::from_value(value.clone())?,
            };
            Ok(ClientMessage::List(options))
        }
        other => Ok(ClientMessage::Unknown(other.to_string())),
    }
}

/// Encode a client frame (used by tests and by the forwarding client)
///
/// # Errors
///
/// Returns an error if a payload fails to serialize.
pub fn encode_client(message: &ClientMessage) -> Result<String> {
    let frame = match message {
        ClientMessage::Version => json!([CMD_VER]),
        ClientMessage::Pin(code) => json!([CMD_PIN, BASE64.encode(code)]),
        ClientMessage::Livefeed(None) => json!([CMD_LFM, Value::Null]),
        ClientMessage::Livefeed(Some(map)) => json!([CMD_LFM, serde_json::to_value(map)?]),
        ClientMessage::Call { id, flag } => match flag {
            Some(flag) => json!([CMD_CAL, id, flag]),
            None => json!([CMD_CAL, id]),
        },
        ClientMessage::List(options) => json!([CMD_LCL, serde_json::to_value(options)?]),
        ClientMessage::Unknown(tag) => json!([tag]),
    };
    Ok(frame.to_string())
}

/// Encode a server frame
///
/// # Errors
///
/// Returns an error if a payload fails to serialize.
pub fn encode_server(message: &ServerMessage) -> Result<String> {
    let frame = match message {
        ServerMessage::Version { branding, version } => {
            json!([CMD_VER, {"branding": branding, "version": version}])
        }
        ServerMessage::PinAck => json!([CMD_PIN]),
        ServerMessage::Expired => json!([CMD_XPR]),
        ServerMessage::TooMany => json!([CMD_MAX]),
        ServerMessage::Config(config) => json!([CMD_CFG, serde_json::to_value(config)?]),
        ServerMessage::Call { call, flag } => match flag {
            Some(flag) => json!([CMD_CAL, serde_json::to_value(call)?, flag]),
            None => json!([CMD_CAL, serde_json::to_value(call)?]),
        },
        ServerMessage::List(results) => json!([CMD_LCL, serde_json::to_value(results)?]),
        ServerMessage::ListenerCount(count) => json!([CMD_LSC, count]),
    };
    Ok(frame.to_string())
}

/// Decode a server frame (client side of the codec, used by tests)
///
/// # Errors
///
/// Returns a protocol error on malformed frames; `Ok(None)` on unknown tags.
pub fn decode_server(text: &str) -> Result<Option<ServerMessage>> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Array(items) = value else {
        return Err(protocol_error("frame is not an array"));
    };
    let tag = items
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| protocol_error("frame has no command tag"))?;

    let message = match tag {
        CMD_VER => {
            let payload = items
                .get(1)
                .ok_or_else(|| protocol_error("VER reply has no payload"))?;
            ServerMessage::Version {
                branding: payload
                    .get("branding")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                version: payload
                    .get("version")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }
        }
        CMD_PIN => ServerMessage::PinAck,
        CMD_XPR => ServerMessage::Expired,
        CMD_MAX => ServerMessage::TooMany,
        CMD_CFG => {
            let payload = items
                .get(1)
                .cloned()
                .ok_or_else(|| protocol_error("CFG frame has no payload"))?;
            ServerMessage::Config(Box::new(serde_json::from_value(payload)?))
        }
        CMD_CAL => {
            let payload = items
                .get(1)
                .cloned()
                .ok_or_else(|| protocol_error("CAL frame has no payload"))?;
            ServerMessage::Call {
                call: Box::new(serde_json::from_value(payload)?),
                flag: items.get(2).filter(|v| !v.is_null()).cloned(),
            }
        }
        CMD_LCL => {
            let payload = items
                .get(1)
                .cloned()
                .ok_or_else(|| protocol_error("LCL frame has no payload"))?;
            ServerMessage::List(Box::new(serde_json::from_value(payload)?))
        }
        CMD_LSC => {
            let count = items
                .get(1)
                .and_then(Value::as_u64)
                .ok_or_else(|| protocol_error("LSC frame has no count"))?;
            ServerMessage::ListenerCount(usize::try_from(count).unwrap_or(usize::MAX))
        }
        _ => return Ok(None),
    };

    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PublicSystem, Talkgroup};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_decode_pin() {
        // "1234" in base64
        let message = decode_client(r#"["PIN","MTIzNA=="]"#).unwrap();
        assert_eq!(message, ClientMessage::Pin("1234".to_string()));
    }

    #[test]
    fn test_decode_pin_rejects_bad_base64() {
        assert!(decode_client(r#"["PIN","not base64!!"]"#).is_err());
        assert!(decode_client(r#"["PIN"]"#).is_err());
    }

    #[test]
    fn test_decode_livefeed() {
        let message = decode_client(r#"["LFM",{"1":{"1001":true,"1002":false}}]"#).unwrap();
        let ClientMessage::Livefeed(Some(map)) = message else {
            panic!("expected a livefeed map");
        };
        assert!(map.is_active(1, 1001));
        assert!(!map.is_active(1, 1002));
    }

    #[test]
    fn test_decode_livefeed_null_detaches() {
        assert_eq!(
            decode_client(r#"["LFM",null]"#).unwrap(),
            ClientMessage::Livefeed(None)
        );
        assert_eq!(
            decode_client(r#"["LFM"]"#).unwrap(),
            ClientMessage::Livefeed(None)
        );
    }

    #[test]
    fn test_decode_call_with_flag() {
        let message = decode_client(r#"["CAL",42,"download"]"#).unwrap();
        assert_eq!(
            message,
            ClientMessage::Call {
                id: 42,
                flag: Some(serde_json::json!("download")),
            }
        );
    }

    #[test]
    fn test_decode_list_options() {
        let message = decode_client(r#"["LCL",{"sort":-1,"limit":10,"offset":0}]"#).unwrap();
        let ClientMessage::List(options) = message else {
            panic!("expected search options");
        };
        assert_eq!(options.sort, Some(-1));
        assert_eq!(options.limit, Some(10));
        assert_eq!(options.offset, Some(0));
    }

    #[test]
    fn test_unknown_tag_is_ignored() {
        assert_eq!(
            decode_client(r#"["ZZZ",1,2,3]"#).unwrap(),
            ClientMessage::Unknown("ZZZ".to_string())
        );
        assert!(decode_server(r#"["ZZZ"]"#).unwrap().is_none());
    }

    #[test]
    fn test_malformed_frames() {
        assert!(decode_client("{}").is_err());
        assert!(decode_client("[]").is_err());
        assert!(decode_client("[1,2]").is_err());
        assert!(decode_client("not json").is_err());
    }

    #[test]
    fn test_encode_server_signals() {
        assert_eq!(encode_server(&ServerMessage::PinAck).unwrap(), r#"["PIN"]"#);
        assert_eq!(encode_server(&ServerMessage::Expired).unwrap(), r#"["XPR"]"#);
        assert_eq!(encode_server(&ServerMessage::TooMany).unwrap(), r#"["MAX"]"#);
        assert_eq!(
            encode_server(&ServerMessage::ListenerCount(12)).unwrap(),
            r#"["LSC",12]"#
        );
    }

    #[test]
    fn test_version_roundtrip() {
        let message = ServerMessage::Version {
            branding: "Radiocast".to_string(),
            version: "0.3.1".to_string(),
        };
        let encoded = encode_server(&message).unwrap();
        assert_eq!(decode_server(&encoded).unwrap(), Some(message));
    }

    #[test]
    fn test_call_push_roundtrip() {
        let call = Call {
            id: Some(1),
            date_time: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
            system: 1,
            talkgroup: 1001,
            audio: Some(vec![1, 2, 3, 4]),
            audio_type: Some("audio/mpeg".to_string()),
            ..Call::default()
        };
        let message = ServerMessage::Call {
            call: Box::new(call),
            flag: None,
        };
        let encoded = encode_server(&message).unwrap();
        assert_eq!(decode_server(&encoded).unwrap(), Some(message));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = PublicConfig {
            systems: vec![PublicSystem {
                id: 1,
                label: "A".to_string(),
                led: None,
                order: None,
                talkgroups: vec![Talkgroup::stub(1001)],
            }],
            groups: vec!["Unknown".to_string()],
            tags: vec!["Untagged".to_string()],
            settings: std::collections::HashMap::new(),
        };
        let message = ServerMessage::Config(Box::new(config));
        let encoded = encode_server(&message).unwrap();
        assert_eq!(decode_server(&encoded).unwrap(), Some(message));
    }

    #[test]
    fn test_list_roundtrip() {
        let results = SearchResults {
            count: 30,
            options: SearchOptions {
                sort: Some(-1),
                limit: Some(10),
                offset: Some(0),
                ..SearchOptions::default()
            },
            results: vec![Call {
                id: Some(30),
                date_time: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 30).unwrap(),
                system: 1,
                talkgroup: 1001,
                ..Call::default()
            }],
        };
        let message = ServerMessage::List(Box::new(results));
        let encoded = encode_server(&message).unwrap();
        assert_eq!(decode_server(&encoded).unwrap(), Some(message));
    }

    proptest! {
        #[test]
        fn test_pin_roundtrip(code in "[ -~]{1,64}") {
            let encoded = encode_client(&ClientMessage::Pin(code.clone())).unwrap();
            prop_assert_eq!(decode_client(&encoded).unwrap(), ClientMessage::Pin(code));
        }

        #[test]
        fn test_call_request_roundtrip(id in 1i64..=i64::MAX) {
            let message = ClientMessage::Call { id, flag: None };
            let encoded = encode_client(&message).unwrap();
            prop_assert_eq!(decode_client(&encoded).unwrap(), message);
        }

        #[test]
        fn test_listener_count_roundtrip(count in 0usize..=1_000_000) {
            let encoded = encode_server(&ServerMessage::ListenerCount(count)).unwrap();
            prop_assert_eq!(
                decode_server(&encoded).unwrap(),
                Some(ServerMessage::ListenerCount(count))
            );
        }
    }
}
