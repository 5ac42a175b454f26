//! Golden wire vectors.
//!
//! Token payloads and channel frames are read by other implementations, so
//! these fixed inputs pin down what must decode, what must be rejected, and
//! which control token (and therefore which helper cache id) a data token
//! resolves to.

use cinder::{ControlEvent, Frame};
use cinder_core::{Outpoint, Txid};
use cinder_relay::HelperCache;
use cinder_tokens::TokenPayload;

const HASH: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
const CT_TXID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const OWN_TXID: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

/// A token payload vector.
#[derive(Debug, Clone)]
pub struct PayloadVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Compact JSON as it appears in the ledger output.
    pub json: &'static str,
    /// Whether the payload must decode.
    pub valid: bool,
    /// For data tokens: the expected helper cache id of the referenced CT,
    /// resolved as if the DT were carried by [`own_txid`].
    pub cache_id: Option<&'static str>,
}

/// A channel frame vector.
#[derive(Debug, Clone)]
pub struct FrameVector {
    pub name: &'static str,
    pub json: &'static str,
    /// Control tag (or `"message"`) the frame decodes to. `None` means the
    /// frame must be rejected.
    pub expected: Option<&'static str>,
}

/// Txid of the transaction that carries the vector data tokens.
pub fn own_txid() -> Txid {
    Txid::from_bytes([0xbb; 32])
}

/// Get all payload vectors.
pub fn payload_vectors() -> Vec<PayloadVector> {
    vec![
        PayloadVector {
            name: "control token with hint url",
            json: concat!(
                r#"{"t":"CT","h":"9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08","#,
                r#""k":"00112233","u":"mem://abc","m":{"p":"rw","relay":true},"ts":1736870400000}"#
            ),
            valid: true,
            cache_id: None,
        },
        PayloadVector {
            name: "control token without hint or metadata",
            json: concat!(
                r#"{"t":"CT","h":"9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08","#,
                r#""k":"ff","ts":0}"#
            ),
            valid: true,
            cache_id: None,
        },
        PayloadVector {
            name: "control token with empty wrapped key",
            json: concat!(
                r#"{"t":"CT","h":"9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08","#,
                r#""k":"","ts":0}"#
            ),
            valid: false,
            cache_id: None,
        },
        PayloadVector {
            name: "control token with short hash",
            json: r#"{"t":"CT","h":"9f86d081","k":"ff","ts":0}"#,
            valid: false,
            cache_id: None,
        },
        PayloadVector {
            name: "data token by outpoint",
            json: concat!(
                r#"{"t":"DT","mode":"outpoint","#,
                r#""txid":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa","vout":1,"#,
                r#""to":"0101010101010101010101010101010101010101010101010101010101010101","#,
                r#""p":"r","k":"abcd","m":{},"ts":1736870400000}"#
            ),
            valid: true,
            cache_id: Some("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa:1"),
        },
        PayloadVector {
            name: "data token in the control token's transaction",
            json: concat!(
                r#"{"t":"DT","mode":"same-tx","vout":0,"#,
                r#""to":"0101010101010101010101010101010101010101010101010101010101010101","#,
                r#""p":"rw","k":"abcd","ts":1}"#
            ),
            valid: true,
            cache_id: Some("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb:0"),
        },
        PayloadVector {
            name: "data token by outpoint without txid",
            json: concat!(
                r#"{"t":"DT","mode":"outpoint","vout":0,"#,
                r#""to":"0101010101010101010101010101010101010101010101010101010101010101","#,
                r#""p":"rw","k":"abcd","ts":1}"#
            ),
            valid: false,
            cache_id: None,
        },
        PayloadVector {
            name: "data token with negative vout",
            json: concat!(
                r#"{"t":"DT","mode":"outpoint","#,
                r#""txid":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa","vout":-1,"#,
                r#""to":"0101010101010101010101010101010101010101010101010101010101010101","#,
                r#""p":"rw","k":"abcd","ts":1}"#
            ),
            valid: false,
            cache_id: None,
        },
        PayloadVector {
            name: "unknown token type",
            json: r#"{"t":"XT","ts":1}"#,
            valid: false,
            cache_id: None,
        },
    ]
}

/// Get all frame vectors.
pub fn frame_vectors() -> Vec<FrameVector> {
    vec![
        FrameVector {
            name: "leave",
            json: concat!(
                r#"{"kind":"control","thread_id":"t1","#,
                r#""from":"0101010101010101010101010101010101010101010101010101010101010101","#,
                r#""event":{"type":"leave","at":5}}"#
            ),
            expected: Some("leave"),
        },
        FrameVector {
            name: "burn with txid",
            json: concat!(
                r#"{"kind":"control","thread_id":"t1","#,
                r#""from":"0101010101010101010101010101010101010101010101010101010101010101","#,
                r#""event":{"type":"burn","at":5,"#,
                r#""burn_txid":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}}"#
            ),
            expected: Some("burn"),
        },
        FrameVector {
            name: "profile update without label",
            json: concat!(
                r#"{"kind":"control","thread_id":"t1","#,
                r#""from":"0101010101010101010101010101010101010101010101010101010101010101","#,
                r#""event":{"type":"profile-update","at":5}}"#
            ),
            expected: Some("profile-update"),
        },
        FrameVector {
            name: "unknown control tag",
            json: concat!(
                r#"{"kind":"control","thread_id":"t1","#,
                r#""from":"0101010101010101010101010101010101010101010101010101010101010101","#,
                r#""event":{"type":"explode","at":5}}"#
            ),
            expected: None,
        },
        FrameVector {
            name: "control event without tag",
            json: concat!(
                r#"{"kind":"control","thread_id":"t1","#,
                r#""from":"0101010101010101010101010101010101010101010101010101010101010101","#,
                r#""event":{"at":5}}"#
            ),
            expected: None,
        },
        FrameVector {
            name: "sealed message",
            json: concat!(
                r#"{"kind":"message","thread_id":"t1","id":"m1","#,
                r#""author":"0202020202020202020202020202020202020202020202020202020202020202","#,
                r#""sealed":"a1b2c3","timestamp":7}"#
            ),
            expected: Some("message"),
        },
        FrameVector {
            name: "message with non-hex body",
            json: concat!(
                r#"{"kind":"message","thread_id":"t1","id":"m1","#,
                r#""author":"0202020202020202020202020202020202020202020202020202020202020202","#,
                r#""sealed":"not hex","timestamp":7}"#
            ),
            expected: None,
        },
    ]
}

/// Check one payload vector. Returns a description of the mismatch.
pub fn check_payload_vector(vector: &PayloadVector) -> Result<(), String> {
    let decoded = TokenPayload::from_json(vector.json.as_bytes());
    match (decoded, vector.valid) {
        (Err(_), false) => Ok(()),
        (Ok(_), false) => Err(format!("{}: decoded but should be rejected", vector.name)),
        (Err(e), true) => Err(format!("{}: rejected: {}", vector.name, e)),
        (Ok(TokenPayload::Control(ct)), true) => {
            if ct.hash.to_hex() != HASH {
                return Err(format!("{}: hash changed to {}", vector.name, ct.hash));
            }
            match vector.cache_id {
                None => Ok(()),
                Some(_) => Err(format!("{}: control token has no referenced CT", vector.name)),
            }
        }
        (Ok(TokenPayload::Data(dt)), true) => {
            let reference: Outpoint = dt
                .control_token_ref(own_txid())
                .map_err(|e| format!("{}: {}", vector.name, e))?;
            let cache_id = HelperCache::cache_id(&reference);
            match vector.cache_id {
                Some(expected) if expected == cache_id => Ok(()),
                expected => Err(format!(
                    "{}: cache id {} != {:?}",
                    vector.name, cache_id, expected
                )),
            }
        }
    }
}

/// Check one frame vector.
pub fn check_frame_vector(vector: &FrameVector) -> Result<(), String> {
    let decoded = Frame::decode(vector.json.as_bytes()).map(|frame| match frame {
        Frame::Control(env) => env.event.tag(),
        Frame::Message(_) => "message",
    });
    match (decoded, vector.expected) {
        (Ok(tag), Some(expected)) if tag == expected => Ok(()),
        (Err(_), None) => Ok(()),
        (Ok(tag), expected) => Err(format!("{}: decoded as {} not {:?}", vector.name, tag, expected)),
        (Err(e), Some(_)) => Err(format!("{}: rejected: {}", vector.name, e)),
    }
}

/// Verify every vector, collecting all mismatches.
pub fn verify_all_vectors() -> Result<(), Vec<String>> {
    let failures: Vec<String> = payload_vectors()
        .iter()
        .map(check_payload_vector)
        .chain(frame_vectors().iter().map(check_frame_vector))
        .filter_map(Result::err)
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}

/// Re-encode a control event and confirm the wire tag survives.
pub fn roundtrip_tag(event: &ControlEvent) -> Option<&'static str> {
    let json = serde_json::to_value(event).ok()?;
    ControlEvent::parse(json).ok().map(|e| e.tag())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_pass() {
        if let Err(failures) = verify_all_vectors() {
            panic!("vector mismatches:\n{}", failures.join("\n"));
        }
    }

    #[test]
    fn test_vector_constants_agree() {
        assert_eq!(Txid::from_hex(OWN_TXID).unwrap(), own_txid());
        assert_eq!(Txid::from_hex(CT_TXID).unwrap(), Txid::from_bytes([0xaa; 32]));
        for vector in payload_vectors() {
            if let Some(id) = vector.cache_id {
                assert!(id.starts_with(CT_TXID) || id.starts_with(OWN_TXID), "{}", vector.name);
            }
        }
    }

    #[test]
    fn test_roundtrip_tag() {
        assert_eq!(roundtrip_tag(&ControlEvent::Leave { at: 1 }), Some("leave"));
    }
}
