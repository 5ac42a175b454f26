//! Compact JSON payloads embedded in capability outputs.
//!
//! ```text
//! CT = {"t":"CT","h":<hash>,"k":<wrapped key>,"u":<hint url>?,"m":<metadata>,"ts":<ms>}
//! DT = {"t":"DT","mode":"outpoint"|"same-tx","txid":<ct txid>?,"vout":<ct vout>,
//!       "to":<recipient>,"p":"r"|"rw","k":<wrapped key>,"m":<metadata>,"ts":<ms>}
//! ```
//!
//! Hashes, keys, and txids are lowercase hex.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cinder_core::{
    require_non_empty, validate_vout, ContentHash, DataTokenPermissions, Outpoint, PublicKey,
    Txid, ValidationError,
};

use crate::error::{Result, TokenError};

/// A decoded token payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum TokenPayload {
    #[serde(rename = "CT")]
    Control(ControlTokenPayload),
    #[serde(rename = "DT")]
    Data(DataTokenPayload),
}

impl TokenPayload {
    /// Encode as compact JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| TokenError::Serialization(e.to_string()))
    }

    /// Decode and validate.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let payload: TokenPayload = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::MalformedPayload(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        match self {
            TokenPayload::Control(ct) => ct.validate(),
            TokenPayload::Data(dt) => dt.validate(),
        }
    }

    /// Expect a control token payload.
    pub fn into_control(self) -> Result<ControlTokenPayload> {
        match self {
            TokenPayload::Control(ct) => Ok(ct),
            TokenPayload::Data(_) => Err(ValidationError::MalformedPayload(
                "expected a control token, found a data token".into(),
            )
            .into()),
        }
    }

    /// Expect a data token payload.
    pub fn into_data(self) -> Result<DataTokenPayload> {
        match self {
            TokenPayload::Data(dt) => Ok(dt),
            TokenPayload::Control(_) => Err(ValidationError::MalformedPayload(
                "expected a data token, found a control token".into(),
            )
            .into()),
        }
    }
}

/// Control token payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlTokenPayload {
    #[serde(rename = "h")]
    pub hash: ContentHash,
    #[serde(rename = "k", with = "hex")]
    pub wrapped_key: Vec<u8>,
    #[serde(rename = "u", default, skip_serializing_if = "Option::is_none")]
    pub hint_url: Option<String>,
    #[serde(rename = "m", default)]
    pub metadata: Value,
    pub ts: i64,
}

impl ControlTokenPayload {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty("wrapped key", &self.wrapped_key)
    }
}

/// How a data token locates its control token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataTokenMode {
    /// `txid` and `vout` name the CT outpoint.
    #[serde(rename = "outpoint")]
    Outpoint,
    /// The CT is output `vout` of the DT's own transaction.
    #[serde(rename = "same-tx")]
    SameTx,
}

/// Data token payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTokenPayload {
    pub mode: DataTokenMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<Txid>,
    pub vout: i64,
    #[serde(rename = "to")]
    pub recipient: PublicKey,
    #[serde(rename = "p")]
    pub permissions: DataTokenPermissions,
    #[serde(rename = "k", with = "hex")]
    pub wrapped_key: Vec<u8>,
    #[serde(rename = "m", default)]
    pub metadata: Value,
    pub ts: i64,
}

impl DataTokenPayload {
    /// A DT pointing at an explicit CT outpoint.
    pub fn for_outpoint(
        ct: Outpoint,
        recipient: PublicKey,
        permissions: DataTokenPermissions,
        wrapped_key: Vec<u8>,
        ts: i64,
    ) -> Self {
        Self {
            mode: DataTokenMode::Outpoint,
            txid: Some(ct.txid),
            vout: i64::from(ct.vout),
            recipient,
            permissions,
            wrapped_key,
            metadata: Value::Object(Default::default()),
            ts,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate_vout(self.vout)?;
        require_non_empty("wrapped key", &self.wrapped_key)?;
        if self.mode == DataTokenMode::Outpoint && self.txid.is_none() {
            return Err(ValidationError::MissingControlTokenRef);
        }
        Ok(())
    }

    /// Resolve the referenced CT outpoint.
    ///
    /// `own_txid` is the transaction that carries this DT, used for
    /// `same-tx` mode. A missing txid in `outpoint` mode is never inferred.
    pub fn control_token_ref(&self, own_txid: Txid) -> std::result::Result<Outpoint, ValidationError> {
        let vout = validate_vout(self.vout)?;
        let txid = match self.mode {
            DataTokenMode::Outpoint => self.txid.ok_or(ValidationError::MissingControlTokenRef)?,
            DataTokenMode::SameTx => own_txid,
        };
        Ok(Outpoint::new(txid, vout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ct_payload() -> ControlTokenPayload {
        ControlTokenPayload {
            hash: ContentHash::compute(b"thread"),
            wrapped_key: vec![0xaa; 92],
            hint_url: Some("mem://abc".into()),
            metadata: json!({"perm": "rw"}),
            ts: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_ct_compact_field_names() {
        let bytes = TokenPayload::Control(ct_payload()).to_json().unwrap();
        let v: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["t"], "CT");
        assert_eq!(v["h"], ContentHash::compute(b"thread").to_hex());
        assert_eq!(v["k"], "aa".repeat(92));
        assert_eq!(v["u"], "mem://abc");
        assert_eq!(v["ts"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_ct_without_hint_omits_u() {
        let mut ct = ct_payload();
        ct.hint_url = None;
        let bytes = TokenPayload::Control(ct).to_json().unwrap();
        let v: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(v.get("u").is_none());
    }

    #[test]
    fn test_dt_decode() {
        let raw = json!({
            "t": "DT",
            "mode": "outpoint",
            "txid": "11".repeat(32),
            "vout": 0,
            "to": "22".repeat(32),
            "p": "r",
            "k": "33".repeat(92),
            "m": {},
            "ts": 5
        });
        let payload = TokenPayload::from_json(raw.to_string().as_bytes()).unwrap();
        let dt = payload.into_data().unwrap();
        assert_eq!(dt.permissions, DataTokenPermissions::Read);
        let ct = dt.control_token_ref(Txid::from_bytes([9; 32])).unwrap();
        assert_eq!(ct, Outpoint::new(Txid::from_bytes([0x11; 32]), 0));
    }

    #[test]
    fn test_dt_missing_txid_is_fatal() {
        let raw = json!({
            "t": "DT",
            "mode": "outpoint",
            "vout": 0,
            "to": "22".repeat(32),
            "p": "rw",
            "k": "33".repeat(92),
            "ts": 5
        });
        let err = TokenPayload::from_json(raw.to_string().as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            TokenError::Validation(ValidationError::MissingControlTokenRef)
        ));
    }

    #[test]
    fn test_dt_same_tx_uses_own_txid() {
        let mut dt = DataTokenPayload::for_outpoint(
            Outpoint::new(Txid::from_bytes([1; 32]), 2),
            PublicKey::from_bytes([3; 32]),
            DataTokenPermissions::ReadWrite,
            vec![1],
            0,
        );
        dt.mode = DataTokenMode::SameTx;
        dt.txid = None;
        let own = Txid::from_bytes([7; 32]);
        assert_eq!(dt.control_token_ref(own).unwrap(), Outpoint::new(own, 2));
    }

    #[test]
    fn test_negative_vout_rejected() {
        let raw = json!({
            "t": "DT",
            "mode": "outpoint",
            "txid": "11".repeat(32),
            "vout": -1,
            "to": "22".repeat(32),
            "p": "rw",
            "k": "33".repeat(92),
            "ts": 5
        });
        assert!(matches!(
            TokenPayload::from_json(raw.to_string().as_bytes()),
            Err(TokenError::Validation(ValidationError::InvalidVout(-1)))
        ));
    }

    #[test]
    fn test_bad_hash_and_unknown_tag_rejected() {
        let raw = json!({"t": "CT", "h": "abc", "k": "00", "ts": 1});
        assert!(TokenPayload::from_json(raw.to_string().as_bytes()).is_err());

        let raw = json!({"t": "XX", "ts": 1});
        assert!(TokenPayload::from_json(raw.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_empty_wrapped_key_rejected() {
        let mut ct = ct_payload();
        ct.wrapped_key.clear();
        assert!(ct.validate().is_err());
    }
}
