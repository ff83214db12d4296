// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Base64 helpers and serde adapters for binary fields in JSON documents.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Result, TresorError};

pub fn encode(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(data)
}

pub fn decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| TresorError::InvalidFormat(format!("bad base64: {e}")))
}

/// `#[serde(with = "tresor_core::b64::bytes")]` for `Vec<u8>`.
pub mod bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        super::decode(&text).map_err(serde::de::Error::custom)
    }
}

/// Same as [`bytes`] for `Option<Vec<u8>>`; pair with `#[serde(default)]`.
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => s.serialize_some(&super::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|text| super::decode(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Key material: decoded straight into a buffer that is wiped on drop.
pub mod secret {
    use serde::{Deserialize, Deserializer, Serializer};
    use zeroize::Zeroizing;

    pub fn serialize<S: Serializer>(data: &Zeroizing<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        let encoded = Zeroizing::new(super::encode(data.as_slice()));
        s.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Zeroizing<Vec<u8>>, D::Error> {
        let text = Zeroizing::new(String::deserialize(d)?);
        super::decode(&text)
            .map(Zeroizing::new)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use zeroize::Zeroizing;

    #[derive(Serialize, Deserialize)]
    struct Record {
        #[serde(with = "super::bytes")]
        iv: Vec<u8>,
        #[serde(with = "super::option", default, skip_serializing_if = "Option::is_none")]
        tag: Option<Vec<u8>>,
        #[serde(with = "super::secret")]
        key: Zeroizing<Vec<u8>>,
    }

    #[test]
    fn fields_are_base64_strings() {
        let rec = Record {
            iv: vec![0, 1, 2],
            tag: None,
            key: Zeroizing::new(vec![0xff; 4]),
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["iv"], "AAEC");
        assert_eq!(json["key"], "/////w==");
        assert!(json.get("tag").is_none());

        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back.iv, vec![0, 1, 2]);
        assert!(back.tag.is_none());
    }

    #[test]
    fn invalid_base64_rejected() {
        assert!(super::decode("***").is_err());
        let err = serde_json::from_str::<Record>(r#"{"iv":"!!","key":"AA=="}"#);
        assert!(err.is_err());
    }
}
