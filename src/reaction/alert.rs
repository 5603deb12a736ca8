//! TLS alert records sent in place of a ServerHello.

use serde::{Deserialize, Serialize};

const CONTENT_TYPE_ALERT: u8 = 0x15;
const LEVEL_FATAL: u8 = 2;
const TLS12_VERSION: [u8; 2] = [0x03, 0x03];

/// Alert descriptions a rejected client may receive (RFC 5246 §7.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCode {
    CloseNotify,
    UnexpectedMessage,
    HandshakeFailure,
    DecodeError,
    ProtocolVersion,
    InternalError,
    UnrecognizedName,
}

impl AlertCode {
    pub fn code(self) -> u8 {
        match self {
            AlertCode::CloseNotify => 0,
            AlertCode::UnexpectedMessage => 10,
            AlertCode::HandshakeFailure => 40,
            AlertCode::DecodeError => 50,
            AlertCode::ProtocolVersion => 70,
            AlertCode::InternalError => 80,
            AlertCode::UnrecognizedName => 112,
        }
    }

    /// The complete 7-byte fatal alert record carrying this code.
    pub fn record(self) -> [u8; 7] {
        [
            CONTENT_TYPE_ALERT,
            TLS12_VERSION[0],
            TLS12_VERSION[1],
            0x00,
            0x02,
            LEVEL_FATAL,
            self.code(),
        ]
    }
}

impl std::fmt::Display for AlertCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AlertCode::CloseNotify => "close_notify",
            AlertCode::UnexpectedMessage => "unexpected_message",
            AlertCode::HandshakeFailure => "handshake_failure",
            AlertCode::DecodeError => "decode_error",
            AlertCode::ProtocolVersion => "protocol_version",
            AlertCode::InternalError => "internal_error",
            AlertCode::UnrecognizedName => "unrecognized_name",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_failure_record() {
        assert_eq!(
            AlertCode::HandshakeFailure.record(),
            [0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 0x28]
        );
    }

    #[test]
    fn codes_match_registry() {
        assert_eq!(AlertCode::CloseNotify.code(), 0);
        assert_eq!(AlertCode::DecodeError.code(), 50);
        assert_eq!(AlertCode::UnrecognizedName.code(), 112);
    }

    #[test]
    fn serde_names() {
        let code: AlertCode = serde_json::from_str("\"protocol_version\"").unwrap();
        assert_eq!(code, AlertCode::ProtocolVersion);
        assert_eq!(code.to_string(), "protocol_version");
    }
}
