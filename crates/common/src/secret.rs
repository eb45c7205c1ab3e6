//! Secret values that must never appear in logs.
//!
//! TURN credentials are the main use: they are read from the environment,
//! held in memory as [`SecretString`], and only exposed at the single point
//! where they are serialized into a client-bound transport config.
//!
//! ```rust
//! use common::secret::SecretString;
//!
//! #[derive(Debug)]
//! struct TurnServer {
//!     url: String,
//!     credential: SecretString,
//! }
//!
//! let server = TurnServer {
//!     url: "turn:turn.example.org:3478".to_string(),
//!     credential: SecretString::from("hunter2"),
//! };
//! assert!(!format!("{server:?}").contains("hunter2"));
//! ```

pub use secrecy::{ExposeSecret, SecretString};
use serde::Serializer;

/// Serializes an optional secret as its plain value.
///
/// Use with `#[serde(serialize_with = "common::secret::serialize_exposed")]`
/// on fields that are intentionally sent to clients.
///
/// # Errors
///
/// Returns the serializer's error unchanged.
pub fn serialize_exposed<S>(secret: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match secret {
        Some(value) => serializer.serialize_some(value.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    struct Credential {
        username: String,
        #[serde(serialize_with = "serialize_exposed")]
        credential: Option<SecretString>,
    }

    #[test]
    fn test_debug_is_redacted() {
        let cred = Credential {
            username: "relay".to_string(),
            credential: Some(SecretString::from("super-secret")),
        };

        let debug_str = format!("{cred:?}");
        assert!(debug_str.contains("relay"));
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super-secret"));
    }

    #[test]
    fn test_serialize_exposes_value() {
        let cred = Credential {
            username: "relay".to_string(),
            credential: Some(SecretString::from("super-secret")),
        };

        let json = serde_json::to_value(&cred).unwrap();
        assert_eq!(json["credential"], "super-secret");
    }

    #[test]
    fn test_serialize_none() {
        let cred = Credential {
            username: "relay".to_string(),
            credential: None,
        };

        let json = serde_json::to_value(&cred).unwrap();
        assert!(json["credential"].is_null());
    }
}
