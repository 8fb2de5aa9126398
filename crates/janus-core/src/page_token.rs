//! Canonical page-token codec for keyset pagination.
//!
//! A token is `base64url(version ‖ json(cursor))` without padding. The
//! leading version byte lets the cursor shape evolve without breaking
//! tokens already handed to clients; decoding rejects versions it does not
//! know instead of guessing.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::status::Status;

/// Current token format version.
pub const PAGE_TOKEN_VERSION: u8 = 1;

/// Errors decoding or encoding a page token.
#[derive(Debug, thiserror::Error)]
pub enum PageTokenError {
    /// The token is empty.
    #[error("page token is empty")]
    Empty,

    /// The token is not valid base64url.
    #[error("page token is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// The token was produced by an unknown format version.
    #[error("unsupported page token version {0}")]
    UnsupportedVersion(u8),

    /// The cursor payload does not match the expected shape.
    #[error("malformed page token cursor: {0}")]
    Cursor(#[from] serde_json::Error),
}

impl From<PageTokenError> for Status {
    fn from(err: PageTokenError) -> Self {
        Self::invalid_argument(err.to_string())
    }
}

/// Encodes a cursor into an opaque token.
pub fn encode<T: Serialize>(cursor: &T) -> Result<String, PageTokenError> {
    let mut raw = vec![PAGE_TOKEN_VERSION];
    serde_json::to_writer(&mut raw, cursor)?;
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

/// Decodes a token produced by [`encode`].
pub fn decode<T: DeserializeOwned>(token: &str) -> Result<T, PageTokenError> {
    if token.is_empty() {
        return Err(PageTokenError::Empty);
    }
    let raw = URL_SAFE_NO_PAD.decode(token)?;
    match raw.split_first() {
        Some((&PAGE_TOKEN_VERSION, cursor)) => Ok(serde_json::from_slice(cursor)?),
        Some((&version, _)) => Err(PageTokenError::UnsupportedVersion(version)),
        None => Err(PageTokenError::Empty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cursor {
        last_id: u64,
        created_at: String,
    }

    #[test]
    fn test_token_decodes_to_same_cursor() {
        let cursor = Cursor {
            last_id: 981,
            created_at: "2024-05-01T10:00:00Z".into(),
        };
        let token = encode(&cursor).unwrap();
        assert!(!token.contains('='));
        assert!(!token.contains('+'));
        assert_eq!(decode::<Cursor>(&token).unwrap(), cursor);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let token = URL_SAFE_NO_PAD.encode([9u8, b'{', b'}']);
        assert!(matches!(
            decode::<serde_json::Value>(&token),
            Err(PageTokenError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_garbage_rejected_as_invalid_argument() {
        let err = decode::<Cursor>("!!!").unwrap_err();
        let status: Status = err.into();
        assert_eq!(status.code(), crate::Code::INVALID_ARGUMENT);
        assert!(matches!(decode::<Cursor>(""), Err(PageTokenError::Empty)));
    }
}
