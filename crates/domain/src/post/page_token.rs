//! Opaque page tokens for post listings.
//!
//! A token is the URL-safe base64 encoding of the decimal ID of the last
//! post on the previous page.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use common::PostId;

use crate::DomainError;

/// Encodes the ID of the last post on a page.
pub fn encode(id: PostId) -> String {
    URL_SAFE.encode(id.to_string())
}

/// Decodes a token produced by [`encode`].
pub fn decode(token: &str) -> Result<PostId, DomainError> {
    let invalid = || DomainError::InvalidPageToken(token.to_string());
    let bytes = URL_SAFE.decode(token).map_err(|_| invalid())?;
    let text = std::str::from_utf8(&bytes).map_err(|_| invalid())?;
    text.parse().map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_url_safe_base64_of_the_id() {
        assert_eq!(encode(PostId::new(42)), "NDI=");
        assert_eq!(decode("NDI=").unwrap(), PostId::new(42));
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(matches!(
            decode("%%%"),
            Err(DomainError::InvalidPageToken(_))
        ));
        // valid base64, not a number
        assert!(matches!(
            decode(&URL_SAFE.encode("abc")),
            Err(DomainError::InvalidPageToken(_))
        ));
    }
}
