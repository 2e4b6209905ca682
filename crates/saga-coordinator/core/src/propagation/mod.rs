//! Propagation of the transaction token across service boundaries.
//!
//! The token travels as a single header whose value is produced by the
//! configured [`MessageCodec`]. A missing header means "no active
//! transaction".

use std::collections::HashMap;

use crate::codec::MessageCodec;
use crate::context::CallContext;
use crate::error::Result;
use crate::model::PropagationToken;

/// Header carrying the encoded [`PropagationToken`].
pub const TRANSACTION_CONTEXT_HEADER: &str = "x-saga-transaction-context";

/// Attach the context's token to outbound headers.
///
/// Returns `false` when the context carries no token and nothing was written.
pub fn inject(
    ctx: &CallContext,
    codec: &dyn MessageCodec,
    headers: &mut HashMap<String, String>,
) -> Result<bool> {
    match ctx.token() {
        Some(token) => {
            headers.insert(
                TRANSACTION_CONTEXT_HEADER.to_string(),
                codec.encode_token(&token)?,
            );
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Read the inbound token, if any.
pub fn extract(
    headers: &HashMap<String, String>,
    codec: &dyn MessageCodec,
) -> Result<Option<PropagationToken>> {
    headers
        .get(TRANSACTION_CONTEXT_HEADER)
        .map(|value| codec.decode_token(value))
        .transpose()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::error::CoordinatorError;
    use crate::model::{TransId, TransactionRole};

    #[test]
    fn test_inject_then_extract() {
        let codec = JsonCodec::new();
        let token = PropagationToken::new(TransId::from("t-7"), TransactionRole::Start);
        let ctx = CallContext::with_token(token.clone());

        let mut headers = HashMap::new();
        assert!(inject(&ctx, &codec, &mut headers).unwrap());
        assert!(headers.contains_key(TRANSACTION_CONTEXT_HEADER));
        assert_eq!(extract(&headers, &codec).unwrap(), Some(token));
    }

    #[test]
    fn test_missing_header_is_none() {
        let codec = JsonCodec::new();
        let mut headers = HashMap::new();
        assert!(!inject(&CallContext::new(), &codec, &mut headers).unwrap());
        assert!(headers.is_empty());
        assert_eq!(extract(&headers, &codec).unwrap(), None);
    }

    #[test]
    fn test_malformed_header_is_codec_error() {
        let codec = JsonCodec::new();
        let headers = HashMap::from([(
            TRANSACTION_CONTEXT_HEADER.to_string(),
            "{not a token".to_string(),
        )]);
        assert!(matches!(
            extract(&headers, &codec),
            Err(CoordinatorError::Codec(_))
        ));
    }
}
