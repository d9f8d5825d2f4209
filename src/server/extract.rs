//! Request extractors that reject with the service's error envelope.

use axum::extract::FromRequest;

use crate::server::error::CoreError;

/// JSON request body. Malformed or mistyped bodies become a 400
/// `validation_error` instead of axum's plain-text 415/422.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(CoreError))]
pub struct JsonBody<T>(pub T);
