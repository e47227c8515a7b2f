//! Helpers for mapping engine errors into RPC error objects.

use jsonrpsee::types::error::{ErrorObject, ErrorObjectOwned, INTERNAL_ERROR_CODE, INVALID_PARAMS_CODE};

/// Constructs an error object with the given code and message.
pub(crate) fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObjectOwned {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

/// An internal server error with the given message.
pub(crate) fn internal_rpc_err(msg: impl Into<String>) -> ErrorObjectOwned {
    rpc_err(INTERNAL_ERROR_CODE, msg)
}

/// An invalid-params error with the given message.
pub(crate) fn invalid_params_rpc_err(msg: impl Into<String>) -> ErrorObjectOwned {
    rpc_err(INVALID_PARAMS_CODE, msg)
}
