//! Push eligibility check.
//!
//! Ineligible requests are skipped silently; none of these cases is an error.

use axum::http::{header, Method, Request};

use crate::push::dispatcher::InternalRequest;
use crate::push::transport::PushHandle;

/// Decide whether a request takes part in learning or pushing.
///
/// Rejects sub-requests generated by the dispatcher, requests on connections
/// without push capability, anything but GET, and conditional GETs.
pub fn should_handle<B>(request: &Request<B>) -> bool {
    if request.extensions().get::<InternalRequest>().is_some() {
        return false;
    }

    if request.extensions().get::<PushHandle>().is_none() {
        tracing::trace!(
            uri = %request.uri(),
            version = ?request.version(),
            "Not handling push: connection cannot push"
        );
        return false;
    }

    if request.method() != Method::GET {
        tracing::trace!(
            uri = %request.uri(),
            method = %request.method(),
            "Not handling push: method is not GET"
        );
        return false;
    }

    if request.headers().contains_key(header::IF_MODIFIED_SINCE) {
        tracing::trace!(
            uri = %request.uri(),
            "Not handling push: If-Modified-Since present"
        );
        return false;
    }

    true
}
