//! Integration tests for ctxsync-remote
//!
//! Uses wiremock to stand in for the context service.

mod common;

mod test_upload;
