//! Apply-policy checkers for Terraflow.

pub mod http;
pub mod rules;

pub use http::HttpPolicyChecker;
pub use rules::StaticPolicyChecker;
