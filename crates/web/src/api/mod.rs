//! REST API endpoint modules.

pub mod auth;
pub mod profiles;
pub mod status;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_support;
