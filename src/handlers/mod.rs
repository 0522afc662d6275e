//! HTTP handlers.

pub mod completion;
pub mod login;

pub use login::{list_providers, login_done, login_get, login_post};
