pub mod conversation;
pub mod error;
pub mod health;
pub mod session;
pub mod webhook;
