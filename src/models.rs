pub mod conversation;
pub mod health;
pub mod session;
pub mod webhook;
