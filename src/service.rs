pub mod conversation;
pub mod guardrail;
pub mod signature;
pub mod tavus;
pub mod webhook;
