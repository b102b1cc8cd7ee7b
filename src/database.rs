pub mod memory;
pub mod postgres_repository;
pub mod session;
