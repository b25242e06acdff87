pub mod persistence;
pub mod redis;
