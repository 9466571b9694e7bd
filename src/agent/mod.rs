pub mod engine;
pub mod tools;
