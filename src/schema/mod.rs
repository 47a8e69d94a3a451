pub mod passage;
pub mod query;
