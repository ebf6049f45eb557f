pub mod link;
pub mod start;
