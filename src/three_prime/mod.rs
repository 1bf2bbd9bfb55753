pub mod choose;
pub mod extract;
pub mod filter;
pub mod merge;
