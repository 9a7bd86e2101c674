pub mod core;
pub mod dashboard;
pub mod editor;
pub mod export;
pub mod ideas;
pub mod outcomes;
