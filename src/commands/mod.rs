pub mod classify;
pub mod scan;
pub mod score;
