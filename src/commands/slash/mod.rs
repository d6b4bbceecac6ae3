pub mod admin;
pub mod stats;
pub mod utility;
