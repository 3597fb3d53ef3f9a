pub mod downloads;
pub mod files;
