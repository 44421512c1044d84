// Read-only status surface
pub mod handler;
