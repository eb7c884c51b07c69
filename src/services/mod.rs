pub mod allocation;
pub mod analytics;
pub mod redirect;
