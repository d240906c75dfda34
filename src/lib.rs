pub mod config;
pub mod http;
pub mod redirect;
pub mod store;
pub mod version;
