pub mod auth;
pub mod billing;
pub mod config;
pub mod documents;
pub mod error;
pub mod extractor;
pub mod mailbox;
pub mod routes;
pub mod upload_links;
