#[path = "../support/mod.rs"]
mod support;

mod health_endpoint;
mod processing;
