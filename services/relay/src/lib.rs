// Application layer modules
pub mod application;

// Producer-side client
pub mod client;

// Domain layer modules
pub mod domain;

// Infrastructure layer modules
pub mod infrastructure;
