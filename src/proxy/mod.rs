pub mod handler;
pub mod streaming;
pub mod upstream;
