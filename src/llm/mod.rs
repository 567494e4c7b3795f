pub mod device;
pub mod inference;
pub mod loader;
pub mod models;
pub mod quantize;
pub mod resolver;
pub mod sampling;
