pub mod artifacts;
pub mod config;
pub mod encoder;
pub mod error;
pub mod history;
pub mod model;
pub mod normalizer;
pub mod pipeline;
pub mod schema;
pub mod util;
