//! Client module - network feed, renderer output and operator display

pub mod config;
pub mod display;
pub mod feed;
pub mod http;
pub mod logging;
pub mod renderer;

pub use config::Config;
pub use feed::FeedClient;
pub use renderer::JsonLinesRenderer;
