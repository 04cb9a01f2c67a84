mod http;
mod types;

#[cfg(test)]
pub mod scripted;

pub use http::HttpBackend;
pub use types::{ByteStream, ChatBackend};
