mod controller;
mod decoder;

pub use controller::{
    StreamController, StreamEvent, StreamHandle, StreamMode, StreamOutcome, StreamStart,
};
pub use decoder::Fragments;
