//! Medical assistant NIfTI viewer: slice viewing, annotation, segmentation
//! overlays, and the chat and speech clients around them.

pub mod annotation;
pub mod app;
pub mod chat;
pub mod config;
pub mod error;
pub mod intensity;
pub mod interaction;
pub mod masks;
pub mod playback;
pub mod render;
pub mod segmentation;
pub mod slice;
pub mod source;
pub mod tts;
pub mod view;
pub mod volume;
pub mod worker;

pub use error::{ViewerError, ViewerResult};
