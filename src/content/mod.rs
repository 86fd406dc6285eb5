//! Temp-file backed message bodies.

pub use content_buffer::ContentBuffer;

mod content_buffer;
