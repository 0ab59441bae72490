//! Streaming utilities for downloaded content.
//!
//! Provides an incremental reader over response bodies with bounded reads,
//! as well as atomic file writing with automatic cleanup on failure.

mod atomic_writer;
mod file_stream;

pub use atomic_writer::AtomicFileWriter;
pub use file_stream::FileStream;
