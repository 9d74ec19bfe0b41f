//! 📂 Previously, on "Things That Could Go Wrong With A File"...
//!
//! The disk was quiet. Too quiet. A fetch thread had been told to read a file.
//! Just a file, they said. It was gzipped. Nobody mentioned that.
//!
//! This module handles file-based I/O. On the reader side every split is one
//! newline-delimited file (transparently gunzipped when the name ends in `.gz`),
//! read in bounded fetches on a fetch thread. On the sink side the consumer writes
//! payloads through a BufWriter so we're not doing a syscall per record like some
//! kind of 1995 CGI script.
//!
//! 🚰 FileReader → fetch thread → HandoffQueue → SinkWorker → FileSink → BufWriter
//! 💀 Disk full → your problem now
//! 🦆 (mandatory, no notes)

mod file_reader;
mod file_sink;

pub use file_reader::{FileReader, FileReaderConfig};
pub use file_sink::{FileSink, FileSinkConfig};
