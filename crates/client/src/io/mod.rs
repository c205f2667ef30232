//! Block data streams built on pooled worker clients

mod file_writer;
mod in_stream;
mod out_stream;

pub use file_writer::{FileWriter, WrittenFile};
pub use in_stream::BlockInStream;
pub use out_stream::{BlockOutStream, OutStreamOptions};
