pub mod sink;

pub use sink::{FileSink, OutputFormat};
