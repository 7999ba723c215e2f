pub mod adapter;

pub use adapter::{BlobStream, StreamAdapter};
