//! 每次上传一个 zstd 压缩的 parquet 文件

pub mod filter;
pub mod reader;
pub mod schema;
pub mod writer;

pub use reader::StoreReader;
pub use writer::{discard, StoreWriter};
