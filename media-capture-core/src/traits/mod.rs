pub mod chunk_sink;
pub mod source_provider;
