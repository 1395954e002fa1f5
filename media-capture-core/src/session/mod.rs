pub mod engine;
pub mod runtime;
pub(crate) mod stream;
