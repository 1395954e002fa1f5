pub mod chunk;
pub mod error;
pub mod event;
pub mod media;
pub mod options;
pub mod state;
