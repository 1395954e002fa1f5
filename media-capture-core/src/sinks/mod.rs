pub mod channel;
pub mod debug_file;
pub mod router;
