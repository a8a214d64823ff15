pub mod aliases;
pub mod daemon;
pub mod geometry;
pub mod init;
pub mod sync;
