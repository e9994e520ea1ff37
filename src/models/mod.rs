pub mod blob;
pub mod job;
pub mod upload;
