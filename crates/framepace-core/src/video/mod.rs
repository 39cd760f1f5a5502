pub mod backend;
pub mod decoder;
pub mod frame;
pub mod gif;
