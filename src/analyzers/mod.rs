pub mod channels;
pub mod duplicate;
