pub mod decode;
pub mod dsp;
pub mod encode;
pub mod metadata;
