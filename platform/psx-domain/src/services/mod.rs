pub mod normalizer;
pub mod window;
