pub mod errors;
pub mod image;
pub mod pipeline;

pub use errors::*;
pub use image::*;
pub use pipeline::*;
