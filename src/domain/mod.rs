//! Domain model - upload sessions, segments and threads

pub mod media;
pub mod segment;
pub mod thread;

pub use media::*;
pub use segment::*;
pub use thread::*;
