mod format;
mod uid;

pub use format::*;
pub use uid::*;
