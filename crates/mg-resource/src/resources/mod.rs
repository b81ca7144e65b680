//! Resource types every cache understands.

mod raw;
mod text;

pub use raw::RawResource;
pub use text::TextResource;
