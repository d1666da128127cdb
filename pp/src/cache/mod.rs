//! Instance caches

mod object_cache;
mod parser_cache;

pub use object_cache::{Factory, ObjectCache};
pub use parser_cache::ParserCache;
