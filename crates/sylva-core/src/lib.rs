pub mod error;
pub mod value;

pub use error::{Span, SylvaError};
pub use value::{
    intern, resolve, with_resolved, Cons, Symbol, Value, HOME_PACKAGE, KEYWORD_PACKAGE,
    PRIVATE_PACKAGE,
};
