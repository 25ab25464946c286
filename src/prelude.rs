// prelude.rs - Convenient re-exports for the common API surface.
//
//! # Prelude
//!
//! ```
//! use ferrule::prelude::*;
//!
//! let re = Regex::new(r"\d+").unwrap();
//! let m = re.find("answer: 42").unwrap();
//! assert_eq!(m.as_str(), "42");
//! ```

pub use crate::api::{Captures, CapturesIter, FindIter, Match, Options, Regex, RegexBuilder};
pub use crate::error::CompileError;
pub use crate::set::Set;
