//! # Ferrule
//!
//! String and byte pattern matching backed by a regex engine that executes
//! outside the host call stack, behind its own linear memory and allocator.
//! The crate is the bridge: it moves pattern text, input buffers, and
//! structured match results across that boundary safely and cheaply, and
//! builds the find/replace/split algorithms on top of the engine's one
//! primitive match operation.
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrule::Regex;
//!
//! let re = Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap();
//! let m = re.find("Date: 2026-02-12").unwrap();
//! assert_eq!(m.as_str(), "2026-02-12");
//! assert_eq!(m.start(), 6);
//! ```
//!
//! Options compose through [`RegexBuilder`]:
//!
//! ```rust
//! use ferrule::Regex;
//!
//! let re = Regex::builder(r"hello")
//!     .case_insensitive(true)
//!     .build()
//!     .unwrap();
//! assert!(re.is_match("Hello World"));
//! ```
//!
//! Several patterns can be searched simultaneously with a [`Set`]:
//!
//! ```rust
//! use ferrule::{Options, Set};
//!
//! let set = Set::compile(&["abc", r"\d+"], Options::empty()).unwrap();
//! assert_eq!(set.find_all("abc123", -1), vec![0, 1]);
//! ```
//!
//! ## Module Structure
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`api`] | `Regex`, builders, match/capture types, find/replace/split |
//! | [`set`] | Multi-pattern simultaneous search |
//! | [`error`] | Pattern-error taxonomy |
//! | `arena` | Per-operation bump allocator over guest memory |
//! | `pool` | Free list of engine execution contexts |
//! | `abi` | Typed wrappers over the engine's function table |
//! | `decode` | Pointer+length results to caller-relative offsets |
//! | `native` | The natively-linked engine module behind the bridge |

pub mod api;
pub mod error;
pub mod prelude;
pub mod set;

mod abi;
mod arena;
mod decode;
mod engine;
mod native;
mod pool;

pub use api::{Captures, CapturesIter, FindIter, Match, Options, Regex, RegexBuilder};
pub use error::CompileError;
pub use set::Set;
