//! Floyd execution core
//!
//! Floyd is a statically typed, strict, immutable-by-default programming
//! language. This crate is its bytecode virtual machine: a compact
//! register-based instruction set, a tagged value representation with
//! reference-counted heap objects and persistent collections, a
//! stack-frame mechanism, a type interner, and the built-in intrinsics.
//!
//! The host loads a compiled program image, reads globals, and calls
//! bound function values:
//!
//! ```no_run
//! use floyd::{load_program, Config};
//!
//! fn main() -> floyd::Result<()> {
//!     let image = std::fs::read("program.json")?;
//!     let mut runtime = load_program(&image, Config::default())?;
//!     if let Some((_, value)) = runtime.find_global("x") {
//!         println!("x = {:?}", value);
//!     }
//!     for line in runtime.take_output() {
//!         println!("{}", line);
//!     }
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/floyd")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod intrinsics;
pub mod loader;
pub mod runtime;
pub mod types;
pub mod util;
pub mod vm;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

// Host API re-exports
pub use loader::{
    load_image, load_program, FrameImage, FunctionImage, MemberImage, ProgramImage, SymbolImage,
    TypeImage,
};
pub use runtime::{Config, DictBackend, Value, VectorBackend};
pub use vm::{Interpreter, LoadError, RuntimeError};

/// Language version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Language name
pub const NAME: &str = "Floyd";
