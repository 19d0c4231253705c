//! # Write Task Compiler
//!
//! Translates write tasks into store-native writes and runs them atomically.
//!
//! | Task | Store write | Empty nested objects |
//! |---|---|---|
//! | add | merge set | kept |
//! | set | overwrite | kept |
//! | update | merge set | dropped |
//! | updateShallow | top-level field update | kept |
//! | setPath | single field-path update | kept |
//! | delete | delete | n/a |

pub mod runner;
pub mod scrub;
pub mod task;

pub use runner::{BatchRunner, CompiledWrite, ObserverError, WriteObserver, WrittenDocument};
pub use scrub::{scrub_document, scrub_value};
pub use task::{ChangeKind, WriteTask};
