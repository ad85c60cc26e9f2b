//! Tessel Core: the value model and stack engine of the Tessel language
//!
//! Tessel is a stack-based scripting language for querying and transforming
//! time series. This crate holds everything an interpreter instance needs,
//! independent of the operator library built on top of it.
//!
//! Key design principles:
//! - Value: a closed tagged enum of what scripts talk about
//! - Macro: immutable program data, resolved against operators by name at run time
//! - Stack: values + bindings + attributes, owned by exactly one execution
//! - Flow: loop signals travel beside errors, never through them
//!
//! # Modules
//!
//! - `value`: Value enum and generic extraction (`GET` semantics)
//! - `error`: ScriptError taxonomy
//! - `macros`: Macro and Step
//! - `stack`: Stack, attributes, limits and the `exec` engine
//! - `registry`: Operator trait and the name -> operator registry
//! - `context`: StackContext snapshots and their binary encoding
//! - `reader`: minimal script text reader
//! - `gts`: geo time series data model and selectors
//! - `capabilities`: storage, directory and time-source collaborators

pub mod capabilities;
pub mod context;
pub mod error;
pub mod gts;
pub mod macros;
pub mod reader;
pub mod registry;
pub mod stack;
pub mod value;

// Re-export key types
pub use capabilities::{
    Capabilities, DirectoryClient, ManualTimeSource, MemoryStore, StoreClient, SystemTimeSource,
    TimeSource,
};
pub use context::{ContextError, StackContext};
pub use error::{ErrorKind, ScriptError};
pub use gts::{Labels, NO_ELEVATION, NO_LOCATION, Sample, SampleValue, Selector, Series};
pub use macros::{Macro, Step};
pub use reader::read;
pub use registry::{Builtin, BuiltinFn, Operator, Registry};
pub use stack::{Attributes, Flow, Limits, Stack};
pub use value::{Value, extract};
