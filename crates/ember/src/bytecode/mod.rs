//! Bytecode representation and the virtual machine that executes it.
//!
//! # Module Structure
//!
//! - `op` - opcode definitions and argument classification
//! - `code` - code objects, their serialized form and load-time validation
//! - `builder` - `CodeBuilder` for assembling code objects with labels
//! - `vm` - frames, block stacks, the eval loop and generator resumption

pub use builder::{BuilderError, CodeBuilder, Label};
pub(crate) use code::{Code, CodeBody, load_code};
pub use code::{CodeFlags, CodeSpec, ConstSpec};
pub use op::Opcode;
pub use vm::BlockKind;

mod builder;
mod code;
pub(crate) mod op;
pub(crate) mod vm;
