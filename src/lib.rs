//! An interactive command interpreter for a modular tool runner.
//!
//! Every input line is classified against an ordered table of small syntaxes
//! (loops, wrappers, redirection, `|>` pipelines, assignments, shell escapes,
//! built-in verbs) and falls back to running a module or the native shell.
//!
//! The main entry point is [`Interpreter`]. Modules are provided by a
//! [`module::ModuleRuntime`]; [`module::ModuleDirectory`] is the default one,
//! backed by a directory of scripts. The [`range`] and [`lexer`] modules can be
//! used on their own to expand range expressions and tokenize argument lists.

mod builtin;
pub mod command;
pub mod console;
pub mod data;
pub mod env;
pub mod external;
pub mod functions;
mod interpreter;
pub mod io_adapters;
pub mod lexer;
pub mod loops;
pub mod module;
pub mod parser;
pub mod pipeline;
pub mod range;
mod syntax;

/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API.
pub use interpreter::{Interpreter, Session};
