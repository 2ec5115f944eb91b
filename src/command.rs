use crate::interpreter::Interpreter;
use anyhow::Result;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// Object-safe trait for a classified input line ready to run.
///
/// Implemented by every syntax via a blanket impl.
pub trait Action {
    /// Executes the action against the interpreter state.
    fn execute(self: Box<Self>, shell: &mut Interpreter) -> Result<()>;
}

/// One entry of the ordered classification table.
///
/// Returns `None` when the rule doesn't recognize the line; the interpreter then
/// asks the next rule. The first rule that answers wins.
pub trait SyntaxRule {
    /// Short name of the syntax, used in logs and classification tests.
    fn name(&self) -> &'static str;

    /// Attempt to create an action for the provided input line.
    fn try_create(&self, shell: &Interpreter, line: &str) -> Option<Box<dyn Action>>;
}

/// A line syntax known to the interpreter at compile time.
///
/// Each syntax parses a line into itself; [`crate::interpreter::Rule`] adapts it
/// into a [`SyntaxRule`].
pub trait Syntax: Sized + 'static {
    /// Name of the syntax, e.g. "loop" or "pipeline".
    fn name() -> &'static str;

    /// Recognizes the line. Called with a trimmed, non-empty line.
    fn parse(shell: &Interpreter, line: &str) -> Option<Self>;

    /// Executes the recognized line.
    fn execute(self, shell: &mut Interpreter) -> Result<()>;
}

impl<T: Syntax> Action for T {
    fn execute(self: Box<Self>, shell: &mut Interpreter) -> Result<()> {
        <T as Syntax>::execute(*self, shell)
    }
}
