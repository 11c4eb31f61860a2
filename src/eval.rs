pub mod interpreter;
pub(crate) mod lexer;
pub(crate) mod scope;

pub use interpreter::EvalError;
pub use scope::PropertyScope;
pub(crate) use scope::EvalContext;
