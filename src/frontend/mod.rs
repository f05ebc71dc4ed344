pub mod ast;
pub mod builtins;
pub mod core;
pub mod env;
pub mod for_each;
pub mod modules;
pub mod parser;
pub mod pipeline;
pub mod references;
pub mod value;
pub mod variables;

// Re-export commonly used functions for convenience
pub use builtins::create_function_table;
pub use core::{expr_to_string, expr_to_value, find_attr, get_attr_string};
pub use value::{Unknown, Value};
