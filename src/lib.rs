mod datatypes;
mod environment;
mod memory;
mod util;
mod value;
mod variable;

pub use datatypes::{
    TypeHandler, VarKind, VariableType, BINARY, FIXED_CHAR, MAX_BINARY_BYTES, MAX_STRING_CHARS,
    ROWID, STRING,
};
pub use environment::{Charset, DecodeError, Environment};
pub use memory::AllocationError;
pub use value::{TypeMismatch, Value, ValueRef};
pub use variable::{BindDescriptor, Error, Variable};
