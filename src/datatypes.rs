use crate::value::{Value, ValueRef};
use crate::variable::{Error, Variable};
use serde::{Deserialize, Serialize};
use std::cmp;
use std::fmt;
use strum_macros::EnumString;

/// Largest number of characters a character-kind value may hold.
pub const MAX_STRING_CHARS: usize = 4000;

/// Largest number of bytes a binary-kind value may hold.
pub const MAX_BINARY_BYTES: usize = 4000;

// Type codes and charset forms the native call interface expects; passed
// through opaquely when a bind or define position is described.
pub(crate) const SQLT_CHR: u16 = 1;
pub(crate) const SQLT_BIN: u16 = 23;
pub(crate) const SQLT_AFC: u16 = 96;
pub(crate) const SQLCS_IMPLICIT: u8 = 1;

/// The data kinds the marshalling layer distinguishes.
#[derive(Clone, Copy, Debug, Deserialize, EnumString, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "snake_case")]
pub enum VarKind {
    String,
    FixedChar,
    Rowid,
    Binary,
}

impl VarKind {
    /// Returns the shared descriptor for this kind.
    #[must_use]
    pub fn variable_type(self) -> &'static VariableType {
        match self {
            VarKind::String => &STRING,
            VarKind::FixedChar => &FIXED_CHAR,
            VarKind::Rowid => &ROWID,
            VarKind::Binary => &BINARY,
        }
    }
}

/// Per-kind behavior invoked through a `VariableType`.
///
/// One implementation exists per data kind; a `Variable` dispatches through
/// its descriptor without knowing which kind it carries.
pub trait TypeHandler: Send + Sync {
    /// Called once at variable creation to set up per-row bookkeeping.
    fn initialize(&self, variable: &mut Variable) -> Result<(), Error>;

    /// Stores a host value at a row position.
    fn set_value(&self, variable: &mut Variable, pos: usize, value: ValueRef) -> Result<(), Error>;

    /// Reads back the value stored at a row position.
    fn get_value(&self, variable: &Variable, pos: usize) -> Result<Value, Error>;

    /// Computes the physical per-slot capacity in bytes for the variable's
    /// current logical size.
    fn buffer_size(&self, variable: &Variable) -> usize;
}

/// An immutable per-kind descriptor shared by every variable of that kind.
///
/// Descriptors are process-wide statics, never mutated after construction,
/// and safe to reference from any number of variables and threads.
pub struct VariableType {
    pub(crate) kind: VarKind,
    pub(crate) handler: &'static dyn TypeHandler,
    pub(crate) native_type_code: u16,
    pub(crate) charset_form: u8,
    pub(crate) default_size: usize,
    pub(crate) is_char_data: bool,
    pub(crate) is_variable_length: bool,
    pub(crate) can_be_copied: bool,
    pub(crate) can_be_in_array: bool,
}

impl VariableType {
    #[must_use]
    pub fn kind(&self) -> VarKind {
        self.kind
    }

    /// The type code sent to the native call interface when describing a
    /// bind or define position.
    #[must_use]
    pub fn native_type_code(&self) -> u16 {
        self.native_type_code
    }

    /// The charset-form token sent alongside the type code.
    #[must_use]
    pub fn charset_form(&self) -> u8 {
        self.charset_form
    }

    /// Default per-element capacity, in characters for character kinds and
    /// bytes for binary.
    #[must_use]
    pub fn default_size(&self) -> usize {
        self.default_size
    }

    /// Whether values are measured and encoded as text rather than raw bytes.
    #[must_use]
    pub fn is_char_data(&self) -> bool {
        self.is_char_data
    }

    /// Whether element length varies per row.
    #[must_use]
    pub fn is_variable_length(&self) -> bool {
        self.is_variable_length
    }

    #[must_use]
    pub fn can_be_copied(&self) -> bool {
        self.can_be_copied
    }

    #[must_use]
    pub fn can_be_in_array(&self) -> bool {
        self.can_be_in_array
    }
}

impl fmt::Debug for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VariableType")
            .field("kind", &self.kind)
            .field("native_type_code", &self.native_type_code)
            .field("charset_form", &self.charset_form)
            .field("default_size", &self.default_size)
            .finish()
    }
}

impl PartialEq for VariableType {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

/// Variable-length character data.
pub static STRING: VariableType = VariableType {
    kind: VarKind::String,
    handler: &StringHandler,
    native_type_code: SQLT_CHR,
    charset_form: SQLCS_IMPLICIT,
    default_size: MAX_STRING_CHARS,
    is_char_data: true,
    is_variable_length: true,
    can_be_copied: true,
    can_be_in_array: true,
};

/// Fixed-width character data.
pub static FIXED_CHAR: VariableType = VariableType {
    kind: VarKind::FixedChar,
    handler: &FixedCharHandler,
    native_type_code: SQLT_AFC,
    charset_form: SQLCS_IMPLICIT,
    default_size: 2000,
    is_char_data: true,
    is_variable_length: true,
    can_be_copied: true,
    can_be_in_array: true,
};

/// Fixed-format row identifiers, marshalled as character data.
pub static ROWID: VariableType = VariableType {
    kind: VarKind::Rowid,
    handler: &RowidHandler,
    native_type_code: SQLT_CHR,
    charset_form: SQLCS_IMPLICIT,
    default_size: 18,
    is_char_data: true,
    is_variable_length: false,
    can_be_copied: true,
    can_be_in_array: true,
};

/// Raw bytes, stored without character-set translation.
pub static BINARY: VariableType = VariableType {
    kind: VarKind::Binary,
    handler: &BinaryHandler,
    native_type_code: SQLT_BIN,
    charset_form: SQLCS_IMPLICIT,
    default_size: MAX_BINARY_BYTES,
    is_char_data: false,
    is_variable_length: true,
    can_be_copied: true,
    can_be_in_array: true,
};

struct StringHandler;

impl TypeHandler for StringHandler {
    fn initialize(&self, variable: &mut Variable) -> Result<(), Error> {
        allocate_length_array(variable)
    }

    fn set_value(&self, variable: &mut Variable, pos: usize, value: ValueRef) -> Result<(), Error> {
        char_set_value(variable, pos, value)
    }

    fn get_value(&self, variable: &Variable, pos: usize) -> Result<Value, Error> {
        char_get_value(variable, pos)
    }

    fn buffer_size(&self, variable: &Variable) -> usize {
        char_buffer_size(variable)
    }
}

struct FixedCharHandler;

impl TypeHandler for FixedCharHandler {
    fn initialize(&self, variable: &mut Variable) -> Result<(), Error> {
        allocate_length_array(variable)
    }

    fn set_value(&self, variable: &mut Variable, pos: usize, value: ValueRef) -> Result<(), Error> {
        // short values keep their actual length; the native interface
        // blank-pads on its side of the boundary
        char_set_value(variable, pos, value)
    }

    fn get_value(&self, variable: &Variable, pos: usize) -> Result<Value, Error> {
        char_get_value(variable, pos)
    }

    fn buffer_size(&self, variable: &Variable) -> usize {
        char_buffer_size(variable)
    }
}

struct RowidHandler;

impl TypeHandler for RowidHandler {
    fn initialize(&self, variable: &mut Variable) -> Result<(), Error> {
        allocate_length_array(variable)
    }

    fn set_value(&self, variable: &mut Variable, pos: usize, value: ValueRef) -> Result<(), Error> {
        char_set_value(variable, pos, value)
    }

    fn get_value(&self, variable: &Variable, pos: usize) -> Result<Value, Error> {
        char_get_value(variable, pos)
    }

    fn buffer_size(&self, variable: &Variable) -> usize {
        char_buffer_size(variable)
    }
}

struct BinaryHandler;

impl TypeHandler for BinaryHandler {
    fn initialize(&self, variable: &mut Variable) -> Result<(), Error> {
        allocate_length_array(variable)
    }

    fn set_value(&self, variable: &mut Variable, pos: usize, value: ValueRef) -> Result<(), Error> {
        let bytes = match value {
            ValueRef::Text(text) => text.as_bytes(),
            ValueRef::Bytes(bytes) => bytes,
        };
        if bytes.len() > MAX_BINARY_BYTES {
            return Err(Error::DataTooLarge {
                kind: "binary",
                len: bytes.len(),
                max: MAX_BINARY_BYTES,
            });
        }
        variable.store_slot(pos, bytes.len(), bytes)
    }

    fn get_value(&self, variable: &Variable, pos: usize) -> Result<Value, Error> {
        Ok(Value::Bytes(variable.slot_bytes(pos).to_vec()))
    }

    fn buffer_size(&self, variable: &Variable) -> usize {
        variable.size
    }
}

fn allocate_length_array(variable: &mut Variable) -> Result<(), Error> {
    variable.actual_length = vec![0; variable.allocated_elements];
    Ok(())
}

fn char_set_value(variable: &mut Variable, pos: usize, value: ValueRef) -> Result<(), Error> {
    let (chars, bytes) = match value {
        ValueRef::Text(text) => (text.chars().count(), text.as_bytes()),
        ValueRef::Bytes(bytes) => (
            variable
                .environment
                .from_encoded_string(bytes)?
                .chars()
                .count(),
            bytes,
        ),
    };
    if chars > MAX_STRING_CHARS {
        return Err(Error::DataTooLarge {
            kind: "string",
            len: chars,
            max: MAX_STRING_CHARS,
        });
    }
    // the slot must fit the encoded form even when it is denser than
    // chars * max_bytes_per_character
    let per_char = variable.environment.max_bytes_per_character();
    let required = cmp::max(chars, (bytes.len() + per_char - 1) / per_char);
    variable.store_slot(pos, required, bytes)
}

fn char_get_value(variable: &Variable, pos: usize) -> Result<Value, Error> {
    let text = variable
        .environment
        .from_encoded_string(variable.slot_bytes(pos))?;
    Ok(Value::Text(text))
}

fn char_buffer_size(variable: &Variable) -> usize {
    variable.size * variable.environment.max_bytes_per_character()
}
