use crate::datatypes::{VariableType, MAX_BINARY_BYTES, MAX_STRING_CHARS};
use crate::environment::{DecodeError, Environment};
use crate::memory::{AllocationError, SlotBuffer};
use crate::value::{TypeMismatch, Value, ValueRef};
use num_traits::FromPrimitive;
use std::cmp;
use std::convert::TryFrom;
use std::mem;
use std::sync::Arc;
use thiserror::Error;

/// A per-column or per-parameter buffer manager.
///
/// A variable owns one contiguous buffer of `allocated_elements` fixed-size
/// slots plus a parallel array of per-row length cells, the layout a native
/// call interface expects for array bind and define operations. Values move
/// in through `set_value` and out through
/// `get_value`; the per-kind behavior is dispatched
/// through the variable's `VariableType`.
///
/// A variable is not safe for concurrent mutation: `set_value` and `resize`
/// must be serialized by the caller. Calls to `get_value` that do not race
/// with a mutation may run concurrently.
#[derive(Debug)]
pub struct Variable {
    pub(crate) typ: &'static VariableType,
    pub(crate) environment: Arc<Environment>,
    pub(crate) allocated_elements: usize,
    pub(crate) size: usize,
    pub(crate) buffer_size: usize,
    pub(crate) data: SlotBuffer,
    pub(crate) actual_length: Vec<u16>,
}

impl Variable {
    /// Creates a variable with the kind's default element size.
    ///
    /// `allocated_elements` is the number of rows the variable can hold in a
    /// single array operation; it is clamped to at least 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer cannot be allocated.
    pub fn new(
        typ: &'static VariableType,
        environment: Arc<Environment>,
        allocated_elements: usize,
    ) -> Result<Self, Error> {
        Self::with_size(typ, environment, allocated_elements, typ.default_size())
    }

    /// Creates a variable sized for elements of `size` logical units:
    /// characters for character kinds, bytes for binary.
    ///
    /// # Errors
    ///
    /// Returns `DataTooLarge` if `size` exceeds the kind's hard cap, or an
    /// allocation error if the buffer cannot be obtained.
    pub fn with_size(
        typ: &'static VariableType,
        environment: Arc<Environment>,
        allocated_elements: usize,
        size: usize,
    ) -> Result<Self, Error> {
        let (kind, max) = if typ.is_char_data() {
            ("string", MAX_STRING_CHARS)
        } else {
            ("binary", MAX_BINARY_BYTES)
        };
        if size > max {
            return Err(Error::DataTooLarge {
                kind,
                len: size,
                max,
            });
        }
        let mut variable = Self {
            typ,
            environment,
            allocated_elements: cmp::max(1, allocated_elements),
            size: cmp::max(1, size),
            buffer_size: 0,
            data: SlotBuffer::empty(),
            actual_length: Vec::new(),
        };
        variable.buffer_size = typ.handler.buffer_size(&variable);
        variable.data = SlotBuffer::new(variable.allocated_elements, variable.buffer_size)?;
        typ.handler.initialize(&mut variable)?;
        Ok(variable)
    }

    #[must_use]
    pub fn typ(&self) -> &'static VariableType {
        self.typ
    }

    #[must_use]
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// Returns the number of rows this variable supports.
    #[must_use]
    pub fn allocated_elements(&self) -> usize {
        self.allocated_elements
    }

    /// Returns the current logical per-element size: characters for
    /// character kinds, bytes for binary.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the current physical per-slot capacity in bytes.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Returns the per-row length cells. Cell `i` records how many bytes of
    /// slot `i` hold valid data.
    #[must_use]
    pub fn actual_lengths(&self) -> &[u16] {
        &self.actual_length
    }

    /// Stores a host value at row `pos`.
    ///
    /// Character kinds measure and cap the value as text, decoding byte
    /// input through the session character set first; the binary kind
    /// measures raw bytes, taking a text input's underlying bytes. The slot
    /// grows in place when the encoded value no longer fits. Bytes beyond
    /// the recorded length are left as is and carry no meaning.
    ///
    /// # Errors
    ///
    /// Returns `DataTooLarge` if the value exceeds the kind's hard cap (the
    /// buffer and all rows are left untouched), `DecodeError` if byte input
    /// for a character kind is malformed, or an allocation error if a
    /// required resize fails.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is out of bound.
    pub fn set_value<'a, V>(&mut self, pos: usize, value: V) -> Result<(), Error>
    where
        V: Into<ValueRef<'a>>,
    {
        assert!(pos < self.allocated_elements, "row position out of bound");
        let handler = self.typ.handler;
        handler.set_value(self, pos, value.into())
    }

    /// Stores a dynamically-typed host value at row `pos`. JSON strings are
    /// coerced to text and JSON byte arrays to binary input.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the value is neither, plus everything
    /// `set_value` returns.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is out of bound.
    pub fn set_value_dynamic(&mut self, pos: usize, value: &serde_json::Value) -> Result<(), Error> {
        let value = Value::try_from(value)?;
        self.set_value(pos, &value)
    }

    /// Returns the value stored at row `pos`: text for character kinds,
    /// bytes for binary. A row never written reads back as empty.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if the row's bytes are invalid in the session
    /// character set.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is out of bound.
    pub fn get_value(&self, pos: usize) -> Result<Value, Error> {
        assert!(pos < self.allocated_elements, "row position out of bound");
        self.typ.handler.get_value(self, pos)
    }

    /// Grows the per-element capacity to hold `new_size` logical units,
    /// keeping every row's current bytes at its new offset. Never shrinks.
    ///
    /// A bind loop that writes rows in parallel can call this once with the
    /// largest value's size up front, so no concurrent write triggers a
    /// reallocation.
    ///
    /// # Errors
    ///
    /// Returns an allocation error if the new buffer cannot be obtained; the
    /// old buffer then remains the observable state.
    pub fn resize(&mut self, new_size: usize) -> Result<(), Error> {
        if new_size <= self.size {
            return Ok(());
        }
        let old_size = mem::replace(&mut self.size, new_size);
        let new_buffer_size = self.typ.handler.buffer_size(self);
        if new_buffer_size > self.buffer_size {
            if let Err(e) = self.data.restride(new_buffer_size) {
                self.size = old_size;
                return Err(e.into());
            }
            self.buffer_size = new_buffer_size;
        }
        Ok(())
    }

    /// Returns the raw pointer handed to the native call interface as the
    /// bind/define buffer address.
    #[must_use]
    pub fn raw_data(&self) -> *const u8 {
        self.data.raw_data()
    }

    /// Mutable counterpart of `raw_data`, for fetch
    /// operations that write directly into the buffer.
    pub fn raw_data_mut(&mut self) -> *mut u8 {
        self.data.raw_data_mut()
    }

    /// Returns the raw pointer to the length-cell array handed to the native
    /// call interface.
    pub fn actual_length_raw(&mut self) -> *mut u16 {
        self.actual_length.as_mut_ptr()
    }

    /// Returns row `pos`'s whole slot for a fetch shim to write into.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is out of bound.
    pub fn slot_mut(&mut self, pos: usize) -> &mut [u8] {
        self.data.slot_mut(pos)
    }

    /// Records the number of valid bytes a fetch wrote into row `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is out of bound or `len` exceeds the slot capacity.
    pub fn set_fetched_length(&mut self, pos: usize, len: u16) {
        assert!(
            usize::from(len) <= self.buffer_size,
            "fetched length exceeds slot capacity"
        );
        self.actual_length[pos] = len;
    }

    /// Returns the metadata snapshot sent to the native call interface when
    /// this variable's bind or define position is described.
    #[must_use]
    pub fn bind_descriptor(&self) -> BindDescriptor {
        BindDescriptor {
            native_type_code: self.typ.native_type_code(),
            charset_form: self.typ.charset_form(),
            charset_id: self.environment.charset().id(),
            buffer_size: self.buffer_size,
            max_array_elements: self.allocated_elements,
        }
    }

    pub(crate) fn store_slot(
        &mut self,
        pos: usize,
        required_size: usize,
        bytes: &[u8],
    ) -> Result<(), Error> {
        if bytes.len() > self.buffer_size {
            self.resize(required_size)?;
        }
        debug_assert!(bytes.len() <= self.buffer_size);
        debug_assert!(u16::from_usize(bytes.len()).is_some());
        self.actual_length[pos] =
            u16::from_usize(bytes.len()).expect("capped length fits in a length cell");
        if !bytes.is_empty() {
            self.data.slot_mut(pos)[..bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }

    pub(crate) fn slot_bytes(&self, pos: usize) -> &[u8] {
        &self.data.slot(pos)[..usize::from(self.actual_length[pos])]
    }
}

/// Metadata for one bind or define position, consumed by the statement layer
/// when describing the position to the native call interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BindDescriptor {
    pub native_type_code: u16,
    pub charset_form: u8,
    pub charset_id: u16,
    pub buffer_size: usize,
    pub max_array_elements: usize,
}

/// Errors reported while binding or fetching through a variable.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    TypeMismatch(#[from] TypeMismatch),
    #[error("{kind} data too large: {len} exceeds the {max} maximum")]
    DataTooLarge {
        kind: &'static str,
        len: usize,
        max: usize,
    },
    #[error("memory error: {0}")]
    MemoryError(#[from] AllocationError),
    #[error("decode error: {0}")]
    DecodeError(#[from] DecodeError),
}

#[cfg(test)]
mod tests {
    use super::{Error, Value, Variable};
    use crate::datatypes::{BINARY, FIXED_CHAR, ROWID, STRING};
    use crate::environment::{Charset, Environment};
    use itertools::izip;
    use serde_json::json;
    use std::sync::Arc;

    fn env() -> Arc<Environment> {
        Arc::new(Environment::new(Charset::Al32Utf8))
    }

    #[test]
    fn text_round_trip() {
        let mut variable = Variable::with_size(&STRING, env(), 1, 10).unwrap();
        variable.set_value(0, "hello").unwrap();
        assert_eq!(Value::Text("hello".to_string()), variable.get_value(0).unwrap());
        assert_eq!(&[5], variable.actual_lengths());
    }

    #[test]
    fn binary_round_trip() {
        let mut variable = Variable::with_size(&BINARY, env(), 2, 8).unwrap();
        variable.set_value(0, &b"\x00\xff\x10"[..]).unwrap();
        assert_eq!(
            Value::Bytes(b"\x00\xff\x10".to_vec()),
            variable.get_value(0).unwrap()
        );
    }

    #[test]
    fn buffer_size_per_kind() {
        let variable = Variable::with_size(&STRING, env(), 1, 10).unwrap();
        assert_eq!(40, variable.buffer_size());

        let variable = Variable::with_size(&BINARY, env(), 1, 10).unwrap();
        assert_eq!(10, variable.buffer_size());

        let ascii = Arc::new(Environment::new(Charset::Us7Ascii));
        let variable = Variable::with_size(&FIXED_CHAR, ascii, 1, 10).unwrap();
        assert_eq!(10, variable.buffer_size());
    }

    #[test]
    fn rowid_default_size() {
        let variable = Variable::new(&ROWID, env(), 1).unwrap();
        assert_eq!(18, variable.size());
        assert_eq!(72, variable.buffer_size());
    }

    #[test]
    fn grows_and_keeps_earlier_rows() {
        let mut variable = Variable::with_size(&STRING, env(), 3, 4).unwrap();
        assert_eq!(16, variable.buffer_size());

        let long = "longer-than-the-initial-capacity-str";
        variable.set_value(0, "ab").unwrap();
        variable.set_value(1, long).unwrap();
        variable.set_value(2, "").unwrap();

        for (cell, expected) in izip!(variable.actual_lengths(), &[2_u16, 36, 0]) {
            assert_eq!(expected, cell);
        }
        assert!(variable.buffer_size() >= 36 * 4);
        assert_eq!(Value::Text("ab".to_string()), variable.get_value(0).unwrap());
        assert_eq!(Value::Text(long.to_string()), variable.get_value(1).unwrap());
        assert_eq!(Value::Text(String::new()), variable.get_value(2).unwrap());
    }

    #[test]
    fn string_over_cap_leaves_variable_untouched() {
        let mut variable = Variable::with_size(&STRING, env(), 2, 4).unwrap();
        variable.set_value(0, "abcd").unwrap();
        let buffer_size = variable.buffer_size();

        let huge = "x".repeat(4001);
        match variable.set_value(1, huge.as_str()) {
            Err(Error::DataTooLarge { kind, len, max }) => {
                assert_eq!("string", kind);
                assert_eq!(4001, len);
                assert_eq!(4000, max);
            }
            other => panic!("expected DataTooLarge, got {:?}", other),
        }
        assert_eq!(buffer_size, variable.buffer_size());
        assert_eq!(&[4, 0], variable.actual_lengths());
        assert_eq!(Value::Text("abcd".to_string()), variable.get_value(0).unwrap());
    }

    #[test]
    fn binary_over_cap_leaves_variable_untouched() {
        let mut variable = Variable::with_size(&BINARY, env(), 1, 4).unwrap();
        let huge = vec![0_u8; 4001];
        assert!(matches!(
            variable.set_value(0, huge.as_slice()),
            Err(Error::DataTooLarge { kind: "binary", .. })
        ));
        assert_eq!(4, variable.buffer_size());
        assert_eq!(&[0], variable.actual_lengths());
    }

    #[test]
    fn binary_empty_value() {
        let mut variable = Variable::with_size(&BINARY, env(), 1, 4).unwrap();
        variable.set_value(0, &b""[..]).unwrap();
        assert_eq!(&[0], variable.actual_lengths());
        assert_eq!(Value::Bytes(Vec::new()), variable.get_value(0).unwrap());
    }

    #[test]
    fn char_kind_accepts_bytes() {
        let mut variable = Variable::with_size(&STRING, env(), 1, 4).unwrap();
        variable.set_value(0, &b"abc"[..]).unwrap();
        assert_eq!(Value::Text("abc".to_string()), variable.get_value(0).unwrap());

        assert!(matches!(
            variable.set_value(0, &b"\xff\xfe"[..]),
            Err(Error::DecodeError(_))
        ));
    }

    #[test]
    fn binary_kind_accepts_text() {
        let mut variable = Variable::with_size(&BINARY, env(), 1, 8).unwrap();
        variable.set_value(0, "raw").unwrap();
        assert_eq!(Value::Bytes(b"raw".to_vec()), variable.get_value(0).unwrap());
    }

    #[test]
    fn multibyte_text_fits_after_resize() {
        let mut variable = Variable::with_size(&STRING, env(), 1, 1).unwrap();
        let text = "héllo wörld";
        variable.set_value(0, text).unwrap();
        assert_eq!(
            text.len(),
            usize::from(variable.actual_lengths()[0])
        );
        assert_eq!(Value::Text(text.to_string()), variable.get_value(0).unwrap());
    }

    #[test]
    fn presize_avoids_later_growth() {
        let mut variable = Variable::with_size(&STRING, env(), 2, 2).unwrap();
        variable.set_value(0, "ab").unwrap();
        variable.resize(50).unwrap();
        let buffer_size = variable.buffer_size();
        assert_eq!(200, buffer_size);

        variable.set_value(1, &"z".repeat(50)[..]).unwrap();
        assert_eq!(buffer_size, variable.buffer_size());
        assert_eq!(Value::Text("ab".to_string()), variable.get_value(0).unwrap());

        // shrinking is a no-op
        variable.resize(10).unwrap();
        assert_eq!(buffer_size, variable.buffer_size());
    }

    #[test]
    fn fetch_writes_read_back() {
        let mut variable = Variable::with_size(&STRING, env(), 2, 8).unwrap();
        variable.slot_mut(1)[..6].copy_from_slice(b"fetchd");
        variable.set_fetched_length(1, 6);
        assert_eq!(
            Value::Text("fetchd".to_string()),
            variable.get_value(1).unwrap()
        );
        assert_eq!(Value::Text(String::new()), variable.get_value(0).unwrap());
    }

    #[test]
    fn fetched_garbage_fails_to_decode() {
        let mut variable = Variable::with_size(&STRING, env(), 1, 4).unwrap();
        variable.slot_mut(0)[..2].copy_from_slice(b"\xc3\x28");
        variable.set_fetched_length(0, 2);
        assert!(matches!(
            variable.get_value(0),
            Err(Error::DecodeError(_))
        ));
    }

    #[test]
    fn dynamic_values() {
        let mut variable = Variable::with_size(&STRING, env(), 1, 4).unwrap();
        variable.set_value_dynamic(0, &json!("dyn")).unwrap();
        assert_eq!(Value::Text("dyn".to_string()), variable.get_value(0).unwrap());
        assert!(matches!(
            variable.set_value_dynamic(0, &json!(1.5)),
            Err(Error::TypeMismatch(_))
        ));

        let mut variable = Variable::with_size(&BINARY, env(), 1, 4).unwrap();
        variable.set_value_dynamic(0, &json!([104, 105])).unwrap();
        assert_eq!(Value::Bytes(b"hi".to_vec()), variable.get_value(0).unwrap());
    }

    #[test]
    fn allocated_elements_clamped() {
        let variable = Variable::with_size(&STRING, env(), 0, 4).unwrap();
        assert_eq!(1, variable.allocated_elements());
        assert_eq!(&[0], variable.actual_lengths());
    }

    #[test]
    fn oversized_creation_rejected() {
        assert!(matches!(
            Variable::with_size(&STRING, env(), 1, 4001),
            Err(Error::DataTooLarge { kind: "string", .. })
        ));
        assert!(matches!(
            Variable::with_size(&BINARY, env(), 1, 4001),
            Err(Error::DataTooLarge { kind: "binary", .. })
        ));
    }

    #[test]
    fn bind_descriptor_snapshot() {
        let variable = Variable::with_size(&STRING, env(), 4, 10).unwrap();
        let descriptor = variable.bind_descriptor();
        assert_eq!(1, descriptor.native_type_code);
        assert_eq!(1, descriptor.charset_form);
        assert_eq!(873, descriptor.charset_id);
        assert_eq!(40, descriptor.buffer_size);
        assert_eq!(4, descriptor.max_array_elements);
    }

    #[test]
    #[should_panic(expected = "row position out of bound")]
    fn set_out_of_bound() {
        let mut variable = Variable::with_size(&STRING, env(), 2, 4).unwrap();
        let _ = variable.set_value(2, "x");
    }
}
