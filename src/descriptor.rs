//! Runtime type descriptors: the capability set through which the table
//! lays out, builds, compares, hashes, destroys and traces elements it
//! knows nothing about at compile time.

use crate::error::Error;
use crate::tracer::ReferenceCollector;
use core::alloc::Layout;
use core::any::TypeId;
use core::fmt;
use std::rc::Rc;

/// Shared handle to a descriptor. Proxies and tables clone it freely; a
/// descriptor synthesized for one proxy simply has no other holders.
pub type DescriptorRef = Rc<dyn TypeDescriptor>;

/// Identity of a collectible host object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

/// Declared element type, as named by the host reflection system and by
/// scripting-side construction requests.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Bool,
    Int,
    Int64,
    Float,
    Double,
    Str,
    Object,
    Struct,
    Array,
    Delegate,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Int64 => "int64",
            TypeTag::Float => "float",
            TypeTag::Double => "double",
            TypeTag::Str => "string",
            TypeTag::Object => "object",
            TypeTag::Struct => "struct",
            TypeTag::Array => "array",
            TypeTag::Delegate => "delegate",
        }
    }
}

impl TryFrom<i32> for TypeTag {
    type Error = Error;

    /// Scripting code passes type tags as plain integers.
    fn try_from(raw: i32) -> Result<Self, Error> {
        Ok(match raw {
            0 => TypeTag::Bool,
            1 => TypeTag::Int,
            2 => TypeTag::Int64,
            3 => TypeTag::Float,
            4 => TypeTag::Double,
            5 => TypeTag::Str,
            6 => TypeTag::Object,
            7 => TypeTag::Struct,
            8 => TypeTag::Array,
            9 => TypeTag::Delegate,
            other => return Err(Error::UnsupportedElementType(format!("#{other}"))),
        })
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dynamically typed scripting value, the boundary type of the
/// marshalling layer.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Number(f64),
    Str(String),
    Object(ObjectId),
}

impl Value {
    /// Short type name used in mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
        }
    }
}

/// Capability set describing one element type's runtime shape.
///
/// # Safety
///
/// Implementors guarantee that every pointer-taking method only accesses
/// `layout().size()` bytes at the given address, and that `construct` and
/// `copy_construct` leave a value that the other methods accept. Callers
/// pass pointers that are aligned to `layout().align()` and, except for the
/// destination of the two constructors, point at a live element of this
/// descriptor's shape.
pub unsafe trait TypeDescriptor {
    fn tag(&self) -> TypeTag;

    fn type_name(&self) -> &'static str {
        self.tag().name()
    }

    fn layout(&self) -> Layout;

    /// Identity of the concrete Rust type stored, used for shape checks and
    /// typed views.
    fn rust_type(&self) -> TypeId;

    /// False for plain data whose destruction is a no-op.
    fn needs_destroy(&self) -> bool;

    /// Default-construct into uninitialized memory.
    unsafe fn construct(&self, dst: *mut u8);

    /// Clone `src` into uninitialized memory at `dst`.
    unsafe fn copy_construct(&self, dst: *mut u8, src: *const u8);

    /// Overwrite the live element at `dst` with a clone of `src`.
    unsafe fn copy_assign(&self, dst: *mut u8, src: *const u8);

    /// Destroy the live element at `ptr`, leaving uninitialized memory.
    unsafe fn destroy(&self, ptr: *mut u8);

    unsafe fn hash(&self, ptr: *const u8) -> u64;

    unsafe fn equals(&self, a: *const u8, b: *const u8) -> bool;

    /// Whether elements hold references the host collector must see.
    fn is_collectible_reference(&self) -> bool {
        false
    }

    /// Report the reference held at `ptr` to the collector. When the
    /// referent is dead the slot is cleared and `true` is returned.
    unsafe fn trace_and_maybe_clear(
        &self,
        _ptr: *mut u8,
        _collector: &mut dyn ReferenceCollector,
    ) -> bool {
        false
    }

    /// Report objects the descriptor itself keeps alive (e.g. a class).
    fn add_referenced_objects(&self, _collector: &mut dyn ReferenceCollector) {}

    unsafe fn read_value(&self, ptr: *const u8) -> Value;

    /// Adapt `value` and assign it to the live element at `dst`. On error
    /// the element is left untouched.
    unsafe fn write_value(&self, dst: *mut u8, value: &Value) -> Result<(), Error>;
}

impl fmt::Debug for dyn TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type", &self.type_name())
            .field("layout", &self.layout())
            .finish()
    }
}

/// Two descriptors are interchangeable when they describe the same Rust
/// type under the same tag; records built by one are readable by the other.
pub fn same_shape(a: &dyn TypeDescriptor, b: &dyn TypeDescriptor) -> bool {
    a.tag() == b.tag() && a.rust_type() == b.rust_type() && a.layout() == b.layout()
}

pub(crate) fn check_shape(expected: &dyn TypeDescriptor, found: &dyn TypeDescriptor) -> Result<(), Error> {
    if same_shape(expected, found) {
        Ok(())
    } else {
        Err(Error::mismatch(expected.type_name(), found.type_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_tags_round_trip_known_values() {
        assert_eq!(TypeTag::try_from(1), Ok(TypeTag::Int));
        assert_eq!(TypeTag::try_from(6), Ok(TypeTag::Object));
        match TypeTag::try_from(42) {
            Err(Error::UnsupportedElementType(name)) => assert_eq!(name, "#42"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn value_kinds_name_the_variant() {
        assert_eq!(Value::Nil.kind(), "nil");
        assert_eq!(Value::Str("x".into()).kind(), "string");
        assert_eq!(Value::Object(ObjectId(3)).kind(), "object");
    }
}
