//! Builtin descriptors for statically known element types.
//!
//! `TypedDescriptor<T, S>` erases any `T: Element` behind the
//! `TypeDescriptor` trait. All raw-pointer casts for builtin elements live
//! in its trait impl; `Element` itself is a safe trait.

use crate::descriptor::{DescriptorRef, ObjectId, TypeDescriptor, TypeTag, Value};
use crate::error::Error;
use crate::tracer::ReferenceCollector;
use core::alloc::Layout;
use core::any::TypeId;
use core::hash::{BuildHasher, Hash, Hasher};
use core::marker::PhantomData;
use std::collections::hash_map::RandomState;
use std::rc::Rc;

/// A Rust type that can be stored in a type-erased container.
pub trait Element: Clone + Default + 'static {
    const TAG: TypeTag;

    /// Whether values of this type reference collectible host objects.
    const COLLECTIBLE: bool = false;

    fn element_eq(&self, other: &Self) -> bool;

    /// Must agree with `element_eq`: equal elements hash equally.
    fn element_hash<H: Hasher>(&self, state: &mut H);

    fn to_value(&self) -> Value;

    fn from_value(value: &Value) -> Result<Self, Error>;

    /// Report held references; clear them and return `true` if any died.
    fn trace(&mut self, _collector: &mut dyn ReferenceCollector) -> bool {
        false
    }
}

impl Element for bool {
    const TAG: TypeTag = TypeTag::Bool;

    fn element_eq(&self, other: &Self) -> bool {
        self == other
    }
    fn element_hash<H: Hasher>(&self, state: &mut H) {
        self.hash(state)
    }
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::mismatch(Self::TAG.name(), other.kind())),
        }
    }
}

fn integral(value: &Value, expected: &'static str) -> Result<i64, Error> {
    match *value {
        Value::Int(i) => Ok(i),
        Value::Number(n) if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 => {
            Ok(n as i64)
        }
        ref other => Err(Error::mismatch(expected, other.kind())),
    }
}

impl Element for i32 {
    const TAG: TypeTag = TypeTag::Int;

    fn element_eq(&self, other: &Self) -> bool {
        self == other
    }
    fn element_hash<H: Hasher>(&self, state: &mut H) {
        self.hash(state)
    }
    fn to_value(&self) -> Value {
        Value::Int(i64::from(*self))
    }
    fn from_value(value: &Value) -> Result<Self, Error> {
        let wide = integral(value, Self::TAG.name())?;
        i32::try_from(wide).map_err(|_| Error::mismatch(Self::TAG.name(), "out-of-range integer"))
    }
}

impl Element for i64 {
    const TAG: TypeTag = TypeTag::Int64;

    fn element_eq(&self, other: &Self) -> bool {
        self == other
    }
    fn element_hash<H: Hasher>(&self, state: &mut H) {
        self.hash(state)
    }
    fn to_value(&self) -> Value {
        Value::Int(*self)
    }
    fn from_value(value: &Value) -> Result<Self, Error> {
        integral(value, Self::TAG.name())
    }
}

fn floating(value: &Value, expected: &'static str) -> Result<f64, Error> {
    match *value {
        Value::Number(n) => Ok(n),
        Value::Int(i) => Ok(i as f64),
        ref other => Err(Error::mismatch(expected, other.kind())),
    }
}

impl Element for f32 {
    const TAG: TypeTag = TypeTag::Float;

    fn element_eq(&self, other: &Self) -> bool {
        self == other
    }
    fn element_hash<H: Hasher>(&self, state: &mut H) {
        // +0.0 and -0.0 compare equal, so they must hash alike.
        let normalized = if *self == 0.0 { 0.0f32 } else { *self };
        normalized.to_bits().hash(state)
    }
    fn to_value(&self) -> Value {
        Value::Number(f64::from(*self))
    }
    fn from_value(value: &Value) -> Result<Self, Error> {
        // Infinities and NaN carry over; finite numbers must fit.
        match floating(value, Self::TAG.name())? {
            n if n.is_finite() && n.abs() > f64::from(f32::MAX) => {
                Err(Error::mismatch(Self::TAG.name(), value.kind()))
            }
            n => Ok(n as f32),
        }
    }
}

impl Element for f64 {
    const TAG: TypeTag = TypeTag::Double;

    fn element_eq(&self, other: &Self) -> bool {
        self == other
    }
    fn element_hash<H: Hasher>(&self, state: &mut H) {
        let normalized = if *self == 0.0 { 0.0f64 } else { *self };
        normalized.to_bits().hash(state)
    }
    fn to_value(&self) -> Value {
        Value::Number(*self)
    }
    fn from_value(value: &Value) -> Result<Self, Error> {
        floating(value, Self::TAG.name())
    }
}

impl Element for String {
    const TAG: TypeTag = TypeTag::Str;

    fn element_eq(&self, other: &Self) -> bool {
        self == other
    }
    fn element_hash<H: Hasher>(&self, state: &mut H) {
        self.hash(state)
    }
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(Error::mismatch(Self::TAG.name(), other.kind())),
        }
    }
}

/// Object references are nullable; a dead referent is cleared to `None`.
impl Element for Option<ObjectId> {
    const TAG: TypeTag = TypeTag::Object;
    const COLLECTIBLE: bool = true;

    fn element_eq(&self, other: &Self) -> bool {
        self == other
    }
    fn element_hash<H: Hasher>(&self, state: &mut H) {
        self.hash(state)
    }
    fn to_value(&self) -> Value {
        match self {
            Some(id) => Value::Object(*id),
            None => Value::Nil,
        }
    }
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Object(id) => Ok(Some(*id)),
            Value::Nil => Ok(None),
            other => Err(Error::mismatch(Self::TAG.name(), other.kind())),
        }
    }
    fn trace(&mut self, collector: &mut dyn ReferenceCollector) -> bool {
        match *self {
            Some(id) if !collector.add_referenced_object(id) => {
                *self = None;
                true
            }
            _ => false,
        }
    }
}

/// Descriptor for a statically known element type.
pub struct TypedDescriptor<T, S = RandomState> {
    build_hasher: S,
    class: Option<ObjectId>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element> TypedDescriptor<T> {
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    /// Descriptor for object references constrained to `class`; the class
    /// object is kept alive for as long as the descriptor is traced.
    pub fn with_class(class: ObjectId) -> Self {
        Self {
            class: Some(class),
            ..Self::new()
        }
    }

    /// Wrap into the shared handle proxies and tables take.
    pub fn shared() -> DescriptorRef {
        Rc::new(Self::new())
    }
}

impl<T: Element> Default for TypedDescriptor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element, S: BuildHasher> TypedDescriptor<T, S> {
    pub fn with_hasher(build_hasher: S) -> Self {
        Self {
            build_hasher,
            class: None,
            _marker: PhantomData,
        }
    }

    pub fn class(&self) -> Option<ObjectId> {
        self.class
    }
}

// SAFETY: every method reinterprets the pointer as `*T`, matching the
// layout reported by `Layout::new::<T>()`.
unsafe impl<T: Element, S: BuildHasher> TypeDescriptor for TypedDescriptor<T, S> {
    fn tag(&self) -> TypeTag {
        T::TAG
    }

    fn layout(&self) -> Layout {
        Layout::new::<T>()
    }

    fn rust_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn needs_destroy(&self) -> bool {
        core::mem::needs_drop::<T>()
    }

    unsafe fn construct(&self, dst: *mut u8) {
        // SAFETY: caller provides aligned, writable memory for a `T`.
        unsafe { dst.cast::<T>().write(T::default()) }
    }

    unsafe fn copy_construct(&self, dst: *mut u8, src: *const u8) {
        // SAFETY: `src` is a live `T`; `dst` is writable memory for a `T`.
        unsafe {
            let value = (*src.cast::<T>()).clone();
            dst.cast::<T>().write(value)
        }
    }

    unsafe fn copy_assign(&self, dst: *mut u8, src: *const u8) {
        // SAFETY: both point at live `T`s.
        unsafe {
            let value = (*src.cast::<T>()).clone();
            *dst.cast::<T>() = value;
        }
    }

    unsafe fn destroy(&self, ptr: *mut u8) {
        // SAFETY: `ptr` is a live `T` that is never read again.
        unsafe { ptr.cast::<T>().drop_in_place() }
    }

    unsafe fn hash(&self, ptr: *const u8) -> u64 {
        let mut state = self.build_hasher.build_hasher();
        // SAFETY: `ptr` is a live `T`.
        unsafe { (*ptr.cast::<T>()).element_hash(&mut state) };
        state.finish()
    }

    unsafe fn equals(&self, a: *const u8, b: *const u8) -> bool {
        // SAFETY: both point at live `T`s.
        unsafe { (*a.cast::<T>()).element_eq(&*b.cast::<T>()) }
    }

    fn is_collectible_reference(&self) -> bool {
        T::COLLECTIBLE
    }

    unsafe fn trace_and_maybe_clear(
        &self,
        ptr: *mut u8,
        collector: &mut dyn ReferenceCollector,
    ) -> bool {
        // SAFETY: `ptr` is a live `T` we have exclusive access to.
        unsafe { (*ptr.cast::<T>()).trace(collector) }
    }

    fn add_referenced_objects(&self, collector: &mut dyn ReferenceCollector) {
        if let Some(class) = self.class {
            collector.add_referenced_object(class);
        }
    }

    unsafe fn read_value(&self, ptr: *const u8) -> Value {
        // SAFETY: `ptr` is a live `T`.
        unsafe { (*ptr.cast::<T>()).to_value() }
    }

    unsafe fn write_value(&self, dst: *mut u8, value: &Value) -> Result<(), Error> {
        let adapted = T::from_value(value)?;
        // SAFETY: `dst` is a live `T`; assignment drops the old value.
        unsafe { *dst.cast::<T>() = adapted };
        Ok(())
    }
}

/// Build the descriptor for a declared element type. Object types need the
/// class the references are constrained to.
pub fn create_descriptor(tag: TypeTag, class: Option<ObjectId>) -> Result<DescriptorRef, Error> {
    let descriptor: DescriptorRef = match tag {
        TypeTag::Bool => TypedDescriptor::<bool>::shared(),
        TypeTag::Int => TypedDescriptor::<i32>::shared(),
        TypeTag::Int64 => TypedDescriptor::<i64>::shared(),
        TypeTag::Float => TypedDescriptor::<f32>::shared(),
        TypeTag::Double => TypedDescriptor::<f64>::shared(),
        TypeTag::Str => TypedDescriptor::<String>::shared(),
        TypeTag::Object => {
            let class = class.ok_or(Error::MissingObjectClass)?;
            Rc::new(TypedDescriptor::<Option<ObjectId>>::with_class(class))
        }
        TypeTag::Struct | TypeTag::Array | TypeTag::Delegate => {
            return Err(Error::UnsupportedElementType(tag.name().to_owned()))
        }
    };
    Ok(descriptor)
}
