use std::fmt;

use ahash::AHashMap;

use crate::Id;
use crate::errors::{HprofError, Result};
use crate::model::class::{ClassHandle, ClassUniverse, JavaClass};
use crate::parser::gc_record::{ArrayValue, FieldValue};

/// Element storage of an array instance.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayElements {
    Object(Vec<Id>),
    Primitive(ArrayValue),
}

impl ArrayElements {
    pub fn len(&self) -> usize {
        match self {
            ArrayElements::Object(ids) => ids.len(),
            ArrayElements::Primitive(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<FieldValue> {
        match self {
            ArrayElements::Object(ids) => ids.get(index).copied().map(FieldValue::Object),
            ArrayElements::Primitive(values) => values.get(index),
        }
    }
}

/// A materialised heap object: an instance or an array.
#[derive(Debug, Clone, PartialEq)]
pub struct JavaObject {
    pub(crate) id: Id,
    pub(crate) class: ClassHandle,
    pub(crate) stack_trace_serial_number: u32,
    pub(crate) heap: usize,
    /// Field values in chain order: the dynamic class's own fields first,
    /// then each superclass's, up the chain.
    pub(crate) values: Vec<FieldValue>,
    pub(crate) elements: Option<ArrayElements>,
}

impl JavaObject {
    pub fn id(&self) -> Id {
        self.id
    }
}

/// All instances and arrays of one dump, keyed by object id.
#[derive(Default)]
pub struct ObjectStore {
    pub(crate) objects: Vec<JavaObject>,
    by_id: AHashMap<u64, usize>,
}

impl ObjectStore {
    pub(crate) fn insert(&mut self, object: JavaObject) -> Result<usize> {
        let ix = self.objects.len();
        if self.by_id.insert(object.id.value(), ix).is_some() {
            return Err(HprofError::BadFormat(format!(
                "duplicate object id {:#x} within one dump",
                object.id.value()
            )));
        }
        self.objects.push(object);
        Ok(ix)
    }

    pub(crate) fn index_of(&self, id: Id) -> Option<usize> {
        self.by_id.get(&id.value()).copied()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RefKind {
    Instance { index: usize, viewed: ClassHandle },
    Class(ClassHandle),
}

/// A reference to a heap object or class object, possibly narrowed.
///
/// Narrowing changes where field resolution starts, not the identity of the
/// referent: a narrowed reference compares equal to the plain one. A
/// reference is flat, casting an already narrowed reference re-narrows the
/// original target.
#[derive(Clone, Copy)]
pub struct ObjRef<'s> {
    universe: &'s ClassUniverse,
    store: &'s ObjectStore,
    kind: RefKind,
}

/// Narrows `target` to a supertype view, see [`ObjRef::cast`].
pub fn cast<'s>(target: ObjRef<'s>, declared: Option<&JavaClass>) -> Result<ObjRef<'s>> {
    target.cast(declared)
}

impl<'s> ObjRef<'s> {
    pub(crate) fn instance(
        universe: &'s ClassUniverse,
        store: &'s ObjectStore,
        index: usize,
    ) -> ObjRef<'s> {
        let viewed = store.objects[index].class;
        ObjRef {
            universe,
            store,
            kind: RefKind::Instance { index, viewed },
        }
    }

    pub(crate) fn class_object(
        universe: &'s ClassUniverse,
        store: &'s ObjectStore,
        handle: ClassHandle,
    ) -> ObjRef<'s> {
        ObjRef {
            universe,
            store,
            kind: RefKind::Class(handle),
        }
    }

    pub fn id(&self) -> Id {
        match self.kind {
            RefKind::Instance { index, .. } => self.store.objects[index].id,
            RefKind::Class(handle) => self.universe.class(handle).class_object_id(),
        }
    }

    /// True when this references a class object rather than an instance.
    pub fn is_class_object(&self) -> bool {
        matches!(self.kind, RefKind::Class(_))
    }

    /// The class this reference views; for class objects, the class itself.
    pub fn viewed_class(&self) -> &'s JavaClass {
        match self.kind {
            RefKind::Instance { viewed, .. } => self.universe.class(viewed),
            RefKind::Class(handle) => self.universe.class(handle),
        }
    }

    /// The referent's concrete class, regardless of narrowing.
    pub fn dynamic_class(&self) -> &'s JavaClass {
        match self.kind {
            RefKind::Instance { index, .. } => {
                self.universe.class(self.store.objects[index].class)
            }
            RefKind::Class(handle) => self.universe.class(handle),
        }
    }

    pub fn is_array(&self) -> bool {
        match self.kind {
            RefKind::Instance { index, .. } => self.store.objects[index].elements.is_some(),
            RefKind::Class(_) => false,
        }
    }

    pub fn is_instance_of(&self, class: &JavaClass) -> bool {
        match self.kind {
            RefKind::Instance { index, .. } => self
                .universe
                .is_supertype(class.handle(), self.store.objects[index].class),
            RefKind::Class(_) => self.universe.is_universal_for_class_objects(class.handle()),
        }
    }

    /// Narrows this reference to a supertype of the referent.
    ///
    /// `None` (or the dynamic class itself) hands back the plain reference;
    /// class objects are never narrowed; anything that is not a supertype
    /// is a type error. Field lookup through the narrowed reference starts
    /// the chain walk at the declared class, which is how a shadowed
    /// superclass field is reached.
    pub fn cast(&self, declared: Option<&JavaClass>) -> Result<ObjRef<'s>> {
        match self.kind {
            RefKind::Class(handle) => match declared {
                None => Ok(*self),
                Some(d) if self.universe.is_universal_for_class_objects(d.handle()) => Ok(*self),
                Some(d) => Err(HprofError::TypeError(format!(
                    "class object {} is not an instance of {}",
                    self.universe.class(handle).name(),
                    d.name()
                ))),
            },
            RefKind::Instance { index, .. } => {
                let dynamic = self.store.objects[index].class;
                let viewed = match declared {
                    None => dynamic,
                    Some(d) if d.handle() == dynamic => dynamic,
                    Some(d) if self.universe.is_supertype(d.handle(), dynamic) => d.handle(),
                    Some(d) => {
                        return Err(HprofError::TypeError(format!(
                            "{} is not an instance of {}",
                            self.universe.class(dynamic).name(),
                            d.name()
                        )));
                    }
                };
                Ok(ObjRef {
                    kind: RefKind::Instance { index, viewed },
                    ..*self
                })
            }
        }
    }

    /// Looks `name` up from the viewed class upwards: instance fields
    /// first, then statics, then the superclass.
    pub fn field(&self, name: &str) -> Result<FieldValue> {
        match self.kind {
            RefKind::Class(handle) => {
                let mut current = Some(handle);
                while let Some(h) = current {
                    let class = self.universe.class(h);
                    if let Some(value) = class.static_field(name) {
                        return Ok(value);
                    }
                    current = class.super_class();
                }
                Err(HprofError::NoSuchField {
                    class: self.universe.class(handle).name().to_string(),
                    field: name.to_string(),
                })
            }
            RefKind::Instance { index, viewed } => {
                let object = &self.store.objects[index];
                // values are stored in chain order from the dynamic class,
                // so the walk starts with the viewed class's slot offset
                let mut offset = 0;
                let mut current = object.class;
                while current != viewed {
                    let class = self.universe.class(current);
                    offset += class.instance_fields().len();
                    match class.super_class() {
                        Some(s) => current = s,
                        None => {
                            return Err(HprofError::TypeError(format!(
                                "{} does not appear on the chain of {}",
                                self.universe.class(viewed).name(),
                                self.universe.class(object.class).name()
                            )));
                        }
                    }
                }
                let mut current = Some(viewed);
                while let Some(h) = current {
                    let class = self.universe.class(h);
                    if let Some(slot) = class.slot(name) {
                        return Ok(object.values[offset + slot]);
                    }
                    if let Some(value) = class.static_field(name) {
                        return Ok(value);
                    }
                    offset += class.instance_fields().len();
                    current = class.super_class();
                }
                Err(HprofError::NoSuchField {
                    class: self.universe.class(object.class).name().to_string(),
                    field: name.to_string(),
                })
            }
        }
    }

    fn array_elements(&self) -> Result<&'s ArrayElements> {
        match self.kind {
            RefKind::Instance { index, .. } => self.store.objects[index]
                .elements
                .as_ref()
                .ok_or_else(|| {
                    HprofError::TypeError(format!(
                        "{} object is not an array",
                        self.dynamic_class().name()
                    ))
                }),
            RefKind::Class(handle) => Err(HprofError::TypeError(format!(
                "class object {} is not an array",
                self.universe.class(handle).name()
            ))),
        }
    }

    /// Number of elements; a type error on anything but an array.
    pub fn length(&self) -> Result<usize> {
        self.array_elements().map(ArrayElements::len)
    }

    /// Element at `index`; a type error on anything but an array.
    pub fn element(&self, index: usize) -> Result<FieldValue> {
        let elements = self.array_elements()?;
        elements.get(index).ok_or_else(|| {
            HprofError::OutOfBounds(format!(
                "index {index} out of range for array of length {}",
                elements.len()
            ))
        })
    }
}

impl PartialEq for ObjRef<'_> {
    /// Equality delegates to the referent; narrowing is not identity.
    fn eq(&self, other: &Self) -> bool {
        if !std::ptr::eq(self.store, other.store) || !std::ptr::eq(self.universe, other.universe) {
            return false;
        }
        match (self.kind, other.kind) {
            (RefKind::Instance { index: a, .. }, RefKind::Instance { index: b, .. }) => a == b,
            (RefKind::Class(a), RefKind::Class(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ObjRef<'_> {}

impl fmt::Debug for ObjRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RefKind::Instance { index, viewed } => {
                let object = &self.store.objects[index];
                let dynamic = self.universe.class(object.class);
                if viewed == object.class {
                    write!(f, "<{} {:#x}>", dynamic.name(), object.id.value())
                } else {
                    write!(
                        f,
                        "<{} {:#x} viewed as {}>",
                        dynamic.name(),
                        object.id.value(),
                        self.universe.class(viewed).name()
                    )
                }
            }
            RefKind::Class(handle) => {
                write!(f, "<class {}>", self.universe.class(handle).name())
            }
        }
    }
}
