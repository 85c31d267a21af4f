use std::cell::OnceCell;

use ahash::AHashMap;
use tracing::debug;

use crate::errors::{HprofError, Result};
use crate::index::DumpSpan;
use crate::model::class::{ClassHandle, ClassUniverse, FieldDecl, JavaClass, parse_internal_name};
use crate::model::object::{ArrayElements, JavaObject, ObjRef, ObjectStore};
use crate::parser::gc_record::{
    ClassDump, FieldValue, GcRoot, InstanceDump, ObjectArrayDump, PrimitiveArrayDump, SubRecord,
};
use crate::parser::gc_record_parser::{SubRecords, parse_field_value};
use crate::parser::primitive_parsers::IdSize;
use crate::{HprofFile, Id};

const DEFAULT_HEAP: &str = "default";

/// One logical heap dump: the consecutive heap dump segments up to a heap
/// dump end record.
///
/// The class and object graph is materialised on first use and lives as
/// long as the dump.
pub struct Dump<'a> {
    file: &'a HprofFile,
    span: DumpSpan,
    snapshot: OnceCell<Snapshot>,
}

impl<'a> Dump<'a> {
    pub(crate) fn new(file: &'a HprofFile, span: DumpSpan) -> Dump<'a> {
        Dump {
            file,
            span,
            snapshot: OnceCell::new(),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.span.segments.len()
    }

    fn snapshot(&self) -> Result<&Snapshot> {
        if let Some(snapshot) = self.snapshot.get() {
            return Ok(snapshot);
        }
        let snapshot = Snapshot::build(self.file, &self.span)?;
        Ok(self.snapshot.get_or_init(|| snapshot))
    }

    /// The named heaps of this dump, in discovery order.
    pub fn heaps(&self) -> Result<impl Iterator<Item = HeapView<'_>>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot
            .heaps
            .iter()
            .enumerate()
            .map(move |(index, heap)| HeapView {
                snapshot,
                heap,
                index,
            }))
    }

    pub fn heap(&self, name: &str) -> Result<Option<HeapView<'_>>> {
        Ok(self.heaps()?.find(|heap| heap.name() == name))
    }

    /// Looks an object or class object up by id, across all heaps.
    pub fn by_id(&self, id: Id) -> Result<ObjRef<'_>> {
        self.snapshot()?.by_id(id)
    }

    /// GC roots in file order.
    pub fn gc_roots(&self) -> Result<&[GcRoot]> {
        Ok(&self.snapshot()?.roots)
    }

    pub fn classes(&self) -> Result<impl Iterator<Item = &JavaClass>> {
        Ok(self.snapshot()?.universe.iter())
    }

    pub fn class_by_name(&self, dotted: &str) -> Result<Option<&JavaClass>> {
        Ok(self.snapshot()?.universe.by_name(dotted))
    }

    /// The package / class-name tree over every class of this dump.
    pub fn universe(&self) -> Result<&ClassUniverse> {
        Ok(&self.snapshot()?.universe)
    }
}

#[derive(Clone, Copy)]
enum Member {
    Object(usize),
    Class(ClassHandle),
}

/// A named partition of the objects in a dump.
pub struct Heap {
    name: String,
    members: Vec<Member>,
}

/// A heap together with the snapshot it belongs to.
#[derive(Clone, Copy)]
pub struct HeapView<'s> {
    snapshot: &'s Snapshot,
    heap: &'s Heap,
    index: usize,
}

impl<'s> HeapView<'s> {
    pub fn name(&self) -> &'s str {
        &self.heap.name
    }

    pub fn object_count(&self) -> usize {
        self.heap.members.len()
    }

    /// Objects and class objects of this heap, in discovery order.
    pub fn objects(self) -> impl Iterator<Item = ObjRef<'s>> {
        let snapshot = self.snapshot;
        self.heap.members.iter().map(move |member| match member {
            Member::Object(index) => ObjRef::instance(&snapshot.universe, &snapshot.store, *index),
            Member::Class(handle) => {
                ObjRef::class_object(&snapshot.universe, &snapshot.store, *handle)
            }
        })
    }

    /// Looks an id up within this heap only.
    pub fn by_id(self, id: Id) -> Result<ObjRef<'s>> {
        let object = self.snapshot.by_id(id)?;
        let here = if object.is_class_object() {
            self.snapshot.class_heaps.get(&id.value()) == Some(&self.index)
        } else {
            self.snapshot
                .store
                .index_of(id)
                .is_some_and(|ix| self.snapshot.store.objects[ix].heap == self.index)
        };
        if here {
            Ok(object)
        } else {
            Err(HprofError::RefError {
                kind: "object",
                id: id.value(),
            })
        }
    }
}

/// The materialised class and object graph of one dump.
pub(crate) struct Snapshot {
    universe: ClassUniverse,
    store: ObjectStore,
    heaps: Vec<Heap>,
    class_heaps: AHashMap<u64, usize>,
    roots: Vec<GcRoot>,
}

/// Subrecords queued during the collect pass, waiting for the class pass.
enum Pending<'a> {
    Class(u64),
    Instance(InstanceDump<'a>),
    ObjectArray(ObjectArrayDump),
    PrimitiveArray(PrimitiveArrayDump),
}

impl Snapshot {
    fn by_id(&self, id: Id) -> Result<ObjRef<'_>> {
        if let Some(index) = self.store.index_of(id) {
            return Ok(ObjRef::instance(&self.universe, &self.store, index));
        }
        if let Some(handle) = self.universe.by_object_id(id) {
            return Ok(ObjRef::class_object(&self.universe, &self.store, handle));
        }
        Err(HprofError::RefError {
            kind: "object",
            id: id.value(),
        })
    }

    /// Two passes over the dump's subrecords: every class dump is
    /// registered first (supers before subclasses, so field offsets are
    /// known), then instances and arrays decode against the schemas.
    fn build(file: &HprofFile, span: &DumpSpan) -> Result<Snapshot> {
        let data = file.source_bytes()?;
        let id_size = file.id_size();

        let mut class_dumps: AHashMap<u64, ClassDump> = AHashMap::new();
        let mut pending: Vec<(usize, Pending<'_>)> = Vec::new();
        let mut heaps = vec![Heap {
            name: DEFAULT_HEAP.to_string(),
            members: Vec::new(),
        }];
        let mut heap_indices: AHashMap<String, usize> =
            AHashMap::from_iter([(DEFAULT_HEAP.to_string(), 0)]);
        let mut current_heap = 0;
        let mut roots = Vec::new();

        for segment in &span.segments {
            let body = &data[segment.body_start..segment.body_start + segment.body_len];
            for sub_record in SubRecords::new(body, segment.body_start, id_size) {
                match sub_record? {
                    SubRecord::GcRoot(root) => roots.push(root),
                    SubRecord::HeapDumpInfo { heap_name_id, .. } => {
                        let name = file.name(heap_name_id)?.text;
                        current_heap = match heap_indices.get(name) {
                            Some(index) => *index,
                            None => {
                                heaps.push(Heap {
                                    name: name.to_string(),
                                    members: Vec::new(),
                                });
                                heap_indices.insert(name.to_string(), heaps.len() - 1);
                                heaps.len() - 1
                            }
                        };
                    }
                    SubRecord::ClassDump(class_dump) => {
                        let class_id = class_dump.class_object_id.value();
                        if class_dumps.insert(class_id, class_dump).is_some() {
                            return Err(HprofError::BadFormat(format!(
                                "duplicate class dump for id {class_id:#x}"
                            )));
                        }
                        pending.push((current_heap, Pending::Class(class_id)));
                    }
                    SubRecord::InstanceDump(dump) => {
                        pending.push((current_heap, Pending::Instance(dump)));
                    }
                    SubRecord::ObjectArrayDump(dump) => {
                        pending.push((current_heap, Pending::ObjectArray(dump)));
                    }
                    SubRecord::PrimitiveArrayDump(dump) => {
                        pending.push((current_heap, Pending::PrimitiveArray(dump)));
                    }
                }
            }
        }

        let mut universe = ClassUniverse::new();
        let mut building = Vec::new();
        for (_, entry) in &pending {
            if let Pending::Class(class_id) = entry {
                register_class(file, &mut universe, &class_dumps, *class_id, &mut building)?;
            }
        }

        let mut store = ObjectStore::default();
        let mut class_heaps = AHashMap::new();
        for (heap_index, entry) in pending {
            match entry {
                Pending::Class(class_id) => {
                    if let Some(handle) = universe.by_object_id(Id::from(class_id)) {
                        heaps[heap_index].members.push(Member::Class(handle));
                        class_heaps.insert(class_id, heap_index);
                    }
                }
                Pending::Instance(dump) => {
                    let handle = universe.by_object_id(dump.class_object_id).ok_or_else(|| {
                        HprofError::ClassNotFound(format!(
                            "class id {:#x} referenced by instance {:#x}",
                            dump.class_object_id.value(),
                            dump.object_id.value()
                        ))
                    })?;
                    let values = decode_instance(&universe, handle, &dump, id_size)?;
                    let index = store.insert(JavaObject {
                        id: dump.object_id,
                        class: handle,
                        stack_trace_serial_number: dump.stack_trace_serial_number,
                        heap: heap_index,
                        values,
                        elements: None,
                    })?;
                    heaps[heap_index].members.push(Member::Object(index));
                }
                Pending::ObjectArray(dump) => {
                    let handle = universe.by_object_id(dump.array_class_id).ok_or_else(|| {
                        HprofError::ClassNotFound(format!(
                            "class id {:#x} referenced by array {:#x}",
                            dump.array_class_id.value(),
                            dump.object_id.value()
                        ))
                    })?;
                    let index = store.insert(JavaObject {
                        id: dump.object_id,
                        class: handle,
                        stack_trace_serial_number: dump.stack_trace_serial_number,
                        heap: heap_index,
                        values: Vec::new(),
                        elements: Some(ArrayElements::Object(dump.elements)),
                    })?;
                    heaps[heap_index].members.push(Member::Object(index));
                }
                Pending::PrimitiveArray(dump) => {
                    let handle = universe.primitive_array_class(dump.elements.element_type())?;
                    let index = store.insert(JavaObject {
                        id: dump.object_id,
                        class: handle,
                        stack_trace_serial_number: dump.stack_trace_serial_number,
                        heap: heap_index,
                        values: Vec::new(),
                        elements: Some(ArrayElements::Primitive(dump.elements)),
                    })?;
                    heaps[heap_index].members.push(Member::Object(index));
                }
            }
        }

        // heaps that never received an object carry no information
        let empty: Vec<usize> = heaps
            .iter()
            .enumerate()
            .filter(|(_, heap)| heap.members.is_empty())
            .map(|(ix, _)| ix)
            .collect();
        if !empty.is_empty() {
            remove_heaps(&mut heaps, &mut store, &mut class_heaps, &empty);
        }

        debug!(
            classes = universe.class_count(),
            objects = store.len(),
            heaps = heaps.len(),
            roots = roots.len(),
            "materialised heap dump"
        );
        Ok(Snapshot {
            universe,
            store,
            heaps,
            class_heaps,
            roots,
        })
    }
}

/// Drops the heaps at `removed` (all empty), renumbering heap indices.
fn remove_heaps(
    heaps: &mut Vec<Heap>,
    store: &mut ObjectStore,
    class_heaps: &mut AHashMap<u64, usize>,
    removed: &[usize],
) {
    let mut renumber = vec![0usize; heaps.len()];
    let mut next = 0;
    for ix in 0..heaps.len() {
        renumber[ix] = next;
        if !removed.contains(&ix) {
            next += 1;
        }
    }
    let mut ix = 0;
    heaps.retain(|_| {
        let keep = !removed.contains(&ix);
        ix += 1;
        keep
    });
    for object in &mut store.objects {
        object.heap = renumber[object.heap];
    }
    for heap_index in class_heaps.values_mut() {
        *heap_index = renumber[*heap_index];
    }
}

/// Registers the class with `class_id`, registering its superclasses first.
fn register_class(
    file: &HprofFile,
    universe: &mut ClassUniverse,
    class_dumps: &AHashMap<u64, ClassDump>,
    class_id: u64,
    building: &mut Vec<u64>,
) -> Result<ClassHandle> {
    if let Some(handle) = universe.by_object_id(Id::from(class_id)) {
        return Ok(handle);
    }
    let dump = class_dumps
        .get(&class_id)
        .ok_or_else(|| HprofError::ClassNotFound(format!("class id {class_id:#x}")))?;
    if building.contains(&class_id) {
        return Err(HprofError::BadFormat(format!(
            "class hierarchy cycle involving id {class_id:#x}"
        )));
    }
    building.push(class_id);
    let super_class = match dump.super_class_object_id.value() {
        0 => None,
        super_id => Some(register_class(
            file,
            universe,
            class_dumps,
            super_id,
            building,
        )?),
    };
    building.pop();

    let load = file.class_info_by_id(Id::from(class_id))?;
    let parsed = parse_internal_name(file.name(load.class_name_id)?.text)?;
    let instance_fields = dump
        .instance_fields
        .iter()
        .map(|field| {
            Ok(FieldDecl {
                name: file.name(field.name_id)?.text.to_string(),
                field_type: field.field_type,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let static_fields = dump
        .static_fields
        .iter()
        .map(|(field, value)| Ok((file.name(field.name_id)?.text.to_string(), *value)))
        .collect::<Result<Vec<_>>>()?;

    universe.add_class(
        &parsed,
        dump.class_object_id,
        super_class,
        dump.instance_size,
        instance_fields,
        static_fields,
    )
}

/// Decodes an instance's field bytes against its class chain.
///
/// The declared data length must match the chain's schema exactly.
fn decode_instance(
    universe: &ClassUniverse,
    handle: ClassHandle,
    dump: &InstanceDump<'_>,
    id_size: IdSize,
) -> Result<Vec<FieldValue>> {
    let mut values = Vec::new();
    let mut rest = dump.data;
    let mut current = Some(handle);
    while let Some(h) = current {
        let class = universe.class(h);
        for field in class.instance_fields() {
            let (r, value) = parse_field_value(field.field_type, id_size)(rest).map_err(|_| {
                HprofError::BadFormat(format!(
                    "instance {:#x} carries less field data than the schema of {}",
                    dump.object_id.value(),
                    class.name()
                ))
            })?;
            rest = r;
            values.push(value);
        }
        current = class.super_class();
    }
    if !rest.is_empty() {
        return Err(HprofError::BadFormat(format!(
            "instance {:#x} carries {} bytes of field data, its class chain accounts for {}",
            dump.object_id.value(),
            dump.data.len(),
            dump.data.len() - rest.len()
        )));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{
        Builder, Bytes, class_dump, heap_dump_info, instance_dump, object_array_dump,
        primitive_array_dump,
    };
    use crate::{HprofFile, cast};

    const INT: u8 = 10;

    /// One class with one int field and one instance holding 0xDEADBEEF.
    fn single_instance_file(id_size: usize) -> HprofFile {
        let mut builder = Builder::new(id_size);
        builder.name(0x64, "com/Ex");
        builder.load_class(1, 0x1000, 0, 0x64);
        let mut body = Bytes::new(id_size);
        body.add(&class_dump(id_size, 0x1000, 0, 4, &[], &[(0x64, INT)]));
        body.add(&instance_dump(
            id_size,
            0x2000,
            0x1000,
            &0xDEAD_BEEF_u32.to_be_bytes(),
        ));
        builder.segment(body.bytes());
        builder.end_of_dump();
        HprofFile::from_bytes(builder.build()).unwrap()
    }

    /// A with field x and static s, B extends A shadowing x.
    fn shadowed_field_file() -> HprofFile {
        let id_size = 4;
        let mut builder = Builder::new(id_size);
        builder.name(0x10, "A");
        builder.name(0x11, "B");
        builder.name(0x12, "x");
        builder.name(0x13, "s");
        builder.load_class(1, 0x1000, 0, 0x10);
        builder.load_class(2, 0x1100, 0, 0x11);
        let mut body = Bytes::new(id_size);
        body.add(&class_dump(
            id_size,
            0x1000,
            0,
            4,
            &[(0x13, INT, &7u32.to_be_bytes())],
            &[(0x12, INT)],
        ));
        body.add(&class_dump(id_size, 0x1100, 0x1000, 8, &[], &[(0x12, INT)]));
        // B's own x first, then the inherited A.x
        let mut data = Vec::new();
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        body.add(&instance_dump(id_size, 0x2000, 0x1100, &data));
        body.add(&instance_dump(id_size, 0x2001, 0x1000, &9u32.to_be_bytes()));
        builder.segment(body.bytes());
        builder.end_of_dump();
        HprofFile::from_bytes(builder.build()).unwrap()
    }

    #[test]
    fn instance_field_is_decoded_as_signed_int() {
        let file = single_instance_file(4);
        let dumps = file.dumps().unwrap();
        assert_eq!(dumps.len(), 1);
        let object = dumps[0].by_id(crate::Id::from(0x2000)).unwrap();
        assert_eq!(object.field("com/Ex").unwrap(), FieldValue::Int(-559_038_737));
        assert_eq!(object.dynamic_class().name(), "com.Ex");
        assert!(!object.is_array());
    }

    #[test]
    fn heap_iteration_includes_the_class_object() {
        let file = single_instance_file(4);
        let dumps = file.dumps().unwrap();
        let heaps: Vec<_> = dumps[0].heaps().unwrap().collect();
        assert_eq!(heaps.len(), 1);
        assert_eq!(heaps[0].name(), "default");
        let objects: Vec<_> = heaps[0].objects().collect();
        assert_eq!(objects.len(), 2);
        assert!(objects[0].is_class_object());
        assert_eq!(objects[1].id(), crate::Id::from(0x2000));
        assert_eq!(heaps[0].by_id(crate::Id::from(0x2000)).unwrap(), objects[1]);
    }

    #[test]
    fn identical_structure_for_any_id_size() {
        for id_size in [3, 4, 5] {
            let file = single_instance_file(id_size);
            let dumps = file.dumps().unwrap();
            let object = dumps[0].by_id(crate::Id::from(0x2000)).unwrap();
            assert_eq!(
                object.field("com/Ex").unwrap(),
                FieldValue::Int(-559_038_737),
                "id size {id_size}"
            );
            assert_eq!(object.dynamic_class().name(), "com.Ex");
            assert_eq!(file.name(crate::Id::from(0x64)).unwrap().text, "com/Ex");
        }
    }

    #[test]
    fn narrowing_reaches_the_shadowed_field() {
        let file = shadowed_field_file();
        let dumps = file.dumps().unwrap();
        let dump = &dumps[0];
        let object = dump.by_id(crate::Id::from(0x2000)).unwrap();
        let class_a = dump.class_by_name("A").unwrap().unwrap();

        assert_eq!(object.field("x").unwrap(), FieldValue::Int(2));
        let narrowed = cast(object, Some(class_a)).unwrap();
        assert_eq!(narrowed.field("x").unwrap(), FieldValue::Int(1));
        // narrowing does not change identity
        assert_eq!(narrowed, object);
    }

    #[test]
    fn cast_is_idempotent_and_identity_on_dynamic_type() {
        let file = shadowed_field_file();
        let dumps = file.dumps().unwrap();
        let dump = &dumps[0];
        let object = dump.by_id(crate::Id::from(0x2000)).unwrap();
        let class_a = dump.class_by_name("A").unwrap().unwrap();
        let class_b = dump.class_by_name("B").unwrap().unwrap();

        let once = cast(object, Some(class_a)).unwrap();
        let twice = cast(once, Some(class_a)).unwrap();
        assert_eq!(once.viewed_class().name(), twice.viewed_class().name());
        assert_eq!(once.field("x").unwrap(), twice.field("x").unwrap());

        let same = cast(object, Some(class_b)).unwrap();
        assert_eq!(same.viewed_class().name(), "B");
        let plain = cast(once, None).unwrap();
        assert_eq!(plain.field("x").unwrap(), FieldValue::Int(2));
    }

    #[test]
    fn cast_to_non_supertype_is_a_type_error() {
        let file = shadowed_field_file();
        let dumps = file.dumps().unwrap();
        let dump = &dumps[0];
        let class_b = dump.class_by_name("B").unwrap().unwrap();
        // an instance of A cannot be viewed as its subclass B
        let a_instance = dump.by_id(crate::Id::from(0x2001)).unwrap();
        assert_eq!(a_instance.dynamic_class().name(), "A");
        assert!(matches!(
            cast(a_instance, Some(class_b)),
            Err(HprofError::TypeError(_))
        ));
        // and the class object of A is not an instance of B either
        let a_class_object = dump.by_id(crate::Id::from(0x1000)).unwrap();
        assert!(a_class_object.is_class_object());
        assert!(matches!(
            cast(a_class_object, Some(class_b)),
            Err(HprofError::TypeError(_))
        ));
    }

    #[test]
    fn statics_resolve_through_instances_and_class_objects() {
        let file = shadowed_field_file();
        let dumps = file.dumps().unwrap();
        let dump = &dumps[0];
        let object = dump.by_id(crate::Id::from(0x2000)).unwrap();
        assert_eq!(object.field("s").unwrap(), FieldValue::Int(7));

        let class_object = dump.by_id(crate::Id::from(0x1000)).unwrap();
        assert!(class_object.is_class_object());
        assert_eq!(class_object.field("s").unwrap(), FieldValue::Int(7));
        assert!(matches!(
            class_object.field("x"),
            Err(HprofError::NoSuchField { .. })
        ));
    }

    #[test]
    fn missing_field_names_the_class() {
        let file = shadowed_field_file();
        let dumps = file.dumps().unwrap();
        let object = dumps[0].by_id(crate::Id::from(0x2000)).unwrap();
        match object.field("y") {
            Err(HprofError::NoSuchField { class, field }) => {
                assert_eq!(class, "B");
                assert_eq!(field, "y");
            }
            other => panic!("expected NoSuchField, got {other:?}"),
        }
    }

    #[test]
    fn class_objects_are_instances_of_object_and_class_only() {
        let id_size = 4;
        let mut builder = Builder::new(id_size);
        builder.name(0x20, "java/lang/Object");
        builder.name(0x21, "A");
        builder.load_class(1, 0x1000, 0, 0x20);
        builder.load_class(2, 0x1100, 0, 0x21);
        let mut body = Bytes::new(id_size);
        body.add(&class_dump(id_size, 0x1000, 0, 0, &[], &[]));
        body.add(&class_dump(id_size, 0x1100, 0x1000, 0, &[], &[]));
        builder.segment(body.bytes());
        builder.end_of_dump();
        let file = HprofFile::from_bytes(builder.build()).unwrap();
        let dumps = file.dumps().unwrap();
        let dump = &dumps[0];

        let object_class = dump.class_by_name("java.lang.Object").unwrap().unwrap();
        let class_a = dump.class_by_name("A").unwrap().unwrap();
        let a_class_object = dump.by_id(crate::Id::from(0x1100)).unwrap();

        assert!(a_class_object.is_instance_of(object_class));
        assert!(!a_class_object.is_instance_of(class_a));
        // casting a class object to a universal type hands it back unchanged
        let recast = cast(a_class_object, Some(object_class)).unwrap();
        assert_eq!(recast, a_class_object);
        assert!(recast.is_class_object());
    }

    #[test]
    fn object_and_primitive_arrays() {
        let id_size = 4;
        let mut builder = Builder::new(id_size);
        builder.name(0x64, "com/Ex");
        builder.name(0x65, "[Lcom/Ex;");
        builder.load_class(1, 0x1000, 0, 0x64);
        builder.load_class(2, 0x1200, 0, 0x65);
        let mut body = Bytes::new(id_size);
        body.add(&class_dump(id_size, 0x1000, 0, 4, &[], &[(0x64, INT)]));
        body.add(&class_dump(id_size, 0x1200, 0, 0, &[], &[]));
        body.add(&instance_dump(
            id_size,
            0x2000,
            0x1000,
            &1u32.to_be_bytes(),
        ));
        body.add(&object_array_dump(id_size, 0x3000, 0x1200, &[0x2000, 0]));
        body.add(&primitive_array_dump(
            id_size,
            0x4000,
            INT,
            3,
            &[0, 0, 0, 1, 0, 0, 0, 2, 0xFF, 0xFF, 0xFF, 0xFF],
        ));
        builder.segment(body.bytes());
        builder.end_of_dump();
        let file = HprofFile::from_bytes(builder.build()).unwrap();
        let dumps = file.dumps().unwrap();
        let dump = &dumps[0];

        let array = dump.by_id(crate::Id::from(0x3000)).unwrap();
        assert!(array.is_array());
        assert_eq!(array.dynamic_class().name(), "com.Ex[]");
        assert!(array.dynamic_class().is_array());
        assert_eq!(array.length().unwrap(), 2);
        assert_eq!(
            array.element(0).unwrap(),
            FieldValue::Object(crate::Id::from(0x2000))
        );
        assert_eq!(
            array.element(1).unwrap(),
            FieldValue::Object(crate::Id::from(0))
        );
        assert!(matches!(
            array.element(2),
            Err(HprofError::OutOfBounds(_))
        ));

        let ints = dump.by_id(crate::Id::from(0x4000)).unwrap();
        assert_eq!(ints.dynamic_class().name(), "int[]");
        assert_eq!(ints.length().unwrap(), 3);
        assert_eq!(ints.element(2).unwrap(), FieldValue::Int(-1));

        let plain = dump.by_id(crate::Id::from(0x2000)).unwrap();
        assert!(matches!(plain.length(), Err(HprofError::TypeError(_))));
        assert!(matches!(plain.element(0), Err(HprofError::TypeError(_))));
    }

    #[test]
    fn heap_dump_info_partitions_objects() {
        let id_size = 4;
        let mut builder = Builder::new(id_size);
        builder.name(0x64, "com/Ex");
        builder.name(0x70, "app");
        builder.name(0x71, "zygote");
        builder.load_class(1, 0x1000, 0, 0x64);
        let mut body = Bytes::new(id_size);
        body.add(&heap_dump_info(id_size, 1, 0x70));
        body.add(&class_dump(id_size, 0x1000, 0, 4, &[], &[(0x64, INT)]));
        body.add(&instance_dump(id_size, 0x2000, 0x1000, &1u32.to_be_bytes()));
        body.add(&heap_dump_info(id_size, 2, 0x71));
        body.add(&instance_dump(id_size, 0x2001, 0x1000, &2u32.to_be_bytes()));
        builder.segment(body.bytes());
        builder.end_of_dump();
        let file = HprofFile::from_bytes(builder.build()).unwrap();
        let dumps = file.dumps().unwrap();
        let dump = &dumps[0];

        let names: Vec<_> = dump.heaps().unwrap().map(|h| h.name().to_string()).collect();
        // the unused default heap is dropped
        assert_eq!(names, ["app", "zygote"]);

        let app = dump.heap("app").unwrap().unwrap();
        let zygote = dump.heap("zygote").unwrap().unwrap();
        assert_eq!(app.object_count(), 2); // class object + instance
        assert_eq!(zygote.object_count(), 1);
        assert!(app.by_id(crate::Id::from(0x2000)).is_ok());
        assert!(matches!(
            app.by_id(crate::Id::from(0x2001)),
            Err(HprofError::RefError { .. })
        ));
        assert!(zygote.by_id(crate::Id::from(0x2001)).is_ok());
        // dump-wide lookup sees both
        assert!(dump.by_id(crate::Id::from(0x2001)).is_ok());
    }

    #[test]
    fn gc_roots_are_collected_in_order() {
        let id_size = 4;
        let mut builder = Builder::new(id_size);
        builder.name(0x64, "com/Ex");
        builder.load_class(1, 0x1000, 0, 0x64);
        let mut body = Bytes::new(id_size);
        let mut roots = Bytes::new(id_size);
        roots.u1(0xFF).id(0x2000);
        roots.u1(0x05).id(0x1000);
        body.add(roots.bytes());
        body.add(&class_dump(id_size, 0x1000, 0, 4, &[], &[(0x64, INT)]));
        body.add(&instance_dump(id_size, 0x2000, 0x1000, &1u32.to_be_bytes()));
        builder.segment(body.bytes());
        builder.end_of_dump();
        let file = HprofFile::from_bytes(builder.build()).unwrap();
        let dumps = file.dumps().unwrap();
        assert_eq!(
            dumps[0].gc_roots().unwrap(),
            &[
                GcRoot::Unknown {
                    object_id: crate::Id::from(0x2000)
                },
                GcRoot::StickyClass {
                    object_id: crate::Id::from(0x1000)
                },
            ]
        );
    }

    #[test]
    fn instance_with_unknown_class_is_class_not_found() {
        let id_size = 4;
        let mut builder = Builder::new(id_size);
        let mut body = Bytes::new(id_size);
        body.add(&instance_dump(id_size, 0x2000, 0x1000, &[]));
        builder.segment(body.bytes());
        builder.end_of_dump();
        let file = HprofFile::from_bytes(builder.build()).unwrap();
        let dumps = file.dumps().unwrap();
        assert!(matches!(
            dumps[0].heaps(),
            Err(HprofError::ClassNotFound(_))
        ));
    }

    #[test]
    fn class_dump_without_load_record_is_class_not_found() {
        let id_size = 4;
        let mut builder = Builder::new(id_size);
        let mut body = Bytes::new(id_size);
        body.add(&class_dump(id_size, 0x1000, 0, 0, &[], &[]));
        builder.segment(body.bytes());
        builder.end_of_dump();
        let file = HprofFile::from_bytes(builder.build()).unwrap();
        let dumps = file.dumps().unwrap();
        assert!(matches!(
            dumps[0].heaps(),
            Err(HprofError::ClassNotFound(_))
        ));
    }

    #[test]
    fn instance_data_length_mismatch_is_bad_format() {
        let id_size = 4;
        let mut builder = Builder::new(id_size);
        builder.name(0x64, "com/Ex");
        builder.load_class(1, 0x1000, 0, 0x64);
        let mut body = Bytes::new(id_size);
        body.add(&class_dump(id_size, 0x1000, 0, 4, &[], &[(0x64, INT)]));
        // five data bytes against a four byte schema
        body.add(&instance_dump(id_size, 0x2000, 0x1000, &[0, 0, 0, 1, 9]));
        builder.segment(body.bytes());
        builder.end_of_dump();
        let file = HprofFile::from_bytes(builder.build()).unwrap();
        let dumps = file.dumps().unwrap();
        assert!(matches!(dumps[0].heaps(), Err(HprofError::BadFormat(_))));
    }

    #[test]
    fn duplicate_object_id_is_bad_format() {
        let id_size = 4;
        let mut builder = Builder::new(id_size);
        builder.name(0x64, "com/Ex");
        builder.load_class(1, 0x1000, 0, 0x64);
        let mut body = Bytes::new(id_size);
        body.add(&class_dump(id_size, 0x1000, 0, 4, &[], &[(0x64, INT)]));
        body.add(&instance_dump(id_size, 0x2000, 0x1000, &1u32.to_be_bytes()));
        body.add(&instance_dump(id_size, 0x2000, 0x1000, &2u32.to_be_bytes()));
        builder.segment(body.bytes());
        builder.end_of_dump();
        let file = HprofFile::from_bytes(builder.build()).unwrap();
        let dumps = file.dumps().unwrap();
        assert!(matches!(dumps[0].heaps(), Err(HprofError::BadFormat(_))));
    }

    #[test]
    fn subrecord_must_not_cross_a_segment_boundary() {
        let id_size = 4;
        let mut builder = Builder::new(id_size);
        builder.name(0x64, "com/Ex");
        builder.load_class(1, 0x1000, 0, 0x64);
        let mut body = Bytes::new(id_size);
        body.add(&class_dump(id_size, 0x1000, 0, 4, &[], &[(0x64, INT)]));
        let instance = instance_dump(id_size, 0x2000, 0x1000, &1u32.to_be_bytes());
        let (first_half, second_half) = instance.split_at(instance.len() / 2);
        body.add(first_half);
        builder.segment(body.bytes());
        builder.segment(second_half);
        builder.end_of_dump();
        let file = HprofFile::from_bytes(builder.build()).unwrap();
        let dumps = file.dumps().unwrap();
        assert!(matches!(dumps[0].heaps(), Err(HprofError::BadFormat(_))));
    }

    #[test]
    fn materialisation_is_done_once_per_dump() {
        let file = single_instance_file(4);
        let dumps = file.dumps().unwrap();
        let first = dumps[0].by_id(crate::Id::from(0x2000)).unwrap();
        let second = dumps[0].by_id(crate::Id::from(0x2000)).unwrap();
        assert_eq!(first, second);
    }
}
