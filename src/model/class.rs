use ahash::AHashMap;

use crate::Id;
use crate::errors::{HprofError, Result};
use crate::parser::gc_record::{FieldType, FieldValue};

/// Index of a class in its [`ClassUniverse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassHandle(usize);

/// An instance field declaration with its name resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub field_type: FieldType,
}

/// An internal JVM class name split into its parts.
///
/// `[[Lcom/ex/Outer$Inner$$Lambda;` parses to packages `[com, ex]` and
/// class names `[Outer, Inner$$Lambda[][]]`: the lambda suffix after the
/// first `$$` and the array markers both stick to the last name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub packages: Vec<String>,
    pub names: Vec<String>,
    pub dimensions: usize,
}

impl ParsedName {
    pub fn dotted(&self) -> String {
        let mut out = String::new();
        for segment in self.packages.iter().chain(self.names.iter()) {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(segment);
        }
        out
    }

    pub fn simple_name(&self) -> &str {
        // names is never empty for a successfully parsed name
        self.names.last().map(String::as_str).unwrap_or_default()
    }
}

fn primitive_type_name(descriptor: &str) -> Option<&'static str> {
    match descriptor {
        "Z" => Some("boolean"),
        "B" => Some("byte"),
        "C" => Some("char"),
        "S" => Some("short"),
        "I" => Some("int"),
        "J" => Some("long"),
        "F" => Some("float"),
        "D" => Some("double"),
        _ => None,
    }
}

/// Parses an internal JVM name (`pkg/sub/Outer$Inner`, `[Ljava/lang/String;`,
/// `[I`) into package path, nested class names and array dimensions.
pub fn parse_internal_name(name: &str) -> Result<ParsedName> {
    let dimensions = name.bytes().take_while(|b| *b == b'[').count();
    let mut rest = &name[dimensions..];
    if dimensions > 0 {
        rest = match rest.strip_prefix('L').and_then(|r| r.strip_suffix(';')) {
            Some(inner) => inner,
            None => primitive_type_name(rest).ok_or_else(|| {
                HprofError::BadFormat(format!("malformed array class name {name:?}"))
            })?,
        };
    }

    // everything after the first $$ belongs to the last class name segment
    let (base, extra) = match rest.find("$$") {
        Some(ix) => (&rest[..ix], &rest[ix..]),
        None => (rest, ""),
    };
    if base.is_empty() {
        return Err(HprofError::BadFormat(format!("empty class name {name:?}")));
    }

    let mut packages: Vec<&str> = base.split('/').collect();
    let tail = packages.pop().unwrap_or_default();
    if tail.is_empty() || packages.iter().any(|p| p.is_empty()) {
        return Err(HprofError::BadFormat(format!(
            "empty segment in class name {name:?}"
        )));
    }

    // a '$' only separates nested names when both neighbours are part of a
    // name, so $Proxy0 and trailing dollars stay in one segment
    let bytes = tail.as_bytes();
    let mut names: Vec<String> = Vec::new();
    let mut segment_start = 0;
    for (ix, b) in bytes.iter().enumerate() {
        if *b == b'$' && ix > segment_start && ix + 1 < bytes.len() && bytes[ix + 1] != b'$' {
            names.push(tail[segment_start..ix].to_string());
            segment_start = ix + 1;
        }
    }
    names.push(tail[segment_start..].to_string());

    if !extra.is_empty() || dimensions > 0 {
        if let Some(last) = names.last_mut() {
            last.push_str(extra);
            last.push_str(&"[]".repeat(dimensions));
        }
    }

    Ok(ParsedName {
        packages: packages.into_iter().map(str::to_string).collect(),
        names,
        dimensions,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Root,
    Package,
    ClassName,
}

/// One node of the package / class-name tree.
///
/// Interior nodes before the class tail are packages, nodes at and below
/// the class tail are class names; both are navigated the same way. The
/// node's value is the dotted name up to itself.
#[derive(Debug)]
pub struct Container {
    kind: ContainerKind,
    dotted: String,
    children: AHashMap<String, usize>,
    class: Option<ClassHandle>,
}

impl Container {
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    pub fn dotted_name(&self) -> &str {
        &self.dotted
    }

    /// The class registered at this node, when the node names one.
    pub fn class(&self) -> Option<ClassHandle> {
        self.class
    }
}

/// A java class as reconstructed from the dump.
#[derive(Debug)]
pub struct JavaClass {
    handle: ClassHandle,
    name: String,
    simple_name: String,
    super_class: Option<ClassHandle>,
    is_array: bool,
    class_object_id: Id,
    instance_size: u32,
    instance_fields: Vec<FieldDecl>,
    field_slots: AHashMap<String, usize>,
    static_fields: Vec<(String, FieldValue)>,
}

impl JavaClass {
    pub fn handle(&self) -> ClassHandle {
        self.handle
    }

    /// Fully qualified dotted name, e.g. `java.lang.String` or `int[]`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn simple_name(&self) -> &str {
        &self.simple_name
    }

    pub fn super_class(&self) -> Option<ClassHandle> {
        self.super_class
    }

    pub fn is_array(&self) -> bool {
        self.is_array
    }

    /// The class object's id; zero for synthesised primitive array classes.
    pub fn class_object_id(&self) -> Id {
        self.class_object_id
    }

    pub fn instance_size(&self) -> u32 {
        self.instance_size
    }

    /// This class's own instance field schema, in declaration order.
    pub fn instance_fields(&self) -> &[FieldDecl] {
        &self.instance_fields
    }

    pub fn static_fields(&self) -> &[(String, FieldValue)] {
        &self.static_fields
    }

    /// Slot of `name` within this class's own schema.
    pub(crate) fn slot(&self, name: &str) -> Option<usize> {
        self.field_slots.get(name).copied()
    }

    /// This class's own static value for `name`, ignoring superclasses.
    pub fn static_field(&self, name: &str) -> Option<FieldValue> {
        self.static_fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

/// Every class seen in one dump, plus the package tree over their names.
pub struct ClassUniverse {
    classes: Vec<JavaClass>,
    by_object_id: AHashMap<u64, ClassHandle>,
    by_name: AHashMap<String, ClassHandle>,
    containers: Vec<Container>,
}

impl ClassUniverse {
    pub(crate) fn new() -> ClassUniverse {
        ClassUniverse {
            classes: Vec::new(),
            by_object_id: AHashMap::new(),
            by_name: AHashMap::new(),
            containers: vec![Container {
                kind: ContainerKind::Root,
                dotted: String::new(),
                children: AHashMap::new(),
                class: None,
            }],
        }
    }

    pub fn class(&self, handle: ClassHandle) -> &JavaClass {
        &self.classes[handle.0]
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JavaClass> {
        self.classes.iter()
    }

    pub fn by_object_id(&self, id: Id) -> Option<ClassHandle> {
        self.by_object_id.get(&id.value()).copied()
    }

    /// Looks a class up by its dotted name, e.g. `com.example.Outer.Inner`.
    pub fn by_name(&self, dotted: &str) -> Option<&JavaClass> {
        self.by_name.get(dotted).map(|h| self.class(*h))
    }

    /// Walks the package tree along a dotted path.
    pub fn resolve(&self, dotted: &str) -> Option<&Container> {
        let mut node = 0;
        for segment in dotted.split('.') {
            node = *self.containers[node].children.get(segment)?;
        }
        Some(&self.containers[node])
    }

    pub fn root(&self) -> &Container {
        &self.containers[0]
    }

    pub fn child<'a>(&'a self, container: &Container, segment: &str) -> Option<&'a Container> {
        container
            .children
            .get(segment)
            .map(|ix| &self.containers[*ix])
    }

    /// True when `sup` appears on `sub`'s superclass chain (including
    /// `sub` itself).
    pub fn is_supertype(&self, sup: ClassHandle, sub: ClassHandle) -> bool {
        let mut current = Some(sub);
        while let Some(handle) = current {
            if handle == sup {
                return true;
            }
            current = self.class(handle).super_class();
        }
        false
    }

    /// `java.lang.Object` and `java.lang.Class` count every class object as
    /// an instance, mirroring reflection.
    pub(crate) fn is_universal_for_class_objects(&self, handle: ClassHandle) -> bool {
        matches!(self.class(handle).name(), "java.lang.Object" | "java.lang.Class")
    }

    fn container_child(
        &mut self,
        parent: usize,
        segment: &str,
        kind: ContainerKind,
    ) -> Result<usize> {
        if let Some(existing) = self.containers[parent].children.get(segment) {
            let existing = *existing;
            if self.containers[existing].kind != kind {
                return Err(HprofError::BadFormat(format!(
                    "{:?} is used as both a package and a class name",
                    self.containers[existing].dotted
                )));
            }
            return Ok(existing);
        }
        let dotted = if self.containers[parent].dotted.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", self.containers[parent].dotted, segment)
        };
        let ix = self.containers.len();
        self.containers.push(Container {
            kind,
            dotted,
            children: AHashMap::new(),
            class: None,
        });
        self.containers[parent].children.insert(segment.to_string(), ix);
        Ok(ix)
    }

    /// Registers a class under its parsed name.
    ///
    /// The first class to claim a dotted name owns the name tree entry;
    /// later same-named classes (distinct classloaders) stay reachable by
    /// object id.
    pub(crate) fn add_class(
        &mut self,
        parsed: &ParsedName,
        class_object_id: Id,
        super_class: Option<ClassHandle>,
        instance_size: u32,
        instance_fields: Vec<FieldDecl>,
        static_fields: Vec<(String, FieldValue)>,
    ) -> Result<ClassHandle> {
        let mut node = 0;
        for package in &parsed.packages {
            node = self.container_child(node, package, ContainerKind::Package)?;
        }
        for name in &parsed.names {
            node = self.container_child(node, name, ContainerKind::ClassName)?;
        }

        let handle = ClassHandle(self.classes.len());
        let field_slots = instance_fields
            .iter()
            .enumerate()
            .map(|(ix, field)| (field.name.clone(), ix))
            .collect();
        let dotted = parsed.dotted();
        self.classes.push(JavaClass {
            handle,
            simple_name: parsed.simple_name().to_string(),
            name: dotted.clone(),
            super_class,
            is_array: parsed.dimensions > 0,
            class_object_id,
            instance_size,
            instance_fields,
            field_slots,
            static_fields,
        });
        if class_object_id.value() != 0
            && self
                .by_object_id
                .insert(class_object_id.value(), handle)
                .is_some()
        {
            return Err(HprofError::BadFormat(format!(
                "class object id {:#x} defined twice",
                class_object_id.value()
            )));
        }
        self.by_name.entry(dotted).or_insert(handle);
        let container = &mut self.containers[node];
        if container.class.is_none() {
            container.class = Some(handle);
        }
        Ok(handle)
    }

    /// Finds or creates the class of a primitive array, e.g. `int[]`.
    pub(crate) fn primitive_array_class(&mut self, element_type: FieldType) -> Result<ClassHandle> {
        let name = format!("{}[]", element_type.java_name());
        if let Some(handle) = self.by_name.get(&name) {
            return Ok(*handle);
        }
        let parsed = ParsedName {
            packages: Vec::new(),
            names: vec![name],
            dimensions: 1,
        };
        self.add_class(&parsed, Id::from(0), None, 0, Vec::new(), Vec::new())
    }
}
