//! A library for parsing and navigating JVM heap dump (hprof) files.
//!
//! The dump is memory mapped (or handed over as plain bytes) and decoded
//! on demand: iterating records is cheap, the name / class-load / dump
//! indices are built by a single sweep on first use, and a dump's class
//! and object graph is materialised when first navigated.
//!
//! ```no_run
//! use hprof_delve::{HprofFile, open};
//!
//! fn print_objects(file: &HprofFile) -> hprof_delve::Result<()> {
//!     for dump in file.dumps()? {
//!         for heap in dump.heaps()? {
//!             for object in heap.objects() {
//!                 println!("{object:?}");
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//!
//! let file = open("heap.hprof").unwrap();
//! print_objects(&file).unwrap();
//! ```

use std::cell::RefCell;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};

mod dump;
mod errors;
mod index;
pub mod model;
pub mod parser;
mod source;
#[cfg(test)]
mod test_util;

pub use crate::dump::{Dump, Heap, HeapView};
pub use crate::errors::{HprofError, Result};
pub use crate::model::class::{ClassUniverse, ContainerKind, JavaClass};
pub use crate::model::object::{ArrayElements, JavaObject, ObjRef, cast};
pub use crate::parser::file_header_parser::FileHeader;
pub use crate::parser::gc_record::{ArrayValue, FieldType, FieldValue, GcRoot, SubRecord};
pub use crate::parser::primitive_parsers::IdSize;
pub use crate::parser::record::{ClassLoad, Record, Utf8Name};
pub use crate::parser::record_parser::Records;
pub use crate::source::ByteSource;

use crate::index::{LEVEL_CLASS_INFO, LEVEL_DUMPS, LEVEL_NAMES, RecordIndex};
use crate::parser::file_header_parser::parse_file_header;

/// An object, class or name identifier of the dump's `idsize` width,
/// zero-extended.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(u64);

impl Id {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for Id {
    fn from(id: u64) -> Id {
        Id(id)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({:#x})", self.0)
    }
}

impl fmt::LowerHex for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

/// Opens and memory maps an hprof file.
pub fn open<P: AsRef<Path>>(path: P) -> Result<HprofFile> {
    HprofFile::from_source(ByteSource::map_file(path.as_ref())?)
}

/// An open hprof file: the entry point into everything else.
///
/// Lookups may trigger a sweep over all records on first use (see the
/// module documentation); the sweep caches are not synchronised, so share
/// a file across threads by giving each thread its own `HprofFile`.
pub struct HprofFile {
    source: ByteSource,
    header: FileHeader,
    first_record: usize,
    record_index: RefCell<RecordIndex>,
}

impl HprofFile {
    /// Reads a dump held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<HprofFile> {
        HprofFile::from_source(ByteSource::from_vec(data))
    }

    fn from_source(source: ByteSource) -> Result<HprofFile> {
        let (header, first_record) = parse_file_header(source.bytes()?)?;
        Ok(HprofFile {
            source,
            header,
            first_record,
            record_index: RefCell::new(RecordIndex::default()),
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn version(&self) -> &str {
        &self.header.version
    }

    pub fn id_size(&self) -> IdSize {
        self.header.id_size
    }

    pub fn timestamp_millis(&self) -> u64 {
        self.header.timestamp_millis
    }

    /// The capture time recorded in the header.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.header.start_time()
    }

    pub(crate) fn source_bytes(&self) -> Result<&[u8]> {
        self.source.bytes()
    }

    /// Iterates the typed top-level records in file order.
    pub fn records(&self) -> Result<Records<'_>> {
        Ok(Records::new(
            self.source_bytes()?,
            self.first_record,
            self.header.id_size,
        ))
    }

    fn ensure_index(&self, level: u8) -> Result<()> {
        self.record_index.borrow_mut().ensure(
            self.source_bytes()?,
            self.first_record,
            self.header.id_size,
            level,
        )
    }

    /// Looks a name record up by its id.
    pub fn name(&self, id: Id) -> Result<Utf8Name<'_>> {
        self.ensure_index(LEVEL_NAMES)?;
        self.record_index
            .borrow()
            .name(self.source_bytes()?, self.header.id_size, id.value())
    }

    /// The class load record for a class object id.
    pub fn class_info_by_id(&self, class_object_id: Id) -> Result<ClassLoad> {
        self.ensure_index(LEVEL_CLASS_INFO)?;
        self.record_index
            .borrow()
            .class_info_by_id(class_object_id.value())
            .ok_or_else(|| {
                HprofError::ClassNotFound(format!("class id {:#x}", class_object_id.value()))
            })
    }

    /// The class load record for a class name as spelled in the name table.
    pub fn class_info_by_name(&self, class_name: &str) -> Result<ClassLoad> {
        self.ensure_index(LEVEL_CLASS_INFO)?;
        self.record_index
            .borrow()
            .class_info_by_name(class_name)
            .ok_or_else(|| HprofError::ClassNotFound(format!("class name {class_name:?}")))
    }

    /// The heap dumps of this file, in file order.
    pub fn dumps(&self) -> Result<Vec<Dump<'_>>> {
        self.ensure_index(LEVEL_DUMPS)?;
        let spans = self.record_index.borrow().dumps().to_vec();
        Ok(spans
            .into_iter()
            .map(|span| Dump::new(self, span))
            .collect())
    }

    /// Closes the underlying source; any read after this fails with
    /// [`HprofError::ClosedSource`].
    pub fn close(&mut self) {
        self.source.close();
    }
}
