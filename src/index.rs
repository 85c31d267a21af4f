use ahash::AHashMap;
use tracing::debug;

use crate::errors::{HprofError, Result};
use crate::parser::primitive_parsers::IdSize;
use crate::parser::record::{ClassLoad, Record, Utf8Name};
use crate::parser::record_parser::{Records, next_record};

pub(crate) const LEVEL_NAMES: u8 = 1;
pub(crate) const LEVEL_CLASS_INFO: u8 = 2;
pub(crate) const LEVEL_DUMPS: u8 = 3;

/// Byte range of one heap dump segment body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SegmentSpan {
    pub body_start: usize,
    pub body_len: usize,
}

/// The segments making up one logical heap dump. May be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DumpSpan {
    pub segments: Vec<SegmentSpan>,
}

/// Lazily built caches over the record stream.
///
/// Each consumer needs a different amount of the file swept: name lookup
/// only needs the name table, class lookup also needs the class loads, dump
/// enumeration needs the segment grouping on top. The level counter tracks
/// how far the single sweep has been taken; re-requesting an already built
/// level is free, and a failed sweep leaves the counter untouched so the
/// next request clears the partial caches and retries.
#[derive(Default)]
pub(crate) struct RecordIndex {
    built: u8,
    /// name id → record offset
    names: AHashMap<u64, usize>,
    class_loads: Vec<ClassLoad>,
    class_by_id: AHashMap<u64, usize>,
    class_by_name: AHashMap<String, usize>,
    dumps: Vec<DumpSpan>,
}

impl RecordIndex {
    pub fn ensure(
        &mut self,
        data: &[u8],
        first_record: usize,
        id_size: IdSize,
        level: u8,
    ) -> Result<()> {
        debug_assert!(level <= LEVEL_DUMPS);
        if self.built >= level {
            return Ok(());
        }
        // caches below the target may hold leftovers of a failed sweep
        if self.built < LEVEL_NAMES {
            self.names.clear();
        }
        if self.built < LEVEL_CLASS_INFO {
            self.class_loads.clear();
            self.class_by_id.clear();
            self.class_by_name.clear();
        }
        if self.built < LEVEL_DUMPS {
            self.dumps.clear();
        }

        let build_names = self.built < LEVEL_NAMES && LEVEL_NAMES <= level;
        let build_class_info = self.built < LEVEL_CLASS_INFO && LEVEL_CLASS_INFO <= level;
        let build_dumps = self.built < LEVEL_DUMPS && LEVEL_DUMPS <= level;
        debug!(
            from = self.built,
            to = level,
            "sweeping records to build index"
        );

        let mut open_dump: Option<DumpSpan> = None;
        for record in Records::new(data, first_record, id_size) {
            match record? {
                Record::Utf8Name(name) if build_names => {
                    if let Some(previous) = self.names.insert(name.id.value(), name.offset) {
                        let old = name_at(data, previous, id_size)?;
                        return Err(HprofError::BadFormat(format!(
                            "duplicate name id {:#x}: {:?} at {:#x} and {:?} at {:#x}",
                            name.id.value(),
                            old.text,
                            old.offset,
                            name.text,
                            name.offset,
                        )));
                    }
                }
                Record::ClassLoad(load) if build_class_info => {
                    self.class_loads.push(load);
                }
                Record::HeapDumpSegment(segment) if build_dumps => {
                    open_dump
                        .get_or_insert_with(DumpSpan::default)
                        .segments
                        .push(SegmentSpan {
                            body_start: segment.offset + 9,
                            body_len: segment.body.len(),
                        });
                }
                Record::HeapDumpEnd if build_dumps => {
                    self.dumps.push(open_dump.take().unwrap_or_default());
                }
                _ => {}
            }
        }
        if let Some(open) = open_dump {
            self.dumps.push(open);
        }

        if build_class_info {
            // class names resolve against the completed name table, so class
            // loads may precede their name records in the file
            for ix in 0..self.class_loads.len() {
                let load = self.class_loads[ix];
                let name = self.resolve_name(data, id_size, load.class_name_id.value())?;
                if self.class_by_name.contains_key(name.text) {
                    return Err(HprofError::BadFormat(format!(
                        "duplicate class load of name {:?}",
                        name.text
                    )));
                }
                if self
                    .class_by_id
                    .insert(load.class_object_id.value(), ix)
                    .is_some()
                {
                    return Err(HprofError::BadFormat(format!(
                        "duplicate class object id {:#x}",
                        load.class_object_id.value()
                    )));
                }
                self.class_by_name.insert(name.text.to_string(), ix);
            }
        }

        self.built = level;
        debug!(
            names = self.names.len(),
            classes = self.class_loads.len(),
            dumps = self.dumps.len(),
            "record index built"
        );
        Ok(())
    }

    fn resolve_name<'a>(
        &self,
        data: &'a [u8],
        id_size: IdSize,
        name_id: u64,
    ) -> Result<Utf8Name<'a>> {
        let offset = *self
            .names
            .get(&name_id)
            .ok_or(HprofError::RefError {
                kind: "name",
                id: name_id,
            })?;
        name_at(data, offset, id_size)
    }

    pub fn name<'a>(&self, data: &'a [u8], id_size: IdSize, name_id: u64) -> Result<Utf8Name<'a>> {
        self.resolve_name(data, id_size, name_id)
    }

    pub fn class_info_by_id(&self, class_object_id: u64) -> Option<ClassLoad> {
        self.class_by_id
            .get(&class_object_id)
            .map(|ix| self.class_loads[*ix])
    }

    pub fn class_info_by_name(&self, class_name: &str) -> Option<ClassLoad> {
        self.class_by_name
            .get(class_name)
            .map(|ix| self.class_loads[*ix])
    }

    pub fn dumps(&self) -> &[DumpSpan] {
        &self.dumps
    }
}

/// Re-frames the single record at `offset`, which must be a name record.
fn name_at(data: &[u8], offset: usize, id_size: IdSize) -> Result<Utf8Name<'_>> {
    match next_record(data, offset, id_size)? {
        (Record::Utf8Name(name), _) => Ok(name),
        _ => Err(HprofError::BadFormat(format!(
            "offset {offset:#x} does not hold a name record"
        ))),
    }
}
