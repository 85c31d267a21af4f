use crate::Id;
use crate::parser::gc_record_parser::SubRecords;
use crate::parser::primitive_parsers::IdSize;

/// A name record: a globally unique (id, UTF-8 string) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utf8Name<'a> {
    /// Absolute offset of the record in the file.
    pub offset: usize,
    pub id: Id,
    pub text: &'a str,
}

/// A class-load record, binding a class object id to a class name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLoad {
    /// Absolute offset of the record in the file.
    pub offset: usize,
    pub serial_number: u32,
    pub class_object_id: Id,
    pub stack_trace_serial_number: u32,
    pub class_name_id: Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnloadClass {
    pub serial_number: u32,
}

/// A line referenced from a stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineNumber {
    Line(u32),
    Unknown,
    CompiledMethod,
    NativeMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    pub stack_frame_id: Id,
    pub method_name_id: Id,
    pub method_signature_id: Id,
    pub source_file_name_id: Id,
    pub class_serial_number: u32,
    pub line_number: LineNumber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTrace {
    pub serial_number: u32,
    pub thread_serial_number: u32,
    pub stack_frame_ids: Vec<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartThread {
    pub thread_serial_number: u32,
    pub thread_object_id: Id,
    pub stack_trace_serial_number: u32,
    pub thread_name_id: Id,
    pub thread_group_name_id: Id,
    pub thread_group_parent_name_id: Id,
}

/// One heap dump segment; its body is a stream of heap subrecords.
///
/// A single logical dump may span several consecutive segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapDumpSegment<'a> {
    /// Absolute offset of the record in the file.
    pub offset: usize,
    pub body: &'a [u8],
}

impl<'a> HeapDumpSegment<'a> {
    /// Iterates the heap subrecords contained in this segment.
    pub fn sub_records(&self, id_size: IdSize) -> SubRecords<'a> {
        // the record header is tag + time delta + length
        SubRecords::new(self.body, self.offset + 9, id_size)
    }
}

/// A typed top-level record.
///
/// Tags without a typed mapping are preserved as [`Record::Unknown`] so that
/// sweeps can still account for every byte of the file.
#[derive(Debug, Clone, PartialEq)]
pub enum Record<'a> {
    Utf8Name(Utf8Name<'a>),
    ClassLoad(ClassLoad),
    UnloadClass(UnloadClass),
    StackFrame(StackFrame),
    StackTrace(StackTrace),
    StartThread(StartThread),
    HeapDumpSegment(HeapDumpSegment<'a>),
    HeapDumpEnd,
    Unknown { tag: u8, body: &'a [u8] },
}
