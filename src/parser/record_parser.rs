use nom::multi::count;
use nom::{IResult, Parser, combinator::map};

use crate::errors::{HprofError, Result};
use crate::parser::primitive_parsers::{IdSize, parse_i32, parse_id, parse_u32};
use crate::parser::record::{
    ClassLoad, HeapDumpSegment, LineNumber, Record, StackFrame, StackTrace, StartThread,
    UnloadClass, Utf8Name,
};

const TAG_STRING: u8 = 0x01;
const TAG_LOAD_CLASS: u8 = 0x02;
const TAG_UNLOAD_CLASS: u8 = 0x03;
const TAG_STACK_FRAME: u8 = 0x04;
const TAG_STACK_TRACE: u8 = 0x05;
const TAG_START_THREAD: u8 = 0x0A;
const TAG_HEAP_DUMP: u8 = 0x0C;
const TAG_HEAP_DUMP_SEGMENT: u8 = 0x1C;
const TAG_HEAP_DUMP_END: u8 = 0x2C;

/// Record header width: tag byte, time delta, body length.
const RECORD_HEADER_LEN: usize = 9;

/// Iterator over the top-level records of an hprof file.
///
/// Each step reads one record header at the current absolute offset and
/// hands out a typed view of its body. The tag read landing exactly at the
/// end of the file is the normal termination; anything shorter than a whole
/// record is an error, after which iteration stops.
pub struct Records<'a> {
    data: &'a [u8],
    pos: usize,
    id_size: IdSize,
    failed: bool,
}

impl<'a> Records<'a> {
    pub(crate) fn new(data: &'a [u8], first_record: usize, id_size: IdSize) -> Records<'a> {
        Records {
            data,
            pos: first_record,
            id_size,
            failed: false,
        }
    }

    /// Absolute offset of the next record.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        match next_record(self.data, self.pos, self.id_size) {
            Ok((record, next_pos)) => {
                self.pos = next_pos;
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Frames and types the record at `offset`, returning it with the offset of
/// the next record.
pub(crate) fn next_record(
    data: &[u8],
    offset: usize,
    id_size: IdSize,
) -> Result<(Record<'_>, usize)> {
    let header = data.get(offset..offset + RECORD_HEADER_LEN).ok_or_else(|| {
        HprofError::OutOfBounds(format!(
            "record header at offset {offset:#x} extends past end of file"
        ))
    })?;
    let tag = header[0];
    // header[1..5] is the time delta, which plays no part in framing
    let body_len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
    let body_start = offset + RECORD_HEADER_LEN;
    let body = data.get(body_start..body_start + body_len).ok_or_else(|| {
        HprofError::OutOfBounds(format!(
            "record at offset {offset:#x} declares a {body_len} byte body, but only {} bytes remain",
            data.len() - body_start
        ))
    })?;
    let record = parse_record_body(tag, offset, body, id_size)?;
    Ok((record, body_start + body_len))
}

fn parse_record_body<'a>(
    tag: u8,
    offset: usize,
    body: &'a [u8],
    id_size: IdSize,
) -> Result<Record<'a>> {
    match tag {
        TAG_STRING => parse_utf8_name(offset, body, id_size).map(Record::Utf8Name),
        TAG_LOAD_CLASS => parse_load_class(offset, body, id_size).map(Record::ClassLoad),
        TAG_UNLOAD_CLASS => in_body(offset, "unload class", {
            map(parse_u32, |serial_number| {
                Record::UnloadClass(UnloadClass { serial_number })
            })
            .parse(body)
        }),
        TAG_STACK_FRAME => parse_stack_frame(offset, body, id_size).map(Record::StackFrame),
        TAG_STACK_TRACE => parse_stack_trace(offset, body, id_size).map(Record::StackTrace),
        TAG_START_THREAD => parse_start_thread(offset, body, id_size).map(Record::StartThread),
        TAG_HEAP_DUMP | TAG_HEAP_DUMP_SEGMENT => {
            Ok(Record::HeapDumpSegment(HeapDumpSegment { offset, body }))
        }
        TAG_HEAP_DUMP_END => Ok(Record::HeapDumpEnd),
        _ => Ok(Record::Unknown { tag, body }),
    }
}

/// Lifts a nom result on a record body into a crate result, charging parse
/// failures to the record as format errors (the body length was already
/// validated by the framer).
fn in_body<T>(offset: usize, what: &str, parsed: IResult<&[u8], T>) -> Result<T> {
    parsed.map(|(_, value)| value).map_err(|_| {
        HprofError::BadFormat(format!(
            "{what} record at offset {offset:#x} is truncated or malformed"
        ))
    })
}

fn parse_utf8_name(offset: usize, body: &[u8], id_size: IdSize) -> Result<Utf8Name<'_>> {
    let (text_bytes, id) = parse_id(id_size)(body).map_err(|_| {
        HprofError::BadFormat(format!(
            "name record at offset {offset:#x} is shorter than one id"
        ))
    })?;
    let text = std::str::from_utf8(text_bytes).map_err(|_| {
        HprofError::BadFormat(format!(
            "name record at offset {offset:#x} contains invalid UTF-8"
        ))
    })?;
    Ok(Utf8Name { offset, id, text })
}

fn parse_load_class(offset: usize, body: &[u8], id_size: IdSize) -> Result<ClassLoad> {
    in_body(
        offset,
        "class load",
        map(
            (parse_u32, parse_id(id_size), parse_u32, parse_id(id_size)),
            |(serial_number, class_object_id, stack_trace_serial_number, class_name_id)| {
                ClassLoad {
                    offset,
                    serial_number,
                    class_object_id,
                    stack_trace_serial_number,
                    class_name_id,
                }
            },
        )
        .parse(body),
    )
}

fn parse_line_number(i: &[u8]) -> IResult<&[u8], LineNumber> {
    nom::combinator::map_res(parse_i32, |num| match num {
        n if n > 0 => Ok(LineNumber::Line(n as u32)),
        -1 => Ok(LineNumber::Unknown),
        -2 => Ok(LineNumber::CompiledMethod),
        -3 => Ok(LineNumber::NativeMethod),
        _ => Err("invalid line number"),
    })
    .parse(i)
}

fn parse_stack_frame(offset: usize, body: &[u8], id_size: IdSize) -> Result<StackFrame> {
    let pid = parse_id(id_size);
    in_body(
        offset,
        "stack frame",
        map(
            (pid, pid, pid, pid, parse_u32, parse_line_number),
            |(
                stack_frame_id,
                method_name_id,
                method_signature_id,
                source_file_name_id,
                class_serial_number,
                line_number,
            )| {
                StackFrame {
                    stack_frame_id,
                    method_name_id,
                    method_signature_id,
                    source_file_name_id,
                    class_serial_number,
                    line_number,
                }
            },
        )
        .parse(body),
    )
}

fn parse_stack_trace(offset: usize, body: &[u8], id_size: IdSize) -> Result<StackTrace> {
    let parsed = (parse_u32, parse_u32, parse_u32)
        .parse(body)
        .and_then(|(r1, (serial_number, thread_serial_number, number_of_frames))| {
            map(
                count(parse_id(id_size), number_of_frames as usize),
                move |stack_frame_ids| StackTrace {
                    serial_number,
                    thread_serial_number,
                    stack_frame_ids,
                },
            )
            .parse(r1)
        });
    in_body(offset, "stack trace", parsed)
}

fn parse_start_thread(offset: usize, body: &[u8], id_size: IdSize) -> Result<StartThread> {
    let pid = parse_id(id_size);
    in_body(
        offset,
        "start thread",
        map(
            (parse_u32, pid, parse_u32, pid, pid, pid),
            |(
                thread_serial_number,
                thread_object_id,
                stack_trace_serial_number,
                thread_name_id,
                thread_group_name_id,
                thread_group_parent_name_id,
            )| {
                StartThread {
                    thread_serial_number,
                    thread_object_id,
                    stack_trace_serial_number,
                    thread_name_id,
                    thread_group_name_id,
                    thread_group_parent_name_id,
                }
            },
        )
        .parse(body),
    )
}
