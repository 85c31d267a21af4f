use nom::multi::count;
use nom::{IResult, Parser, bytes, combinator::map, combinator::map_res};

use crate::errors::{HprofError, Result};
use crate::parser::gc_record::{
    ArrayValue, ClassDump, ConstFieldInfo, FieldInfo, FieldType, FieldValue, GcRoot, InstanceDump,
    ObjectArrayDump, PrimitiveArrayDump, SubRecord,
};
use crate::parser::primitive_parsers::{
    IdSize, parse_boolean, parse_char, parse_f32, parse_f64, parse_i8, parse_i16, parse_i32,
    parse_i64, parse_id, parse_u8, parse_u16, parse_u32,
};

const TAG_GC_ROOT_JNI_GLOBAL: u8 = 0x01;
const TAG_GC_ROOT_JNI_LOCAL: u8 = 0x02;
const TAG_GC_ROOT_JAVA_FRAME: u8 = 0x03;
const TAG_GC_ROOT_NATIVE_STACK: u8 = 0x04;
const TAG_GC_ROOT_STICKY_CLASS: u8 = 0x05;
const TAG_GC_ROOT_THREAD_BLOCK: u8 = 0x06;
const TAG_GC_ROOT_MONITOR_USED: u8 = 0x07;
const TAG_GC_ROOT_THREAD_OBJ: u8 = 0x08;
const TAG_GC_CLASS_DUMP: u8 = 0x20;
const TAG_GC_INSTANCE_DUMP: u8 = 0x21;
const TAG_GC_OBJ_ARRAY_DUMP: u8 = 0x22;
const TAG_GC_PRIM_ARRAY_DUMP: u8 = 0x23;
const TAG_GC_HEAP_DUMP_INFO: u8 = 0xFE;
const TAG_GC_ROOT_UNKNOWN: u8 = 0xFF;

/// Iterator over the heap subrecords of one heap dump segment body.
///
/// Subrecords carry no outer length field; each one's size follows from its
/// tag and inline contents under the current id size. A subrecord never
/// crosses a segment boundary, so running out of bytes mid-subrecord is a
/// format error, and iteration stops after the first error.
pub struct SubRecords<'a> {
    id_size: IdSize,
    base: usize,
    full_len: usize,
    remaining: &'a [u8],
    failed: bool,
}

impl<'a> SubRecords<'a> {
    pub(crate) fn new(body: &'a [u8], base: usize, id_size: IdSize) -> SubRecords<'a> {
        SubRecords {
            id_size,
            base,
            full_len: body.len(),
            remaining: body,
            failed: false,
        }
    }

    /// Absolute offset of the next subrecord.
    pub fn position(&self) -> usize {
        self.base + (self.full_len - self.remaining.len())
    }
}

impl<'a> Iterator for SubRecords<'a> {
    type Item = Result<SubRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining.is_empty() {
            return None;
        }
        let offset = SubRecords::position(self);
        match parse_sub_record(self.remaining, self.id_size, offset) {
            Ok((rest, sub)) => {
                self.remaining = rest;
                Some(Ok(sub))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn parse_sub_record<'a>(
    i: &'a [u8],
    id_size: IdSize,
    offset: usize,
) -> Result<(&'a [u8], SubRecord<'a>)> {
    let tag = i[0];
    let r1 = &i[1..];
    let parsed: IResult<&[u8], SubRecord<'a>> = match tag {
        TAG_GC_ROOT_UNKNOWN => {
            map(parse_id(id_size), |object_id| {
                SubRecord::GcRoot(GcRoot::Unknown { object_id })
            })
            .parse(r1)
        }
        TAG_GC_ROOT_JNI_GLOBAL => map(
            (parse_id(id_size), parse_id(id_size)),
            |(object_id, jni_global_ref_id)| {
                SubRecord::GcRoot(GcRoot::JniGlobal {
                    object_id,
                    jni_global_ref_id,
                })
            },
        )
        .parse(r1),
        TAG_GC_ROOT_JNI_LOCAL => map(
            (parse_id(id_size), parse_u32, parse_u32),
            |(object_id, thread_serial_number, frame_number_in_stack_trace)| {
                SubRecord::GcRoot(GcRoot::JniLocal {
                    object_id,
                    thread_serial_number,
                    frame_number_in_stack_trace,
                })
            },
        )
        .parse(r1),
        TAG_GC_ROOT_JAVA_FRAME => map(
            (parse_id(id_size), parse_u32, parse_u32),
            |(object_id, thread_serial_number, frame_number_in_stack_trace)| {
                SubRecord::GcRoot(GcRoot::JavaFrame {
                    object_id,
                    thread_serial_number,
                    frame_number_in_stack_trace,
                })
            },
        )
        .parse(r1),
        TAG_GC_ROOT_NATIVE_STACK => map(
            (parse_id(id_size), parse_u32),
            |(object_id, thread_serial_number)| {
                SubRecord::GcRoot(GcRoot::NativeStack {
                    object_id,
                    thread_serial_number,
                })
            },
        )
        .parse(r1),
        TAG_GC_ROOT_STICKY_CLASS => {
            map(parse_id(id_size), |object_id| {
                SubRecord::GcRoot(GcRoot::StickyClass { object_id })
            })
            .parse(r1)
        }
        TAG_GC_ROOT_THREAD_BLOCK => map(
            (parse_id(id_size), parse_u32),
            |(object_id, thread_serial_number)| {
                SubRecord::GcRoot(GcRoot::ThreadBlock {
                    object_id,
                    thread_serial_number,
                })
            },
        )
        .parse(r1),
        TAG_GC_ROOT_MONITOR_USED => {
            map(parse_id(id_size), |object_id| {
                SubRecord::GcRoot(GcRoot::MonitorUsed { object_id })
            })
            .parse(r1)
        }
        TAG_GC_ROOT_THREAD_OBJ => map(
            (parse_id(id_size), parse_u32, parse_u32),
            |(thread_object_id, thread_sequence_number, stack_sequence_number)| {
                SubRecord::GcRoot(GcRoot::ThreadObject {
                    thread_object_id,
                    thread_sequence_number,
                    stack_sequence_number,
                })
            },
        )
        .parse(r1),
        TAG_GC_HEAP_DUMP_INFO => map(
            (parse_u32, parse_id(id_size)),
            |(heap_serial_number, heap_name_id)| SubRecord::HeapDumpInfo {
                heap_serial_number,
                heap_name_id,
            },
        )
        .parse(r1),
        TAG_GC_CLASS_DUMP => parse_gc_class_dump(r1, id_size).map(|(r, c)| (r, SubRecord::ClassDump(c))),
        TAG_GC_INSTANCE_DUMP => {
            parse_gc_instance_dump(r1, id_size).map(|(r, d)| (r, SubRecord::InstanceDump(d)))
        }
        TAG_GC_OBJ_ARRAY_DUMP => {
            parse_gc_object_array_dump(r1, id_size).map(|(r, d)| (r, SubRecord::ObjectArrayDump(d)))
        }
        TAG_GC_PRIM_ARRAY_DUMP => parse_gc_primitive_array_dump(r1, id_size)
            .map(|(r, d)| (r, SubRecord::PrimitiveArrayDump(d))),
        _ => {
            return Err(HprofError::BadFormat(format!(
                "unknown heap subrecord tag {tag:#04x} at offset {offset:#x}"
            )));
        }
    };
    parsed.map_err(|_| {
        HprofError::BadFormat(format!(
            "heap subrecord (tag {tag:#04x}) at offset {offset:#x} is truncated or malformed"
        ))
    })
}

pub fn parse_field_type(i: &[u8]) -> IResult<&[u8], FieldType> {
    map_res(parse_u8, |b| {
        FieldType::from_tag(b).ok_or("invalid java type tag")
    })
    .parse(i)
}

/// Reads one value of the given type; objects take `id_size` bytes.
pub fn parse_field_value(
    ty: FieldType,
    id_size: IdSize,
) -> impl Fn(&[u8]) -> IResult<&[u8], FieldValue> {
    move |i| match ty {
        FieldType::Object => map(parse_id(id_size), FieldValue::Object).parse(i),
        FieldType::Bool => map(parse_boolean, FieldValue::Bool).parse(i),
        FieldType::Char => map(parse_char, FieldValue::Char).parse(i),
        FieldType::Float => map(parse_f32, FieldValue::Float).parse(i),
        FieldType::Double => map(parse_f64, FieldValue::Double).parse(i),
        FieldType::Byte => map(parse_i8, FieldValue::Byte).parse(i),
        FieldType::Short => map(parse_i16, FieldValue::Short).parse(i),
        FieldType::Int => map(parse_i32, FieldValue::Int).parse(i),
        FieldType::Long => map(parse_i64, FieldValue::Long).parse(i),
    }
}

fn parse_array_value(
    element_type: FieldType,
    number_of_elements: usize,
) -> impl Fn(&[u8]) -> IResult<&[u8], ArrayValue> {
    move |i| match element_type {
        // a primitive array cannot hold object ids
        FieldType::Object => Err(nom::Err::Error(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Verify,
        ))),
        FieldType::Bool => map(count(parse_boolean, number_of_elements), ArrayValue::Bool).parse(i),
        FieldType::Char => map(count(parse_char, number_of_elements), ArrayValue::Char).parse(i),
        FieldType::Float => map(count(parse_f32, number_of_elements), ArrayValue::Float).parse(i),
        FieldType::Double => map(count(parse_f64, number_of_elements), ArrayValue::Double).parse(i),
        FieldType::Byte => map(count(parse_i8, number_of_elements), ArrayValue::Byte).parse(i),
        FieldType::Short => map(count(parse_i16, number_of_elements), ArrayValue::Short).parse(i),
        FieldType::Int => map(count(parse_i32, number_of_elements), ArrayValue::Int).parse(i),
        FieldType::Long => map(count(parse_i64, number_of_elements), ArrayValue::Long).parse(i),
    }
}

fn parse_const_pool_item(
    id_size: IdSize,
) -> impl Fn(&[u8]) -> IResult<&[u8], (ConstFieldInfo, FieldValue)> {
    move |i| {
        let (r1, (const_pool_idx, const_type)) = (parse_u16, parse_field_type).parse(i)?;
        let (r2, value) = parse_field_value(const_type, id_size)(r1)?;
        Ok((
            r2,
            (
                ConstFieldInfo {
                    const_pool_idx,
                    const_type,
                },
                value,
            ),
        ))
    }
}

fn parse_static_field_item(
    id_size: IdSize,
) -> impl Fn(&[u8]) -> IResult<&[u8], (FieldInfo, FieldValue)> {
    move |i| {
        let (r1, (name_id, field_type)) = (parse_id(id_size), parse_field_type).parse(i)?;
        let (r2, value) = parse_field_value(field_type, id_size)(r1)?;
        Ok((
            r2,
            (
                FieldInfo {
                    name_id,
                    field_type,
                },
                value,
            ),
        ))
    }
}

fn parse_instance_field_item(id_size: IdSize) -> impl Fn(&[u8]) -> IResult<&[u8], FieldInfo> {
    move |i| {
        map(
            (parse_id(id_size), parse_field_type),
            |(name_id, field_type)| FieldInfo {
                name_id,
                field_type,
            },
        )
        .parse(i)
    }
}

fn parse_gc_class_dump(i: &[u8], id_size: IdSize) -> IResult<&[u8], ClassDump> {
    let pid = parse_id(id_size);
    let (
        r1,
        (
            class_object_id,
            stack_trace_serial_number,
            super_class_object_id,
            class_loader_object_id,
            _signers_object_id,
            _protection_domain_object_id,
            _reserved_1,
            _reserved_2,
            instance_size,
            constant_pool_size,
        ),
    ) = (pid, parse_u32, pid, pid, pid, pid, pid, pid, parse_u32, parse_u16).parse(i)?;

    let (r2, const_fields) = count(
        parse_const_pool_item(id_size),
        usize::from(constant_pool_size),
    )
    .parse(r1)?;
    let (r3, static_fields_count) = parse_u16(r2)?;
    let (r4, static_fields) = count(
        parse_static_field_item(id_size),
        usize::from(static_fields_count),
    )
    .parse(r3)?;
    let (r5, instance_fields_count) = parse_u16(r4)?;
    let (r6, instance_fields) = count(
        parse_instance_field_item(id_size),
        usize::from(instance_fields_count),
    )
    .parse(r5)?;

    Ok((
        r6,
        ClassDump {
            class_object_id,
            stack_trace_serial_number,
            super_class_object_id,
            class_loader_object_id,
            instance_size,
            const_fields,
            static_fields,
            instance_fields,
        },
    ))
}

fn parse_gc_instance_dump(i: &[u8], id_size: IdSize) -> IResult<&[u8], InstanceDump<'_>> {
    let (r1, (object_id, stack_trace_serial_number, class_object_id, data_size)) =
        (parse_id(id_size), parse_u32, parse_id(id_size), parse_u32).parse(i)?;
    let (r2, data) = bytes::streaming::take(data_size).parse(r1)?;
    Ok((
        r2,
        InstanceDump {
            object_id,
            stack_trace_serial_number,
            class_object_id,
            data,
        },
    ))
}

fn parse_gc_object_array_dump(i: &[u8], id_size: IdSize) -> IResult<&[u8], ObjectArrayDump> {
    let (r1, (object_id, stack_trace_serial_number, number_of_elements, array_class_id)) =
        (parse_id(id_size), parse_u32, parse_u32, parse_id(id_size)).parse(i)?;
    let (r2, elements) = count(parse_id(id_size), number_of_elements as usize).parse(r1)?;
    Ok((
        r2,
        ObjectArrayDump {
            object_id,
            stack_trace_serial_number,
            array_class_id,
            elements,
        },
    ))
}

fn parse_gc_primitive_array_dump(i: &[u8], id_size: IdSize) -> IResult<&[u8], PrimitiveArrayDump> {
    let (r1, (object_id, stack_trace_serial_number, number_of_elements, element_type)) =
        (parse_id(id_size), parse_u32, parse_u32, parse_field_type).parse(i)?;
    let (r2, elements) =
        parse_array_value(element_type, number_of_elements as usize)(r1)?;
    Ok((
        r2,
        PrimitiveArrayDump {
            object_id,
            stack_trace_serial_number,
            elements,
        },
    ))
}
