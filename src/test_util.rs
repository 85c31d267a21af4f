//! Helpers for synthesising hprof bytes in tests.

/// Folds a wide test value into `width` bytes by xoring the big-endian
/// chunks together, so the same test ids work at any id size.
pub fn fold(value: u64, width: usize) -> u64 {
    if width >= 8 {
        return value;
    }
    let mask = (1u64 << (8 * width)) - 1;
    let mut folded = 0;
    let mut v = value;
    while v != 0 {
        folded ^= v;
        v >>= 8 * width;
    }
    folded & mask
}

/// Big-endian byte builder for record and subrecord payloads.
pub struct Bytes {
    id_size: usize,
    data: Vec<u8>,
}

impl Bytes {
    pub fn new(id_size: usize) -> Bytes {
        Bytes {
            id_size,
            data: Vec::new(),
        }
    }

    pub fn u1(&mut self, v: u8) -> &mut Bytes {
        self.data.push(v);
        self
    }

    pub fn u2(&mut self, v: u16) -> &mut Bytes {
        self.data.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u4(&mut self, v: u32) -> &mut Bytes {
        self.data.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u8(&mut self, v: u64) -> &mut Bytes {
        self.data.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Appends an id, folded to the builder's id size.
    pub fn id(&mut self, v: u64) -> &mut Bytes {
        let folded = fold(v, self.id_size);
        self.data
            .extend_from_slice(&folded.to_be_bytes()[8 - self.id_size..]);
        self
    }

    pub fn utf8(&mut self, s: &str) -> &mut Bytes {
        self.data.extend_from_slice(s.as_bytes());
        self
    }

    pub fn add(&mut self, bytes: &[u8]) -> &mut Bytes {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Builds a whole hprof file: header plus framed records.
pub struct Builder {
    id_size: usize,
    data: Vec<u8>,
}

impl Builder {
    pub fn new(id_size: usize) -> Builder {
        Builder::with_header("1.0.3", id_size, 0)
    }

    pub fn with_header(version: &str, id_size: usize, timestamp_millis: u64) -> Builder {
        let mut data = format!("JAVA PROFILE {version}\0").into_bytes();
        data.extend_from_slice(&(id_size as u32).to_be_bytes());
        data.extend_from_slice(&timestamp_millis.to_be_bytes());
        Builder { id_size, data }
    }

    pub fn id_size(&self) -> usize {
        self.id_size
    }

    /// Frames `body` as a record, returning the record's offset.
    pub fn record(&mut self, tag: u8, body: &[u8]) -> usize {
        let offset = self.data.len();
        self.data.push(tag);
        self.data.extend_from_slice(&0u32.to_be_bytes());
        self.data.extend_from_slice(&(body.len() as u32).to_be_bytes());
        self.data.extend_from_slice(body);
        offset
    }

    pub fn name(&mut self, id: u64, text: &str) -> usize {
        let mut body = Bytes::new(self.id_size);
        body.id(id).utf8(text);
        self.record(0x01, body.bytes())
    }

    pub fn load_class(&mut self, serial: u32, class_id: u64, stack_serial: u32, name_id: u64) -> usize {
        let mut body = Bytes::new(self.id_size);
        body.u4(serial).id(class_id).u4(stack_serial).id(name_id);
        self.record(0x02, body.bytes())
    }

    pub fn unload_class(&mut self, serial: u32) -> usize {
        let mut body = Bytes::new(self.id_size);
        body.u4(serial);
        self.record(0x03, body.bytes())
    }

    pub fn segment(&mut self, body: &[u8]) -> usize {
        self.record(0x1C, body)
    }

    pub fn end_of_dump(&mut self) -> usize {
        self.record(0x2C, &[])
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

/// A class dump subrecord with no constant pool.
///
/// Static fields are (name id, type tag, value bytes); instance fields are
/// (name id, type tag).
pub fn class_dump(
    id_size: usize,
    class_id: u64,
    super_id: u64,
    instance_size: u32,
    static_fields: &[(u64, u8, &[u8])],
    instance_fields: &[(u64, u8)],
) -> Vec<u8> {
    let mut b = Bytes::new(id_size);
    b.u1(0x20)
        .id(class_id)
        .u4(0)
        .id(super_id)
        .id(0)
        .id(0)
        .id(0)
        .id(0)
        .id(0)
        .u4(instance_size)
        .u2(0)
        .u2(static_fields.len() as u16);
    for (name_id, type_tag, value) in static_fields {
        b.id(*name_id).u1(*type_tag).add(value);
    }
    b.u2(instance_fields.len() as u16);
    for (name_id, type_tag) in instance_fields {
        b.id(*name_id).u1(*type_tag);
    }
    b.bytes().to_vec()
}

/// An instance dump subrecord with raw field data.
pub fn instance_dump(id_size: usize, object_id: u64, class_id: u64, data: &[u8]) -> Vec<u8> {
    let mut b = Bytes::new(id_size);
    b.u1(0x21)
        .id(object_id)
        .u4(0)
        .id(class_id)
        .u4(data.len() as u32)
        .add(data);
    b.bytes().to_vec()
}

/// An object array dump subrecord.
pub fn object_array_dump(
    id_size: usize,
    object_id: u64,
    array_class_id: u64,
    elements: &[u64],
) -> Vec<u8> {
    let mut b = Bytes::new(id_size);
    b.u1(0x22)
        .id(object_id)
        .u4(0)
        .u4(elements.len() as u32)
        .id(array_class_id);
    for element in elements {
        b.id(*element);
    }
    b.bytes().to_vec()
}

/// A primitive array dump subrecord with raw element bytes.
pub fn primitive_array_dump(
    id_size: usize,
    object_id: u64,
    element_type: u8,
    count: u32,
    elements: &[u8],
) -> Vec<u8> {
    let mut b = Bytes::new(id_size);
    b.u1(0x23)
        .id(object_id)
        .u4(0)
        .u4(count)
        .u1(element_type)
        .add(elements);
    b.bytes().to_vec()
}

/// A heap dump info subrecord naming the heap of what follows.
pub fn heap_dump_info(id_size: usize, serial: u32, name_id: u64) -> Vec<u8> {
    let mut b = Bytes::new(id_size);
    b.u1(0xFE).u4(serial).id(name_id);
    b.bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_narrows_by_xor() {
        assert_eq!(fold(0x12345, 4), 0x12345);
        assert_eq!(fold(0x1_0000_0003, 4), 2);
        assert_eq!(fold(0xdeadbeef, 8), 0xdeadbeef);
        assert_eq!(fold(0x998877341, 3), 0x877341 ^ 0x998);
    }
}
