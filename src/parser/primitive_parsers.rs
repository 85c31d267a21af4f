use std::fmt;

use nom::combinator::map;
use nom::sequence::terminated;
use nom::{IResult, Parser, bytes, number};

use crate::Id;

/// Width in bytes of the identifiers of one hprof file.
///
/// Fixed per file and stated in its header; every id in the file occupies
/// exactly this many bytes. Values outside `1..=8` are rejected here, the
/// header parser further restricts the range to what the format produces.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IdSize(u8);

impl IdSize {
    pub fn new(size: u32) -> Option<IdSize> {
        (1..=8).contains(&size).then_some(IdSize(size as u8))
    }

    pub fn in_bytes(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for IdSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn parse_c_string(i: &[u8]) -> IResult<&[u8], &[u8]> {
    terminated(
        bytes::streaming::take_until("\0"),
        bytes::streaming::tag("\0"),
    )
    .parse(i)
}

pub fn parse_i8(i: &[u8]) -> IResult<&[u8], i8> {
    number::streaming::be_i8(i)
}

pub fn parse_i16(i: &[u8]) -> IResult<&[u8], i16> {
    number::streaming::be_i16(i)
}

pub fn parse_i32(i: &[u8]) -> IResult<&[u8], i32> {
    number::streaming::be_i32(i)
}

pub fn parse_i64(i: &[u8]) -> IResult<&[u8], i64> {
    number::streaming::be_i64(i)
}

pub fn parse_u8(i: &[u8]) -> IResult<&[u8], u8> {
    number::streaming::be_u8(i)
}

pub fn parse_u16(i: &[u8]) -> IResult<&[u8], u16> {
    number::streaming::be_u16(i)
}

pub fn parse_u32(i: &[u8]) -> IResult<&[u8], u32> {
    number::streaming::be_u32(i)
}

pub fn parse_u64(i: &[u8]) -> IResult<&[u8], u64> {
    number::streaming::be_u64(i)
}

pub fn parse_f32(i: &[u8]) -> IResult<&[u8], f32> {
    number::streaming::be_f32(i)
}

pub fn parse_f64(i: &[u8]) -> IResult<&[u8], f64> {
    number::streaming::be_f64(i)
}

/// A java boolean is a single byte that must be 0 or 1.
pub fn parse_boolean(i: &[u8]) -> IResult<&[u8], bool> {
    nom::combinator::map_res(parse_u8, |b| match b {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err("invalid boolean byte"),
    })
    .parse(i)
}

/// A java char is one UTF-16-BE code unit; surrogate pairs are not combined.
pub fn parse_char(i: &[u8]) -> IResult<&[u8], u16> {
    parse_u16(i)
}

/// Reads an id of `id_size` bytes, zero-extended into a `u64`.
pub fn parse_id(id_size: IdSize) -> impl Fn(&[u8]) -> IResult<&[u8], Id> + Copy {
    move |i| {
        map(bytes::streaming::take(id_size.in_bytes()), |raw: &[u8]| {
            Id::from(raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
        })
        .parse(i)
    }
}
