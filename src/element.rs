use std::fmt::Debug;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// A numeric value type that can live in an image and be written to a binary series record.
pub trait Element: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    /// Name recorded as `valuetype` in the series manifest.
    const NAME: &'static str;
    /// Width of one value in bytes.
    const SIZE: usize;

    fn write_le<W: Write>(&self, writer: &mut W) -> io::Result<()>;
    fn read_le<R: Read>(reader: &mut R) -> io::Result<Self>;
}

macro_rules! make_elem {
    (byte $ty:ty, $name:literal, $write:ident, $read:ident) => {
        impl Element for $ty {
            const NAME: &'static str = $name;
            const SIZE: usize = 1;

            #[inline(always)]
            fn write_le<W: Write>(&self, writer: &mut W) -> io::Result<()> {
                writer.$write(*self)
            }

            #[inline(always)]
            fn read_le<R: Read>(reader: &mut R) -> io::Result<Self> {
                reader.$read()
            }
        }
    };
    ($ty:ty, $name:literal, $write:ident, $read:ident) => {
        impl Element for $ty {
            const NAME: &'static str = $name;
            const SIZE: usize = std::mem::size_of::<$ty>();

            #[inline(always)]
            fn write_le<W: Write>(&self, writer: &mut W) -> io::Result<()> {
                writer.$write::<LittleEndian>(*self)
            }

            #[inline(always)]
            fn read_le<R: Read>(reader: &mut R) -> io::Result<Self> {
                reader.$read::<LittleEndian>()
            }
        }
    };
}

make_elem!(byte u8, "uint8", write_u8, read_u8);
make_elem!(byte i8, "int8", write_i8, read_i8);
make_elem!(u16, "uint16", write_u16, read_u16);
make_elem!(i16, "int16", write_i16, read_i16);
make_elem!(u32, "uint32", write_u32, read_u32);
make_elem!(i32, "int32", write_i32, read_i32);
make_elem!(u64, "uint64", write_u64, read_u64);
make_elem!(i64, "int64", write_i64, read_i64);
make_elem!(f32, "float32", write_f32, read_f32);
make_elem!(f64, "float64", write_f64, read_f64);

/// Value type names accepted by [`with_value_type!`].
pub const VALUE_TYPES: [&str; 10] = [
    "uint8", "int8", "uint16", "int16", "uint32", "int32", "uint64", "int64", "float32",
    "float64",
];

/// Runs `$body` with `$t` bound to the element type named by `$name`.
///
/// The body must evaluate to a `Result<_, SeriesError>`; unknown names yield
/// `SeriesError::UnsupportedType`.
#[macro_export]
macro_rules! with_value_type {
    ($name:expr, $t:ident => $body:block) => {
        match $name {
            "uint8" => {
                type $t = u8;
                $body
            }
            "int8" => {
                type $t = i8;
                $body
            }
            "uint16" => {
                type $t = u16;
                $body
            }
            "int16" => {
                type $t = i16;
                $body
            }
            "uint32" => {
                type $t = u32;
                $body
            }
            "int32" => {
                type $t = i32;
                $body
            }
            "uint64" => {
                type $t = u64;
                $body
            }
            "int64" => {
                type $t = i64;
                $body
            }
            "float32" => {
                type $t = f32;
                $body
            }
            "float64" => {
                type $t = f64;
                $body
            }
            other => Err($crate::error::SeriesError::UnsupportedType(other.to_string())),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SeriesError};

    #[test]
    fn little_endian_layout() {
        let mut buf = Vec::new();
        0x0102i16.write_le(&mut buf).unwrap();
        1.5f32.write_le(&mut buf).unwrap();
        7u8.write_le(&mut buf).unwrap();
        assert_eq!(&buf[..2], &[0x02, 0x01]);
        assert_eq!(&buf[2..6], &1.5f32.to_le_bytes());
        assert_eq!(buf[6], 7);

        let mut reader = buf.as_slice();
        assert_eq!(i16::read_le(&mut reader).unwrap(), 0x0102);
        assert_eq!(f32::read_le(&mut reader).unwrap(), 1.5);
        assert_eq!(u8::read_le(&mut reader).unwrap(), 7);
    }

    #[test]
    fn dispatch_by_name() {
        fn width(name: &str) -> Result<usize> {
            with_value_type!(name, T => { Ok(<T as Element>::SIZE) })
        }
        assert_eq!(width("int16").unwrap(), 2);
        assert_eq!(width("float64").unwrap(), 8);
        for name in VALUE_TYPES {
            assert!(width(name).is_ok());
        }
        assert!(matches!(
            width("complex64"),
            Err(SeriesError::UnsupportedType(_))
        ));
    }
}
