//! Fixed-width scalar encoding for number blocks and payloads.
//!
//! Integers narrower than a word are widened to a word of the same
//! signedness on disk; everything at least a word wide is stored as-is.
//! Byte order is the host's.

use byteorder::{ByteOrder, NativeEndian};

mod private {
    pub trait Sealed {}

    impl Sealed for u8 {}
    impl Sealed for i8 {}
    impl Sealed for u16 {}
    impl Sealed for i16 {}
    impl Sealed for u32 {}
    impl Sealed for i32 {}
    impl Sealed for u64 {}
    impl Sealed for i64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// A scalar type that can live in a number block or a dense payload.
///
/// This trait is sealed; the set of storable scalars is fixed by the format.
pub trait Scalar: private::Sealed + Copy {
    /// On-disk size in bytes, widening included.
    const STORED_SIZE: usize;

    /// Encode `self` into `buf`, which must be exactly [`Self::STORED_SIZE`]
    /// bytes long.
    fn write_to(self, buf: &mut [u8]);

    /// Decode a value from `buf`, which must be exactly [`Self::STORED_SIZE`]
    /// bytes long.
    fn read_from(buf: &[u8]) -> Self;
}

macro_rules! scalar_direct {
    ($scalar:ty, $read:ident, $write:ident) => {
        impl Scalar for $scalar {
            const STORED_SIZE: usize = std::mem::size_of::<$scalar>();

            fn write_to(self, buf: &mut [u8]) {
                NativeEndian::$write(buf, self)
            }

            fn read_from(buf: &[u8]) -> Self {
                NativeEndian::$read(buf)
            }
        }
    };
}

// Narrow integers travel as one word of the same signedness.
macro_rules! scalar_widened {
    ($scalar:ty, $widened:ty, $read:ident, $write:ident) => {
        impl Scalar for $scalar {
            const STORED_SIZE: usize = std::mem::size_of::<$widened>();

            fn write_to(self, buf: &mut [u8]) {
                NativeEndian::$write(buf, self as $widened)
            }

            fn read_from(buf: &[u8]) -> Self {
                NativeEndian::$read(buf) as $scalar
            }
        }
    };
}

scalar_widened!(u8, u32, read_u32, write_u32);
scalar_widened!(i8, i32, read_i32, write_i32);
scalar_widened!(u16, u32, read_u32, write_u32);
scalar_widened!(i16, i32, read_i32, write_i32);

scalar_direct!(u32, read_u32, write_u32);
scalar_direct!(i32, read_i32, write_i32);
scalar_direct!(u64, read_u64, write_u64);
scalar_direct!(i64, read_i64, write_i64);
scalar_direct!(f32, read_f32, write_f32);
scalar_direct!(f64, read_f64, write_f64);
