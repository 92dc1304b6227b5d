//! Element-wise summation on little-endian byte buffers, as performed by
//! the aggregation switch.

use crate::types::DataType;

/// Types the aggregation path can add.
trait Summable: Copy + 'static {
    const SIZE: usize;
    fn add(a: Self, b: Self) -> Self;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! impl_summable {
    ($ty:ty, $add:expr) => {
        impl Summable for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            #[inline]
            fn add(a: Self, b: Self) -> Self {
                $add(a, b)
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                Self::from_le_bytes(bytes.try_into().unwrap_or_default())
            }

            #[inline]
            fn write_le(self, bytes: &mut [u8]) {
                bytes.copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_summable!(f32, <f32 as std::ops::Add>::add);
// Integer aggregation wraps, as switch ALUs do.
impl_summable!(i32, i32::wrapping_add);

/// `dst[i] += src[i]` for every element of `dtype` in the shorter buffer.
///
/// Trailing bytes that do not form a whole element are left untouched.
pub fn accumulate(dst: &mut [u8], src: &[u8], dtype: DataType) {
    match dtype {
        DataType::F32 => accumulate_typed::<f32>(dst, src),
        DataType::I32 => accumulate_typed::<i32>(dst, src),
    }
}

fn accumulate_typed<T: Summable>(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.chunks_exact_mut(T::SIZE).zip(src.chunks_exact(T::SIZE)) {
        T::add(T::read_le(d), T::read_le(s)).write_le(d);
    }
}
