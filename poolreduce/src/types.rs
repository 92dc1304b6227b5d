/// Index of a worker thread within one participant (0-indexed).
pub type WorkerId = usize;

/// Index of a participant attached to the aggregation switch (0-indexed).
pub type Rank = u32;

/// Element types the aggregation path can sum.
///
/// The switch aggregates 32-bit words, so only 4-byte types are carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    F32 = 0,
    I32 = 1,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::I32 => "i32",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust element types that map onto a [`DataType`].
pub trait Element: Copy + Send + 'static {
    const DTYPE: DataType;
}

impl Element for f32 {
    const DTYPE: DataType = DataType::F32;
}

impl Element for i32 {
    const DTYPE: DataType = DataType::I32;
}

/// Largest element size any job may use; message sizes must be a multiple of it.
pub const MAX_ELEMENT_SIZE: usize = 4;

/// One all-reduce invocation as seen by the workers.
///
/// Published by the orchestrator before the start barrier and read-only
/// until the end barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionJob {
    /// Address of the first byte of the caller's buffer.
    pub addr: u64,
    pub len_bytes: usize,
    pub dtype: DataType,
    pub reduction_id: u64,
}
