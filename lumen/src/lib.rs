#![warn(unused_crate_dependencies)]

mod block;
mod library;

pub use block::{
    aligned_size, padding_size, Blob, BlockInfo, BlockReader, BlockWriter, MagicKey, Scalar,
    WORD_SIZE,
};
pub use library::{
    write_library, Axis, Header, LibraryReader, LibraryWriter, CURRENT_VERSION, UNDEFINED_VERSION,
};

/// Library container handling errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when a block key was expected, but another was found.
    ///
    /// The offending block is consumed from the stream; callers that want to
    /// retry must seek back themselves.
    #[error("expected key `{expected}` while reading {context}, but found `{found}` instead")]
    KeyMismatchError {
        expected: MagicKey,
        found: MagicKey,
        context: String,
    },

    /// Returned when the file declares a library version this crate does not
    /// support. Version `0` is reserved as the "undefined" sentinel and is
    /// rejected on read as well.
    #[error("unsupported version {received}, supported version is {expected}")]
    VersionMismatchError { expected: u32, received: u32 },

    /// A block payload size does not match the size its type prescribes,
    /// e.g. a number block whose payload is not exactly one stored scalar.
    #[error("block `{key}` declares {declared} bytes, expected {expected}")]
    SizeMismatchError {
        key: MagicKey,
        declared: u64,
        expected: u64,
    },

    /// Bookmark blocks delimit the stream and carry no payload; a non-zero
    /// size under a bookmark key is a schema violation.
    #[error("bookmark `{key}` must have an empty payload, but declares {size} bytes")]
    NonEmptyBookmarkError { key: MagicKey, size: u64 },

    /// The stored `NTRY` entry count disagrees with `NVXL * NCHN`.
    #[error("`NTRY` declares {declared} entries, but `NVXL` * `NCHN` yields {computed}")]
    EntryCountMismatchError { declared: u64, computed: u64 },

    /// The stored `NVXL` voxel count disagrees with the product of the axis
    /// step counts.
    #[error("`NVXL` declares {declared} voxels, but the axis step counts yield {computed}")]
    VoxelCountMismatchError { declared: u64, computed: u64 },

    /// An axis upper bound strays from `lower + n_steps * step` beyond the
    /// relative tolerance allowed for recomputed floating-point bounds.
    #[error("axis {axis} declares upper bound {upper} cm, but lower + n_steps * step yields {computed} cm")]
    AxisRangeMismatchError { axis: char, upper: f64, computed: f64 },

    /// A block was found after the end marker; a library file ends at `DONE`.
    #[error("found trailing block `{key}` after the end marker")]
    TrailingBlockError { key: MagicKey },

    /// The staged writer was asked to emit a block that was already written.
    #[error("block `{key}` was already written")]
    DuplicateBlockError { key: MagicKey },

    /// The staged writer was driven out of order: the header blocks must be
    /// written before anything else.
    #[error("the library header must be written before the visibility data")]
    MissingHeaderError,

    /// The staged writer was asked to finish before the payload was written.
    #[error("the visibility data must be written before the end marker")]
    MissingDataError,

    /// The payload slice handed to the writer disagrees with the entry count
    /// declared in the header.
    #[error("payload holds {received} entries, but the header declares {declared}")]
    PayloadLengthMismatchError { declared: u64, received: u64 },

    /// See [`std::io::Error`] for more information.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}
