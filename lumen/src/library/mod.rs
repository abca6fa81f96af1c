//! Photon-library file schema.
//!
//! A library file is one contiguous, append-only block sequence:
//!
//! ```text
//! PLIB   version (currently 1; 0 is reserved as "undefined")
//! CNFG   free-form configuration text
//! NTRY   total number of visibility entries
//! NCHN   number of optical channels per voxel
//! NVXL   number of voxels
//! for each axis x, y, z:
//!   AXI?   opening bookmark
//!   NBO?   step count
//!   MIN?   lower bound (cm)
//!   MAX?   upper bound (cm)
//!   STE?   cell width (cm)
//!   END?   closing bookmark
//! PHVS   n_entries single-precision visibilities, voxel-major
//! DONE   end marker
//! ```
//!
//! The visibility of channel `c` from voxel `v` is entry `v * n_channels + c`
//! of the `PHVS` payload. Any deviation from the sequence above is a format
//! error.

mod reader;
mod writer;

pub use self::{
    reader::LibraryReader,
    writer::{write_library, LibraryWriter},
};
use crate::Error;

/// The library version this crate reads and writes.
pub const CURRENT_VERSION: u32 = 1;

/// Version sentinel for a header that was never populated. Rejected on read;
/// resolved to [`CURRENT_VERSION`] by [`Header::fix`] on write.
pub const UNDEFINED_VERSION: u32 = 0;

// Axis upper bounds are recomputed from `lower + n_steps * step` in floating
// point, so consistency is only required up to a relative tolerance.
const RELATIVE_TOLERANCE: f64 = 1e-3;

pub(crate) mod keys {
    use crate::block::MagicKey;

    pub(crate) const LIBRARY: MagicKey = MagicKey::new("PLIB");
    pub(crate) const CONFIGURATION: MagicKey = MagicKey::new("CNFG");
    pub(crate) const ENTRIES: MagicKey = MagicKey::new("NTRY");
    pub(crate) const CHANNELS: MagicKey = MagicKey::new("NCHN");
    pub(crate) const VOXELS: MagicKey = MagicKey::new("NVXL");
    pub(crate) const DATA: MagicKey = MagicKey::new("PHVS");
    pub(crate) const END: MagicKey = MagicKey::new("DONE");

    pub(crate) struct AxisKeys {
        pub open: MagicKey,
        pub steps: MagicKey,
        pub lower: MagicKey,
        pub upper: MagicKey,
        pub step: MagicKey,
        pub close: MagicKey,
    }

    const fn axis_keys(axis: &str) -> AxisKeys {
        // Four-byte tags built from a three-byte stem and the axis letter
        // (AXIX, NBOX, MINX, ...).
        const fn tagged(stem: &str, axis: &str) -> MagicKey {
            let stem = stem.as_bytes();
            let axis = axis.as_bytes();
            MagicKey::from_bytes([stem[0], stem[1], stem[2], axis[0]])
        }

        AxisKeys {
            open: tagged("AXI", axis),
            steps: tagged("NBO", axis),
            lower: tagged("MIN", axis),
            upper: tagged("MAX", axis),
            step: tagged("STE", axis),
            close: tagged("END", axis),
        }
    }

    pub(crate) const AXES: [AxisKeys; 3] = [axis_keys("X"), axis_keys("Y"), axis_keys("Z")];
}

pub(crate) const AXIS_NAMES: [char; 3] = ['x', 'y', 'z'];

/// One spatial axis of the voxel grid.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Axis {
    /// Number of cells along this axis.
    pub n_steps: u64,
    /// Lower bound in cm.
    pub lower: f64,
    /// Upper bound in cm.
    pub upper: f64,
    /// Cell width in cm.
    pub step: f64,
}

impl Axis {
    /// Construct an axis from its cell count, lower bound and cell width,
    /// deriving a consistent upper bound.
    pub fn new(n_steps: u64, lower: f64, step: f64) -> Self {
        Self {
            n_steps,
            lower,
            upper: lower + n_steps as f64 * step,
            step,
        }
    }

    // The bound the stored upper value is checked against.
    fn computed_upper(&self) -> f64 {
        self.lower + self.n_steps as f64 * self.step
    }
}

/// Library metadata: everything in the file preamble except the payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    /// Format version; see [`CURRENT_VERSION`] and [`UNDEFINED_VERSION`].
    pub version: u32,
    /// Free-form configuration text recorded by the producer.
    pub configuration: String,
    /// Total number of visibility entries in the payload.
    pub n_entries: u64,
    /// Number of optical channels per voxel.
    pub n_channels: u64,
    /// Number of voxels in the grid.
    pub n_voxels: u64,
    /// The spatial grid axes, in x, y, z order.
    pub axes: [Axis; 3],
}

impl Header {
    /// Construct a header with counts derived from the axes and channel
    /// count, at the current version.
    pub fn new(configuration: impl Into<String>, n_channels: u64, axes: [Axis; 3]) -> Self {
        let n_voxels = axes
            .iter()
            .fold(1u64, |product, axis| product.saturating_mul(axis.n_steps));
        Self {
            version: CURRENT_VERSION,
            configuration: configuration.into(),
            n_entries: n_voxels.saturating_mul(n_channels),
            n_channels,
            n_voxels,
            axes,
        }
    }

    /// Check every cross-field invariant.
    ///
    /// Shared by the reader (after parsing) and the writer (before emitting).
    /// Every violation names the offending field and reports the observed and
    /// expected values.
    pub fn validate(&self) -> Result<(), Error> {
        if self.version != CURRENT_VERSION {
            return Err(Error::VersionMismatchError {
                expected: CURRENT_VERSION,
                received: self.version,
            });
        }

        let computed_entries = self.n_voxels.saturating_mul(self.n_channels);
        if self.n_entries != computed_entries {
            return Err(Error::EntryCountMismatchError {
                declared: self.n_entries,
                computed: computed_entries,
            });
        }

        let computed_voxels = self
            .axes
            .iter()
            .fold(1u64, |product, axis| product.saturating_mul(axis.n_steps));
        if self.n_voxels != computed_voxels {
            return Err(Error::VoxelCountMismatchError {
                declared: self.n_voxels,
                computed: computed_voxels,
            });
        }

        for (axis, name) in self.axes.iter().zip(AXIS_NAMES) {
            let computed = axis.computed_upper();
            let tolerance = RELATIVE_TOLERANCE * f64::max(axis.upper.abs(), computed.abs());
            if (axis.upper - computed).abs() > tolerance {
                return Err(Error::AxisRangeMismatchError {
                    axis: name,
                    upper: axis.upper,
                    computed,
                });
            }
        }

        Ok(())
    }

    /// Resolve the undefined-version sentinel to the current version, then
    /// validate. The writer calls this before emitting anything; nothing else
    /// is repaired silently.
    pub fn fix(&mut self) -> Result<(), Error> {
        if self.version == UNDEFINED_VERSION {
            self.version = CURRENT_VERSION;
        }
        self.validate()
    }
}
