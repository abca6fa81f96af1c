use std::path::Path;

use tokio::{
    fs::{create_dir_all, File},
    io::{AsyncWrite, BufWriter},
};
use tracing::debug;

use super::keys;
use crate::{block::BlockWriter, Error, Header};

enum Stage {
    Empty,
    HeaderWritten,
    DataWritten,
}

/// Staged library writer.
///
/// A library is emitted in three steps that must happen in order: the header
/// blocks, the visibility data, and the end marker. Driving the writer out
/// of order is a misconfiguration error and nothing is emitted for the
/// offending call. No seeking back is ever required; the output only needs
/// to be a plain byte sink.
pub struct LibraryWriter<W> {
    blocks: BlockWriter<W>,
    stage: Stage,
    n_entries: u64,
}

impl<W> LibraryWriter<W> {
    /// Construct a new [`LibraryWriter`].
    pub fn new(writer: W) -> Self {
        Self {
            blocks: BlockWriter::new(writer),
            stage: Stage::Empty,
            n_entries: 0,
        }
    }
}

impl<W> LibraryWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Write the header blocks: version, configuration, counts and axes.
    ///
    /// The header is validated first; the undefined-version sentinel is
    /// resolved to the current version, anything else inconsistent is
    /// rejected. Returns the number of bytes written.
    pub async fn write_header(&mut self, header: &Header) -> Result<usize, Error> {
        if !matches!(self.stage, Stage::Empty) {
            return Err(Error::DuplicateBlockError { key: keys::LIBRARY });
        }

        let mut header = header.clone();
        header.fix()?;

        let mut written = self
            .blocks
            .write_version(keys::LIBRARY, header.version)
            .await?;
        written += self
            .blocks
            .write_string(keys::CONFIGURATION, &header.configuration)
            .await?;
        written += self.blocks.write_number(keys::ENTRIES, header.n_entries).await?;
        written += self
            .blocks
            .write_number(keys::CHANNELS, header.n_channels)
            .await?;
        written += self.blocks.write_number(keys::VOXELS, header.n_voxels).await?;

        for (axis, axis_keys) in header.axes.iter().zip(&keys::AXES) {
            written += self.blocks.write_bookmark(axis_keys.open).await?;
            written += self.blocks.write_number(axis_keys.steps, axis.n_steps).await?;
            written += self.blocks.write_number(axis_keys.lower, axis.lower).await?;
            written += self.blocks.write_number(axis_keys.upper, axis.upper).await?;
            written += self.blocks.write_number(axis_keys.step, axis.step).await?;
            written += self.blocks.write_bookmark(axis_keys.close).await?;
        }

        self.n_entries = header.n_entries;
        self.stage = Stage::HeaderWritten;
        Ok(written)
    }

    /// Write the visibility payload, streamed straight from the caller's
    /// slice. The slice length must match the entry count declared in the
    /// header. Returns the number of bytes written.
    pub async fn write_data(&mut self, values: &[f32]) -> Result<usize, Error> {
        match self.stage {
            Stage::Empty => return Err(Error::MissingHeaderError),
            Stage::DataWritten => return Err(Error::DuplicateBlockError { key: keys::DATA }),
            Stage::HeaderWritten => {}
        }
        if values.len() as u64 != self.n_entries {
            return Err(Error::PayloadLengthMismatchError {
                declared: self.n_entries,
                received: values.len() as u64,
            });
        }

        let written = self.blocks.write_scalars(keys::DATA, values).await?;
        self.stage = Stage::DataWritten;
        Ok(written)
    }

    /// Write the end marker, flush, and return the inner writer.
    pub async fn finish(mut self) -> Result<W, Error> {
        match self.stage {
            Stage::Empty => return Err(Error::MissingHeaderError),
            Stage::HeaderWritten => return Err(Error::MissingDataError),
            Stage::DataWritten => {}
        }
        self.blocks.write_bookmark(keys::END).await?;
        self.blocks.finish().await
    }
}

/// Write a complete library file.
///
/// The parent directory is created when absent. The payload slice length
/// must match the entry count declared in the header.
pub async fn write_library(
    path: impl AsRef<Path>,
    header: &Header,
    values: &[f32],
) -> Result<(), Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent).await?;
        }
    }

    let file = File::create(path).await?;
    let mut writer = LibraryWriter::new(BufWriter::new(file));
    writer.write_header(header).await?;
    writer.write_data(values).await?;
    writer.finish().await?;
    debug!(path = %path.display(), n_entries = values.len(), "wrote library");
    Ok(())
}
