use std::{io::SeekFrom, path::Path};

use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt},
    sync::Mutex,
};
use tracing::debug;

use super::{keys, AXIS_NAMES};
use crate::{
    block::{BlockReader, Scalar},
    Axis, Error, Header, CURRENT_VERSION,
};

// Every payload entry is one single-precision visibility.
const VISIBILITY_SIZE: u64 = <f32 as Scalar>::STORED_SIZE as u64;

/// Drive the fixed schema sequence, returning the parsed header and the byte
/// offset of the first payload entry.
///
/// The payload itself is skipped, never materialised. The stream must be
/// exhausted after the end marker; a further readable block is a format
/// error.
async fn read_header<R>(blocks: &mut BlockReader<R>) -> Result<(Header, u64), Error>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let version = blocks
        .expect_version(keys::LIBRARY, "library version")
        .await?;
    if version != CURRENT_VERSION {
        return Err(Error::VersionMismatchError {
            expected: CURRENT_VERSION,
            received: version,
        });
    }

    let configuration = blocks
        .expect_string(keys::CONFIGURATION, "configuration text")
        .await?;
    let n_entries = blocks.expect_number::<u64>(keys::ENTRIES, "entry count").await?;
    let n_channels = blocks
        .expect_number::<u64>(keys::CHANNELS, "channel count")
        .await?;
    let n_voxels = blocks.expect_number::<u64>(keys::VOXELS, "voxel count").await?;

    let mut axes = [Axis::default(); 3];
    for ((axis, axis_keys), name) in axes.iter_mut().zip(&keys::AXES).zip(AXIS_NAMES) {
        blocks
            .expect_bookmark(axis_keys.open, &format!("axis {name} opening"))
            .await?;
        axis.n_steps = blocks
            .expect_number::<u64>(axis_keys.steps, &format!("axis {name} step count"))
            .await?;
        axis.lower = blocks
            .expect_number::<f64>(axis_keys.lower, &format!("axis {name} lower bound"))
            .await?;
        axis.upper = blocks
            .expect_number::<f64>(axis_keys.upper, &format!("axis {name} upper bound"))
            .await?;
        axis.step = blocks
            .expect_number::<f64>(axis_keys.step, &format!("axis {name} cell width"))
            .await?;
        blocks
            .expect_bookmark(axis_keys.close, &format!("axis {name} closing"))
            .await?;
    }

    let header = Header {
        version,
        configuration,
        n_entries,
        n_channels,
        n_voxels,
        axes,
    };
    // Cross-check the counts before trusting them to size the payload.
    header.validate()?;

    let data = blocks.expect_info(keys::DATA, "visibility data").await?;
    let expected_size = n_entries.saturating_mul(VISIBILITY_SIZE);
    if data.size != expected_size {
        return Err(Error::SizeMismatchError {
            key: data.key,
            declared: data.size,
            expected: expected_size,
        });
    }
    let data_offset = blocks.stream_position().await?;
    blocks.skip_payload(&data).await?;

    blocks.expect_bookmark(keys::END, "end marker").await?;
    match blocks.read_info().await {
        Ok(info) => return Err(Error::TrailingBlockError { key: info.key }),
        Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {}
        Err(e) => return Err(e),
    }

    Ok((header, data_offset))
}

/// Random-access reader over a written library.
///
/// Construction parses and validates the whole preamble; afterwards the
/// reader holds immutable metadata plus the payload offset, and serves
/// lookups by seeking into the still-open stream. There is no caching:
/// libraries run to hundreds of millions of entries while typical access
/// patterns are sparse, so every lookup is a fresh seek and read.
///
/// Lookups may come from any number of tasks sharing one instance; the
/// stream position is guarded by a lock whose scope is exactly the
/// seek-and-read pair. Independent instances over the same file do not
/// affect each other.
pub struct LibraryReader<R> {
    header: Header,
    data_offset: u64,
    reader: Mutex<R>,
}

impl LibraryReader<File> {
    /// Open a library file and parse its header.
    ///
    /// The file handle is owned by the reader and released when the reader
    /// is dropped, or immediately when parsing fails.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = File::open(path).await?;
        Self::new(file).await
    }
}

impl<R> LibraryReader<R>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    /// Parse a library from a seekable stream positioned at its start.
    pub async fn new(reader: R) -> Result<Self, Error> {
        let mut blocks = BlockReader::new(reader);
        let (header, data_offset) = read_header(&mut blocks).await?;
        debug!(
            version = header.version,
            n_voxels = header.n_voxels,
            n_channels = header.n_channels,
            data_offset,
            "parsed library header"
        );
        Ok(Self {
            header,
            data_offset,
            reader: Mutex::new(blocks.into_inner()),
        })
    }

    /// The parsed library metadata.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Byte offset of the first payload entry.
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Read the visibility of one channel from one voxel.
    ///
    /// Out-of-range indices yield `0.0` without touching the file; callers
    /// routinely probe voxels just past the grid boundary.
    pub async fn get(&self, voxel: u64, channel: u64) -> Result<f32, Error> {
        if voxel >= self.header.n_voxels || channel >= self.header.n_channels {
            return Ok(0.0);
        }

        let entry = voxel * self.header.n_channels + channel;
        let mut value = [0u8; VISIBILITY_SIZE as usize];
        {
            let mut reader = self.reader.lock().await;
            reader
                .seek(SeekFrom::Start(self.data_offset + entry * VISIBILITY_SIZE))
                .await?;
            reader.read_exact(&mut value).await?;
        }
        Ok(f32::read_from(&value))
    }

    /// Read the visibilities of all channels of one voxel, in channel order.
    ///
    /// Returns `None` for an out-of-range voxel, again without touching the
    /// file.
    pub async fn get_voxel(&self, voxel: u64) -> Result<Option<Vec<f32>>, Error> {
        if voxel >= self.header.n_voxels {
            return Ok(None);
        }

        let mut values = vec![0u8; (self.header.n_channels * VISIBILITY_SIZE) as usize];
        {
            let mut reader = self.reader.lock().await;
            reader
                .seek(SeekFrom::Start(
                    self.data_offset + voxel * self.header.n_channels * VISIBILITY_SIZE,
                ))
                .await?;
            reader.read_exact(&mut values).await?;
        }
        Ok(Some(
            values
                .chunks_exact(VISIBILITY_SIZE as usize)
                .map(f32::read_from)
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, sync::Arc};

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::LibraryReader;
    use crate::{aligned_size, write_library, Axis, Error, Header, LibraryWriter, MagicKey};

    fn test_header() -> Header {
        Header::new(
            "test configuration",
            2,
            [
                Axis::new(2, 0.0, 32.0),
                Axis::new(2, -64.0, 64.0),
                Axis::new(2, 0.0, 128.0),
            ],
        )
    }

    fn test_payload(header: &Header) -> Vec<f32> {
        (0..header.n_entries).map(|entry| entry as f32 + 1.0).collect()
    }

    async fn library_image(header: &Header, values: &[f32]) -> Vec<u8> {
        let mut writer = LibraryWriter::new(Cursor::new(vec![]));
        writer.write_header(header).await.unwrap();
        writer.write_data(values).await.unwrap();
        writer.finish().await.unwrap().into_inner()
    }

    // Offset of the stored `NTRY` value: the version block, the
    // configuration block, and one more block header.
    fn entry_count_offset(header: &Header) -> usize {
        (8 + 12 + aligned_size(header.configuration.len() as u64) + 12) as usize
    }

    #[tokio::test]
    async fn round_trip() {
        let header = test_header();
        let payload = test_payload(&header);
        let image = library_image(&header, &payload).await;

        let reader = LibraryReader::new(Cursor::new(image)).await.unwrap();
        assert_eq!(reader.header(), &header);
        assert_eq!(reader.header().version, 1);

        for (entry, expected) in payload.iter().enumerate() {
            let entry = entry as u64;
            let voxel = entry / header.n_channels;
            let channel = entry % header.n_channels;
            assert_eq!(reader.get(voxel, channel).await.unwrap(), *expected);
        }

        assert_eq!(reader.get(3, 1).await.unwrap(), 8.0);
        assert_eq!(
            reader.get_voxel(5).await.unwrap(),
            Some(vec![11.0, 12.0])
        );
    }

    #[tokio::test]
    async fn out_of_range_is_soft() {
        let header = test_header();
        let image = library_image(&header, &test_payload(&header)).await;
        let reader = LibraryReader::new(Cursor::new(image)).await.unwrap();

        assert_eq!(reader.get(header.n_voxels, 0).await.unwrap(), 0.0);
        assert_eq!(reader.get(0, header.n_channels).await.unwrap(), 0.0);
        assert_eq!(reader.get_voxel(header.n_voxels).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupted_entry_count() {
        let header = test_header();
        let mut image = library_image(&header, &test_payload(&header)).await;

        let offset = entry_count_offset(&header);
        image[offset..offset + 8].copy_from_slice(&(header.n_entries + 1).to_ne_bytes());

        let error = LibraryReader::new(Cursor::new(image)).await;
        assert!(matches!(
            error,
            Err(Error::EntryCountMismatchError {
                declared: 17,
                computed: 16,
            })
        ));
    }

    #[tokio::test]
    async fn unsupported_version() {
        let header = test_header();
        let mut image = library_image(&header, &test_payload(&header)).await;

        // The version word sits right after the `PLIB` key.
        image[4..8].copy_from_slice(&2u32.to_ne_bytes());

        let error = LibraryReader::new(Cursor::new(image))
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(
            error,
            Error::VersionMismatchError {
                expected: 1,
                received: 2,
            }
        ));
        assert!(error.to_string().contains("unsupported version 2"));
    }

    #[tokio::test]
    async fn trailing_block_after_end_marker() {
        let header = test_header();
        let mut image = library_image(&header, &test_payload(&header)).await;

        image.extend_from_slice(MagicKey::new("MORE").as_bytes());
        image.extend_from_slice(&0u64.to_ne_bytes());

        let error = LibraryReader::new(Cursor::new(image)).await;
        assert!(matches!(
            error,
            Err(Error::TrailingBlockError { key }) if key == MagicKey::new("MORE")
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lookups_match_reference() {
        let header = Header::new(
            "concurrency check",
            8,
            [
                Axis::new(4, 0.0, 16.0),
                Axis::new(4, 0.0, 16.0),
                Axis::new(4, 0.0, 16.0),
            ],
        );
        let payload: Vec<f32> = (0..header.n_entries)
            .map(|entry| entry as f32 * 0.5 + 1.0)
            .collect();

        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("library.plib");
        write_library(&path, &header, &payload).await.unwrap();

        let reader = Arc::new(LibraryReader::open(&path).await.unwrap());
        let n_voxels = header.n_voxels;
        let n_channels = header.n_channels;

        let tasks: Vec<_> = (0..64)
            .map(|task| {
                let reader = Arc::clone(&reader);
                tokio::spawn(async move {
                    let mut rng = StdRng::seed_from_u64(task);
                    for _ in 0..250 {
                        let voxel = rng.gen_range(0..n_voxels);
                        let channel = rng.gen_range(0..n_channels);
                        let expected = (voxel * n_channels + channel) as f32 * 0.5 + 1.0;
                        let value = reader.get(voxel, channel).await.unwrap();
                        assert_eq!(value, expected, "voxel {voxel} channel {channel}");
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
    }
}
