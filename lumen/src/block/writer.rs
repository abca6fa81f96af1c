use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{BlockInfo, MagicKey, Scalar, INFO_SIZE, KEY_SIZE};
use crate::Error;

// Scalar payloads are encoded and flushed in bounded slices so a large
// payload never exists twice in memory.
const SCALARS_PER_CHUNK: usize = 16 * 1024;

/// Low-level block writer.
///
/// Emits tagged blocks onto a byte stream, padding every payload to the next
/// word boundary. Every write returns the number of bytes put on the stream,
/// padding included.
pub struct BlockWriter<W> {
    writer: W,
}

impl<W> BlockWriter<W> {
    /// Construct a new [`BlockWriter`].
    ///
    /// Takes a writer into which the blocks will be written.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Get a mutable reference to the inner writer.
    pub fn get_inner_mut(&mut self) -> &mut W {
        &mut self.writer
    }
}

impl<W> BlockWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Write a block header, leaving the stream at the first payload byte.
    ///
    /// The caller is responsible for following up with exactly
    /// [`BlockInfo::aligned_size`] payload and padding bytes.
    pub async fn write_info(&mut self, info: &BlockInfo) -> Result<usize, Error> {
        self.writer.write_all(info.key.as_bytes()).await?;
        self.writer.write_all(&info.size.to_ne_bytes()).await?;
        Ok(INFO_SIZE as usize)
    }

    /// Write a version block: a key and one word, with no size field.
    pub async fn write_version(&mut self, key: MagicKey, version: u32) -> Result<usize, Error> {
        self.writer.write_all(key.as_bytes()).await?;
        self.writer.write_all(&version.to_ne_bytes()).await?;
        Ok(KEY_SIZE + 4)
    }

    /// Write a bookmark block: a header with an empty payload.
    pub async fn write_bookmark(&mut self, key: MagicKey) -> Result<usize, Error> {
        self.write_info(&BlockInfo::new(key, 0)).await
    }

    /// Write a string block. The stored size is the string's byte length;
    /// no terminator is added beyond the word padding.
    pub async fn write_string(&mut self, key: MagicKey, value: &str) -> Result<usize, Error> {
        self.write_blob(key, value.as_bytes()).await
    }

    /// Write a number block holding a single scalar.
    pub async fn write_number<T: Scalar>(&mut self, key: MagicKey, value: T) -> Result<usize, Error> {
        let mut payload = [0u8; 8];
        let payload = &mut payload[..T::STORED_SIZE];
        value.write_to(payload);

        let written = self
            .write_info(&BlockInfo::new(key, T::STORED_SIZE as u64))
            .await?;
        self.writer.write_all(payload).await?;
        Ok(written + payload.len())
    }

    /// Write an opaque block from raw payload bytes.
    pub async fn write_blob(&mut self, key: MagicKey, payload: &[u8]) -> Result<usize, Error> {
        let info = BlockInfo::new(key, payload.len() as u64);
        let mut written = self.write_info(&info).await?;
        self.writer.write_all(payload).await?;
        written += payload.len();
        written += self.write_padding(info.padding_size() as usize).await?;
        Ok(written)
    }

    /// Write a block whose payload is a slice of scalars, streaming the
    /// encoding in bounded chunks straight from the caller's slice.
    pub async fn write_scalars<T: Scalar>(
        &mut self,
        key: MagicKey,
        values: &[T],
    ) -> Result<usize, Error> {
        let info = BlockInfo::new(key, (values.len() * T::STORED_SIZE) as u64);
        let mut written = self.write_info(&info).await?;

        let mut buffer = vec![0u8; values.len().min(SCALARS_PER_CHUNK) * T::STORED_SIZE];
        for chunk in values.chunks(SCALARS_PER_CHUNK) {
            let buffer = &mut buffer[..chunk.len() * T::STORED_SIZE];
            for (value, slot) in chunk.iter().zip(buffer.chunks_exact_mut(T::STORED_SIZE)) {
                value.write_to(slot);
            }
            self.writer.write_all(buffer).await?;
            written += buffer.len();
        }

        written += self.write_padding(info.padding_size() as usize).await?;
        Ok(written)
    }

    /// Write padding (`0x0` bytes).
    ///
    /// Returns the number of bytes written.
    pub async fn write_padding(&mut self, length: usize) -> Result<usize, Error> {
        for _ in 0..length {
            self.writer.write_u8(0).await?;
        }
        Ok(length)
    }

    /// Flushes and returns the inner writer.
    pub async fn finish(mut self) -> Result<W, Error> {
        self.writer.flush().await?;
        Ok(self.writer)
    }
}
