use std::io::SeekFrom;

use byteorder::{ByteOrder, NativeEndian};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use super::{Blob, BlockInfo, MagicKey, Scalar, KEY_SIZE};
use crate::Error;

/// Low-level block reader.
///
/// Wraps a seekable stream and reads tagged blocks from it. Key validation
/// is opt-in per call: the `read_*` methods parse unconditionally (the peek
/// path), while the `expect_*` methods also check the key and fail with
/// [`Error::KeyMismatchError`] on a mismatch. Either way the bytes are
/// consumed; a caller that wants to retry must seek back itself.
pub struct BlockReader<R> {
    reader: R,
}

impl<R> BlockReader<R> {
    /// Constructs a new [`BlockReader`].
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Get a mutable reference to the inner reader.
    pub fn get_inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R> BlockReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Read the next four bytes as a [`MagicKey`].
    pub async fn read_key(&mut self) -> Result<MagicKey, Error> {
        let mut key = [0u8; KEY_SIZE];
        self.reader.read_exact(&mut key).await?;
        Ok(MagicKey::from(key))
    }

    /// Read the next block header, leaving the stream at the first payload
    /// byte.
    pub async fn read_info(&mut self) -> Result<BlockInfo, Error> {
        let key = self.read_key().await?;
        let mut size = [0u8; 8];
        self.reader.read_exact(&mut size).await?;
        Ok(BlockInfo::new(key, NativeEndian::read_u64(&size)))
    }

    /// Read the next block header and validate its key.
    ///
    /// `context` only shows up in the error message.
    pub async fn expect_info(
        &mut self,
        expected: MagicKey,
        context: &str,
    ) -> Result<BlockInfo, Error> {
        let info = self.read_info().await?;
        if info.key != expected {
            return Err(Error::KeyMismatchError {
                expected,
                found: info.key,
                context: context.to_owned(),
            });
        }
        Ok(info)
    }

    /// Read a version block: a key and one word, with no size field.
    pub async fn read_version(&mut self) -> Result<(MagicKey, u32), Error> {
        let key = self.read_key().await?;
        let mut version = [0u8; 4];
        self.reader.read_exact(&mut version).await?;
        Ok((key, NativeEndian::read_u32(&version)))
    }

    /// Read a version block and validate its key.
    pub async fn expect_version(&mut self, expected: MagicKey, context: &str) -> Result<u32, Error> {
        let (key, version) = self.read_version().await?;
        if key != expected {
            return Err(Error::KeyMismatchError {
                expected,
                found: key,
                context: context.to_owned(),
            });
        }
        Ok(version)
    }

    /// Read a bookmark block and validate its key.
    ///
    /// Bookmarks carry no payload; a non-zero size under the expected key is
    /// a schema violation. The generic [`BlockReader::read_info`] path stays
    /// agnostic and treats such a block as an ordinary one.
    pub async fn expect_bookmark(&mut self, expected: MagicKey, context: &str) -> Result<(), Error> {
        let info = self.expect_info(expected, context).await?;
        if info.size != 0 {
            return Err(Error::NonEmptyBookmarkError {
                key: info.key,
                size: info.size,
            });
        }
        Ok(())
    }

    /// Read the payload of an already-parsed string block.
    ///
    /// The stored size is the authoritative length; padding NULs are
    /// consumed but are not part of the value.
    pub async fn read_string_payload(&mut self, info: &BlockInfo) -> Result<String, Error> {
        let mut payload = vec![0u8; info.size as usize];
        self.reader.read_exact(&mut payload).await?;
        self.read_padding(info).await?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    /// Read a string block and validate its key.
    pub async fn expect_string(&mut self, expected: MagicKey, context: &str) -> Result<String, Error> {
        let info = self.expect_info(expected, context).await?;
        self.read_string_payload(&info).await
    }

    /// Read the payload of an already-parsed number block.
    ///
    /// The declared size must match the scalar's stored width exactly.
    pub async fn read_number_payload<T: Scalar>(&mut self, info: &BlockInfo) -> Result<T, Error> {
        if info.size != T::STORED_SIZE as u64 {
            return Err(Error::SizeMismatchError {
                key: info.key,
                declared: info.size,
                expected: T::STORED_SIZE as u64,
            });
        }
        let mut payload = vec![0u8; T::STORED_SIZE];
        self.reader.read_exact(&mut payload).await?;
        Ok(T::read_from(&payload))
    }

    /// Read a number block and validate its key.
    pub async fn expect_number<T: Scalar>(
        &mut self,
        expected: MagicKey,
        context: &str,
    ) -> Result<T, Error> {
        let info = self.expect_info(expected, context).await?;
        self.read_number_payload(&info).await
    }

    /// Read the payload of an already-parsed block as an opaque [`Blob`].
    pub async fn read_blob_payload(&mut self, info: &BlockInfo) -> Result<Blob, Error> {
        let mut payload = vec![0u8; info.size as usize];
        self.reader.read_exact(&mut payload).await?;
        self.read_padding(info).await?;
        Ok(Blob::new(info.key, payload.into()))
    }

    /// Read a blob block and validate its key.
    pub async fn expect_blob(&mut self, expected: MagicKey, context: &str) -> Result<Blob, Error> {
        let info = self.expect_info(expected, context).await?;
        self.read_blob_payload(&info).await
    }

    // Padding is at most a word minus one byte.
    async fn read_padding(&mut self, info: &BlockInfo) -> Result<(), Error> {
        let mut padding = [0u8; 3];
        let length = info.padding_size() as usize;
        self.reader.read_exact(&mut padding[..length]).await?;
        Ok(())
    }
}

impl<R> BlockReader<R>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    /// Advance the stream past the payload and padding of an
    /// already-parsed block.
    pub async fn skip_payload(&mut self, info: &BlockInfo) -> Result<(), Error> {
        self.reader
            .seek(SeekFrom::Current(info.aligned_size() as i64))
            .await?;
        Ok(())
    }

    /// Read the next block header and skip its payload, returning the
    /// header.
    pub async fn skip_block(&mut self) -> Result<BlockInfo, Error> {
        let info = self.read_info().await?;
        self.skip_payload(&info).await?;
        Ok(info)
    }

    /// The current byte offset into the stream.
    pub async fn stream_position(&mut self) -> Result<u64, Error> {
        Ok(self.reader.stream_position().await?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, ErrorKind};

    use super::BlockReader;
    use crate::{BlockInfo, Error, MagicKey};

    fn encoded_block(key: &str, payload: &[u8]) -> Vec<u8> {
        let mut image = vec![];
        image.extend_from_slice(MagicKey::new(key).as_bytes());
        image.extend_from_slice(&(payload.len() as u64).to_ne_bytes());
        image.extend_from_slice(payload);
        image.resize(image.len() + crate::padding_size(payload.len() as u64) as usize, 0);
        image
    }

    #[tokio::test]
    async fn info_roundtrip() {
        let image = encoded_block("STR1", b"String data 1");
        let mut reader = BlockReader::new(Cursor::new(image));

        let info = reader.read_info().await.unwrap();
        assert_eq!(info, BlockInfo::new(MagicKey::new("STR1"), 13));
        assert_eq!(reader.read_string_payload(&info).await.unwrap(), "String data 1");
    }

    #[tokio::test]
    async fn cursor_advances_by_aligned_size() {
        let mut image = encoded_block("STR1", b"String data 1");
        image.extend_from_slice(&encoded_block("MRK1", b""));
        let mut reader = BlockReader::new(Cursor::new(image));

        let info = reader.read_info().await.unwrap();
        reader.read_string_payload(&info).await.unwrap();
        // 12-byte header plus the 13-byte payload rounded up to 16.
        assert_eq!(reader.stream_position().await.unwrap(), 12 + 16);

        reader.expect_bookmark(MagicKey::new("MRK1"), "marker").await.unwrap();
        assert_eq!(reader.stream_position().await.unwrap(), 12 + 16 + 12);
    }

    #[tokio::test]
    async fn skip_lands_where_read_does() {
        let mut image = encoded_block("STR1", b"String data 1");
        image.extend_from_slice(&encoded_block("STR2", b"String data 2"));

        let mut read_side = BlockReader::new(Cursor::new(image.clone()));
        let info = read_side.read_info().await.unwrap();
        read_side.read_string_payload(&info).await.unwrap();
        let after_read = read_side.stream_position().await.unwrap();

        let mut skip_side = BlockReader::new(Cursor::new(image));
        skip_side.skip_block().await.unwrap();
        let after_skip = skip_side.stream_position().await.unwrap();

        assert_eq!(after_read, after_skip);
        let next = skip_side.read_info().await.unwrap();
        assert_eq!(next.key, MagicKey::new("STR2"));
    }

    #[tokio::test]
    async fn key_mismatch() {
        let image = encoded_block("STR1", b"String data 1");
        let mut reader = BlockReader::new(Cursor::new(image));

        let error = reader
            .expect_info(MagicKey::new("NUM1"), "a number that is not there")
            .await;
        assert!(matches!(
            error,
            Err(Error::KeyMismatchError { expected, found, .. })
                if expected == MagicKey::new("NUM1") && found == MagicKey::new("STR1")
        ));
    }

    #[tokio::test]
    async fn bookmark_with_payload() {
        let image = encoded_block("MRK1", b"oops");
        let mut reader = BlockReader::new(Cursor::new(image));

        let error = reader.expect_bookmark(MagicKey::new("MRK1"), "marker").await;
        assert!(matches!(
            error,
            Err(Error::NonEmptyBookmarkError { size: 4, .. })
        ));
    }

    #[tokio::test]
    async fn number_size_mismatch() {
        let image = encoded_block("NUM1", &1u64.to_ne_bytes());
        let mut reader = BlockReader::new(Cursor::new(image));

        let error = reader
            .expect_number::<u32>(MagicKey::new("NUM1"), "a narrower number")
            .await;
        assert!(matches!(
            error,
            Err(Error::SizeMismatchError {
                declared: 8,
                expected: 4,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn exhausted_stream() {
        let mut reader = BlockReader::new(Cursor::new(vec![]));
        let error = reader.skip_block().await;
        assert!(matches!(
            error,
            Err(Error::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof
        ));
    }

    #[tokio::test]
    async fn short_header() {
        // A truncated size field is a short read, not a parse result.
        let mut reader = BlockReader::new(Cursor::new(b"STR1\x05\x00".to_vec()));
        let error = reader.read_info().await;
        assert!(matches!(
            error,
            Err(Error::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof
        ));
    }
}
