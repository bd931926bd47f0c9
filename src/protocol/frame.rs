use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("connection closed before a full frame arrived")]
    ConnectionClosed,

    #[error("{0}")]
    Io(#[from] tokio::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("winner list is too long for a single frame")]
    TooLong,

    #[error("{0}")]
    Io(#[from] tokio::io::Error),
}

/// Reads one length-prefixed batch frame.
///
/// The wire format is a 2-byte big-endian length followed by exactly that
/// many payload bytes. A length of zero is the end-of-ingestion sentinel and
/// maps to `Ok(None)`. TCP may deliver fewer bytes than requested per read,
/// so the payload is accumulated with `read_exact`.
pub async fn read_batch<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncReadExt + Unpin,
{
    let length = match reader.read_u16().await {
        Ok(length) => length,
        Err(err) if err.kind() == tokio::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed)
        }
        Err(err) => return Err(err.into()),
    };

    if length == 0 {
        return Ok(None);
    }

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await.map_err(|err| {
        if err.kind() == tokio::io::ErrorKind::UnexpectedEof {
            FrameError::ConnectionClosed
        } else {
            FrameError::Io(err)
        }
    })?;

    Ok(Some(payload))
}

/// Writes a winner list: 2-byte big-endian count, then each winning document
/// as a 4-byte big-endian integer. `write_all` loops partial sends.
pub async fn write_winners<W>(writer: &mut W, documents: &[u32]) -> Result<(), WriteError>
where
    W: AsyncWriteExt + Unpin,
{
    let count: u16 = documents.len().try_into().map_err(|_| WriteError::TooLong)?;

    writer.write_u16(count).await?;
    for &document in documents {
        writer.write_u32(document).await?;
    }
    writer.flush().await?;

    Ok(())
}
