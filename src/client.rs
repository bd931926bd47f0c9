use anyhow::Context;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::broadcast,
};

use crate::{
    protocol::{bet, frame, ACK, NACK},
    server::Shared,
    store::Store,
};

/// Drives one agency connection from accept to close.
///
/// The coordinator races the connection state machine against the shutdown
/// broadcast; either way the socket is dropped when this task returns, and a
/// failure here never affects sibling connections.
pub async fn handle(mut conn: TcpStream, ctx: Shared, mut shutdown: broadcast::Receiver<()>) {
    let peer = conn
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".into());

    tokio::select! {
        result = coordinate(&mut conn, &ctx) => match result {
            Ok(agency) => tracing::info!(%peer, agency, "connection finished"),
            Err(err) => tracing::error!(%peer, error = %err, "connection failed"),
        },
        _ = shutdown.recv() => tracing::info!(%peer, "shutdown: dropping connection"),
    }
}

// agency id, then batch ingestion, then the rendezvous, then the winner list
// and the close handshake
async fn coordinate(conn: &mut TcpStream, ctx: &Shared) -> anyhow::Result<u8> {
    let (reader, writer) = conn.split();
    let mut reader = tokio::io::BufReader::new(reader);
    let mut writer = tokio::io::BufWriter::new(writer);

    let agency = reader.read_u8().await.context("reading agency id")?;
    tracing::info!(agency, "agency identified");

    ingest(agency, &mut reader, &mut writer, &ctx.store).await?;
    tracing::info!(agency, "ingestion finished, waiting for the draw");

    let winners = ctx.draw.await_draw(agency).await;
    frame::write_winners(&mut writer, &winners)
        .await
        .context("sending winner list")?;

    // close handshake: the peer confirms receipt with a single byte before
    // we drop the socket
    reader
        .read_u8()
        .await
        .context("waiting for close acknowledgment")?;

    Ok(agency)
}

/// Reads batches until the zero-length sentinel, acknowledging each one.
///
/// A batch is all-or-nothing: any malformed record or a failed store write
/// rejects the whole batch with a nack and ingestion carries on. Only socket
/// errors abort the loop.
async fn ingest<R, W>(
    agency: u8,
    reader: &mut R,
    writer: &mut W,
    store: &Store,
) -> anyhow::Result<()>
where
    R: AsyncReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    while let Some(payload) = frame::read_batch(reader).await? {
        let status = match bet::parse_batch(agency, &payload) {
            Ok(bets) => match store.append(&bets) {
                Ok(()) => {
                    tracing::info!(agency, count = bets.len(), "batch accepted");
                    ACK
                }
                Err(err) => {
                    tracing::warn!(agency, error = %err, "batch rejected: store write failed");
                    NACK
                }
            },
            Err(err) => {
                tracing::warn!(agency, error = %err, "batch rejected: malformed record");
                NACK
            }
        };

        writer.write_u8(status).await?;
        writer.flush().await?;
    }

    Ok(())
}
