use std::sync::Arc;

use tokio::{net::TcpListener, sync::broadcast};

use crate::{client, draw::DrawGate, store::Store};

/// State shared by every connection coordinator.
#[derive(Clone)]
pub struct Shared {
    pub store: Store,
    pub draw: Arc<DrawGate>,
}

/// Accept loop: one spawned coordinator per connection, accept never waits
/// on an in-flight coordinator. Runs until the caller stops polling it.
pub async fn run(
    listener: TcpListener,
    ctx: Shared,
    shutdown: broadcast::Sender<()>,
) -> tokio::io::Result<()> {
    loop {
        let (conn, addr) = listener.accept().await?;
        tracing::debug!(%addr, "accepted connection");
        tokio::spawn(client::handle(conn, ctx.clone(), shutdown.subscribe()));
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, time::Duration};

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
        time::timeout,
    };

    use super::*;
    use crate::protocol::{ACK, NACK};

    async fn start_server(agencies: usize) -> (SocketAddr, Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("bets.csv"));
        let ctx = Shared {
            store: store.clone(),
            draw: Arc::new(DrawGate::new(agencies, store.clone())),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, _) = broadcast::channel(1);
        tokio::spawn(run(listener, ctx, shutdown));

        (addr, store, dir)
    }

    async fn connect(addr: SocketAddr, agency: u8) -> TcpStream {
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_u8(agency).await.unwrap();
        conn
    }

    async fn send_batch(conn: &mut TcpStream, payload: &str) -> u8 {
        conn.write_u16(payload.len() as u16).await.unwrap();
        conn.write_all(payload.as_bytes()).await.unwrap();
        conn.read_u8().await.unwrap()
    }

    async fn end_ingestion(conn: &mut TcpStream) {
        conn.write_u16(0).await.unwrap();
    }

    async fn collect_winners(conn: &mut TcpStream) -> Vec<u32> {
        let count = conn.read_u16().await.unwrap();
        let mut winners = Vec::with_capacity(count as usize);
        for _ in 0..count {
            winners.push(conn.read_u32().await.unwrap());
        }

        // close handshake, then the server closes the socket
        conn.write_u8(0).await.unwrap();
        assert!(conn.read_u8().await.is_err());

        winners
    }

    #[tokio::test]
    async fn two_agencies_full_draw_cycle() {
        let (addr, _store, _dir) = start_server(2).await;

        let mut first = connect(addr, 1).await;
        let mut second = connect(addr, 2).await;

        let ack = send_batch(
            &mut first,
            "Ana,Diaz,111,1990-01-01,1;Bea,Paz,222,1991-02-02,7574",
        )
        .await;
        assert_eq!(ack, ACK);
        let ack = send_batch(&mut second, "Cleo,Ruz,333,1992-03-03,7574").await;
        assert_eq!(ack, ACK);

        end_ingestion(&mut first).await;
        end_ingestion(&mut second).await;

        assert_eq!(collect_winners(&mut first).await, vec![222]);
        assert_eq!(collect_winners(&mut second).await, vec![333]);
    }

    #[tokio::test]
    async fn no_results_until_every_agency_finishes() {
        let (addr, _store, _dir) = start_server(2).await;

        let mut first = connect(addr, 1).await;
        let mut second = connect(addr, 2).await;
        send_batch(&mut first, "Bea,Paz,222,1991-02-02,7574").await;

        end_ingestion(&mut first).await;

        // agency 2 has not sent its sentinel yet, so agency 1 must still be
        // parked at the rendezvous
        let premature = timeout(Duration::from_millis(100), first.read_u16()).await;
        assert!(premature.is_err());

        end_ingestion(&mut second).await;
        assert_eq!(collect_winners(&mut first).await, vec![222]);
        assert_eq!(collect_winners(&mut second).await, vec![]);
    }

    #[tokio::test]
    async fn malformed_batch_is_rejected_atomically() {
        let (addr, store, _dir) = start_server(1).await;

        let mut conn = connect(addr, 1).await;

        let ack = send_batch(&mut conn, "Ana,Diaz,111,1990-01-01,1;broken-record").await;
        assert_eq!(ack, NACK);
        assert_eq!(store.read_all().unwrap(), vec![]);

        // corrected retry
        let ack = send_batch(&mut conn, "Ana,Diaz,111,1990-01-01,7574").await;
        assert_eq!(ack, ACK);
        assert_eq!(store.read_all().unwrap().len(), 1);

        end_ingestion(&mut conn).await;
        assert_eq!(collect_winners(&mut conn).await, vec![111]);
    }

    #[tokio::test]
    async fn second_cycle_draws_again_without_deadlock() {
        let (addr, _store, _dir) = start_server(2).await;

        // first cycle
        let mut first = connect(addr, 1).await;
        let mut second = connect(addr, 2).await;
        send_batch(&mut first, "Ana,Diaz,111,1990-01-01,7574").await;
        end_ingestion(&mut first).await;
        end_ingestion(&mut second).await;
        assert_eq!(collect_winners(&mut first).await, vec![111]);
        assert_eq!(collect_winners(&mut second).await, vec![]);

        // second cycle with fresh connections; the store is append-only so
        // the first round's winner shows up again alongside the new one
        let mut first = connect(addr, 1).await;
        let mut second = connect(addr, 2).await;
        send_batch(&mut second, "Dan,Sol,444,1993-04-04,7574").await;
        end_ingestion(&mut first).await;
        end_ingestion(&mut second).await;
        assert_eq!(collect_winners(&mut first).await, vec![111]);
        assert_eq!(collect_winners(&mut second).await, vec![444]);
    }

    #[tokio::test]
    async fn dropped_connection_does_not_crash_its_siblings() {
        let (addr, _store, _dir) = start_server(2).await;

        // a connection that dies mid-frame never reaches the rendezvous
        let mut broken = TcpStream::connect(addr).await.unwrap();
        broken.write_u8(7).await.unwrap();
        broken.write_u16(50).await.unwrap();
        drop(broken);

        // a full cycle still completes for the agencies that behave
        let mut first = connect(addr, 1).await;
        let mut second = connect(addr, 2).await;
        send_batch(&mut first, "Ana,Diaz,111,1990-01-01,7574").await;
        end_ingestion(&mut first).await;
        end_ingestion(&mut second).await;
        assert_eq!(collect_winners(&mut first).await, vec![111]);
        assert_eq!(collect_winners(&mut second).await, vec![]);
    }
}
