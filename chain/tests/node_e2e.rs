//! End-to-end node tests: real peers over loopback sockets, with a
//! minimal in-test tracker speaking the directory protocol.
//!
//! Difficulty 1 keeps mining near-instant; peers bind ephemeral ports.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use chain::app;
use chain::net::framed::FrameReader;
use chain::net::wire::{self, FrameTag, PeerAddr};
use chain::types::PeerId;
use chain::{NodeConfig, Peer};

type Table = Arc<Mutex<HashMap<PeerId, PeerAddr>>>;

/// Starts a loopback tracker good enough for tests: JOIN/ID, LIST,
/// GET-PEER, LEAVE, deregistration on disconnect.
async fn spawn_test_tracker() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind tracker");
    let port = listener.local_addr().expect("tracker addr").port();
    let table: Table = Arc::default();

    tokio::spawn(async move {
        loop {
            let Ok((stream, addr)) = listener.accept().await else {
                break;
            };
            tokio::spawn(tracker_session(table.clone(), stream, addr.ip()));
        }
    });

    port
}

async fn tracker_session(table: Table, stream: TcpStream, ip: IpAddr) {
    let mut frame = FrameReader::new(stream);

    let Ok(Some(line)) = frame.read_line().await else {
        return;
    };
    if line != b"JOIN" {
        return;
    }
    let Ok(Some(port_line)) = frame.read_line().await else {
        return;
    };
    let Some(port) = std::str::from_utf8(&port_line)
        .ok()
        .and_then(|raw| raw.trim().parse::<u16>().ok())
    else {
        return;
    };
    let Some(peer_id) = read_identity(&mut frame, "ID").await else {
        return;
    };

    table
        .lock()
        .await
        .insert(peer_id.clone(), PeerAddr { ip, port });
    send_list(&table, &mut frame, &peer_id).await;

    loop {
        let Ok(Some(line)) = frame.read_line().await else {
            break;
        };
        let Ok(tokens) = wire::split_line(&line) else {
            break;
        };
        match tokens.first().map(String::as_str) {
            Some("LEAVE") => break,
            Some("LIST") => {
                let Some(asking) = read_counted(&mut frame, &tokens).await else {
                    break;
                };
                send_list(&table, &mut frame, &asking).await;
            }
            Some("GET-PEER") => {
                let Some(wanted) = read_counted(&mut frame, &tokens).await else {
                    break;
                };
                let answer = match table.lock().await.get(&wanted) {
                    Some(addr) => addr.port.to_string(),
                    None => "-1".to_string(),
                };
                let response = format!("PEER-PORT\n{answer}\n");
                if frame.get_mut().write_all(response.as_bytes()).await.is_err() {
                    break;
                }
            }
            _ => {}
        }
    }

    table.lock().await.remove(&peer_id);
}

async fn read_identity(frame: &mut FrameReader<TcpStream>, verb: &str) -> Option<PeerId> {
    let line = frame.read_line().await.ok().flatten()?;
    let tokens = wire::split_line(&line).ok()?;
    if tokens.first().map(String::as_str) != Some(verb) {
        return None;
    }
    read_counted(frame, &tokens).await
}

async fn read_counted(frame: &mut FrameReader<TcpStream>, tokens: &[String]) -> Option<PeerId> {
    let len = wire::counted_len(tokens).ok()?;
    let bytes = frame.read_exact(len).await.ok().flatten()?;
    PeerId::from_wire_bytes(bytes)
}

async fn send_list(table: &Table, frame: &mut FrameReader<TcpStream>, exclude: &PeerId) {
    let peers: Vec<PeerAddr> = table
        .lock()
        .await
        .iter()
        .filter(|(peer_id, _)| *peer_id != exclude)
        .map(|(_, addr)| *addr)
        .collect();
    let response = format!("PEERS\n{}\n", wire::format_peer_list(&peers));
    let _ = frame.get_mut().write_all(response.as_bytes()).await;
}

fn options() -> Vec<String> {
    vec!["yes".to_string(), "no".to_string()]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mined_blocks_replicate_to_the_other_peer() {
    let tracker_port = spawn_test_tracker().await;

    let peer_a = Peer::start(0, "127.0.0.1", tracker_port, NodeConfig::new(1))
        .await
        .expect("peer a starts");
    let peer_b = Peer::start(0, "127.0.0.1", tracker_port, NodeConfig::new(1))
        .await
        .expect("peer b starts");

    app::create_poll(&peer_a, "lunch", options()).await;

    let deadline = Instant::now() + Duration::from_secs(60);
    loop {
        let chain_a = peer_a.snapshot_chain().await;
        let chain_b = peer_b.snapshot_chain().await;
        if chain_a.len() == 1 && chain_b.len() == 1 && chain_a[0].hash == chain_b[0].hash {
            let name = chain_b[0].txns[0].data.created_poll_name();
            assert_eq!(name, Some("lunch"));
            break;
        }
        assert!(
            Instant::now() < deadline,
            "peers did not converge: a={} b={}",
            chain_a.len(),
            chain_b.len()
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    peer_a.shutdown().await;
    peer_b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn healed_partition_adopts_longer_chain_and_remines_own_transaction() {
    let tracker_port = spawn_test_tracker().await;

    // Suppress every broadcast: the two peers mine in mutual isolation,
    // like a partition with the tracker still reachable.
    let mut config = NodeConfig::new(1);
    config.faults.broadcast_freq = Some(u64::MAX);

    let peer_a = Peer::start(0, "127.0.0.1", tracker_port, config.clone())
        .await
        .expect("peer a starts");
    let peer_b = Peer::start(0, "127.0.0.1", tracker_port, config)
        .await
        .expect("peer b starts");

    app::create_poll(&peer_b, "bob-1", options()).await;
    app::create_poll(&peer_b, "bob-2", options()).await;
    app::create_poll(&peer_a, "alice-1", options()).await;

    // Wait for both sides of the fork to exist.
    let deadline = Instant::now() + Duration::from_secs(60);
    loop {
        let len_a = peer_a.snapshot_chain().await.len();
        let len_b = peer_b.snapshot_chain().await.len();
        if len_a == 1 && len_b == 2 {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "fork did not form: a={len_a} b={len_b}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Heal the partition by hand-delivering bob's tip block to alice.
    let bob_chain = peer_b.snapshot_chain().await;
    let bob_tip = bob_chain.last().expect("bob has a tip").clone();
    let mut stream = TcpStream::connect(("127.0.0.1", peer_a.listening_port()))
        .await
        .expect("connect to peer a");
    wire::write_block(&mut stream, &bob_tip, FrameTag::Block)
        .await
        .expect("deliver fork block");
    drop(stream);

    // Alice must fetch bob's chain, adopt it, and re-mine her own
    // transaction on top of it.
    let deadline = Instant::now() + Duration::from_secs(60);
    loop {
        let chain_a = peer_a.snapshot_chain().await;
        if chain_a.len() >= 3
            && chain_a[0].hash == bob_chain[0].hash
            && chain_a[1].hash == bob_chain[1].hash
        {
            let remined = chain_a[2].txns[0].data.created_poll_name();
            assert_eq!(remined, Some("alice-1"));
            assert_eq!(chain_a[2].txns[0].sender, *peer_a.peer_id());
            break;
        }
        assert!(
            Instant::now() < deadline,
            "fork was not resolved: a={}",
            chain_a.len()
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    peer_a.shutdown().await;
    peer_b.shutdown().await;
}
