//! Bulk data lanes.
//!
//! Each lane carries a contiguous run of blocks as codec frames and ends
//! with the `magic` sentinel. On the sending side a producer task reads and
//! encodes blocks ahead of the socket through a small bounded queue.

use crate::cancel::CancelToken;
use crate::error::{Error, ProtocolError, Result};
use crate::session::join_error;
use crate::status::Status;
use ferry_files::{BlockCodec, BlockFile, BlockPlan, MAGIC, Sidecar, is_magic};
use ferry_transport::{Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, trace};

/// Encoded frames queued ahead of a lane socket.
const READ_AHEAD: usize = 8;

/// Sending half of one lane.
pub(crate) struct LaneSender {
    pub lane: u32,
    pub transport: Box<dyn Transport>,
    pub offsets: Vec<u64>,
}

impl LaneSender {
    /// Stream every block in `offsets`, then the sentinel.
    pub(crate) async fn run(
        self,
        file: BlockFile,
        plan: BlockPlan,
        codec: BlockCodec,
        status: Status,
        cancel: CancelToken,
    ) -> Result<u64> {
        let Self {
            lane,
            transport,
            offsets,
        } = self;
        debug!("Lane {} sending {} blocks", lane, offsets.len());

        let (tx, mut rx) = mpsc::channel::<Result<(Vec<u8>, usize)>>(READ_AHEAD);
        let producer = tokio::spawn(async move {
            for offset in offsets {
                let item = async {
                    let len = plan.block_len(offset)?;
                    let data = file.read_at(offset, len).await?;
                    let frame = codec.encode(offset, &data)?;
                    Ok::<_, Error>((frame, len))
                }
                .await;
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        let mut sent = 0u64;
        let result = async {
            loop {
                let next = tokio::select! {
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    next = rx.recv() => next,
                };
                let Some(item) = next else { break };
                let (frame, len) = item?;
                send(&*transport, &frame, &cancel).await?;
                sent += len as u64;
                status.add_bytes(len as u64);
            }
            send(&*transport, MAGIC, &cancel).await
        }
        .await;

        producer.abort();
        match result {
            Ok(()) => {
                trace!("Lane {} done, {} bytes", lane, sent);
                Ok(sent)
            }
            Err(e) => {
                let _ = transport.close().await;
                Err(e)
            }
        }
    }
}

async fn send(transport: &dyn Transport, frame: &[u8], cancel: &CancelToken) -> Result<()> {
    tokio::select! {
        () = cancel.cancelled() => Err(Error::Cancelled),
        res = transport.send(frame) => res.map_err(lane_gone),
    }
}

/// Receiving half of one lane.
pub(crate) struct LaneReceiver {
    pub lane: u32,
    pub transport: Box<dyn Transport>,
}

impl LaneReceiver {
    /// Write blocks until the sentinel arrives. Returns the bytes written.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn run(
        self,
        file: BlockFile,
        plan: BlockPlan,
        codec: BlockCodec,
        sidecar: Arc<Sidecar>,
        status: Status,
        cancel: CancelToken,
        idle_timeout: Duration,
    ) -> Result<u64> {
        let Self { lane, transport } = self;
        let mut written = 0u64;
        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                res = tokio::time::timeout(idle_timeout, transport.receive()) => match res {
                    Ok(frame) => frame.map_err(lane_gone)?,
                    Err(_) => return Err(ProtocolError::Timeout("block").into()),
                },
            };
            if is_magic(&frame) {
                break;
            }
            let (offset, data) = codec.decode(&frame)?;
            let expected = plan.block_len(offset)?;
            if data.len() != expected {
                return Err(ProtocolError::Malformed(format!(
                    "block at {offset} is {} bytes, expected {expected}",
                    data.len()
                ))
                .into());
            }
            let len = data.len() as u64;
            file.write_at(offset, data).await?;
            sidecar.record(offset).await?;
            written += len;
            status.add_bytes(len);
        }
        debug!("Lane {} received {} bytes", lane, written);
        Ok(written)
    }
}

fn lane_gone(e: TransportError) -> Error {
    match e {
        TransportError::Closed => ProtocolError::PeerClosed.into(),
        e => e.into(),
    }
}

/// Wait for every lane; the first failure aborts the rest. Returns the
/// total bytes the lanes moved.
pub(crate) async fn join_lanes(mut set: JoinSet<Result<u64>>) -> Result<u64> {
    let mut total = 0u64;
    while let Some(joined) = set.join_next().await {
        match joined.map_err(join_error)? {
            Ok(bytes) => total += bytes,
            Err(e) => {
                set.abort_all();
                return Err(e);
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::duplex_pair;
    use ferry_crypto::aead::AeadKey;
    use ferry_files::BlockSkipList;
    use ferry_files::FileMetaData;
    use rand::RngCore;

    async fn source(dir: &std::path::Path, size: usize) -> (std::path::PathBuf, Vec<u8>) {
        let mut data = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut data);
        let path = dir.join("source.bin");
        tokio::fs::write(&path, &data).await.unwrap();
        (path, data)
    }

    #[tokio::test]
    async fn test_lane_moves_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let (src, data) = source(dir.path(), 10_000).await;
        let meta = FileMetaData::from_path(&src, 1024, true, true).await.unwrap();
        let plan = meta.plan();
        let codec = BlockCodec::new(Some(AeadKey::new([9u8; 32])), true);

        let dest = dir.path().join("dest.bin");
        let out = BlockFile::open_write(&dest, meta.size).await.unwrap();
        let sidecar = Arc::new(Sidecar::open(&dest, &meta, false).await.unwrap());

        let (a, b) = duplex_pair();
        let sender = LaneSender {
            lane: 0,
            transport: a,
            offsets: plan.offsets().collect(),
        };
        let receiver = LaneReceiver {
            lane: 0,
            transport: b,
        };
        let input = BlockFile::open_read(&src).await.unwrap();
        let send_status = Status::new();
        let recv_status = Status::new();
        let (sent, received) = tokio::join!(
            sender.run(input, plan, codec.clone(), send_status.clone(), CancelToken::new()),
            receiver.run(
                out.clone(),
                plan,
                codec,
                Arc::clone(&sidecar),
                recv_status.clone(),
                CancelToken::new(),
                Duration::from_secs(5),
            ),
        );
        assert_eq!(sent.unwrap(), 10_000);
        assert_eq!(received.unwrap(), 10_000);
        assert_eq!(send_status.snapshot().bytes_done, 10_000);
        assert_eq!(recv_status.snapshot().bytes_done, 10_000);

        out.sync().await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);

        let skip: BlockSkipList = ferry_files::sidecar::load(&dest, &meta)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(skip.len(), 10);
    }

    #[tokio::test]
    async fn test_empty_lane_sends_only_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let (src, _) = source(dir.path(), 100).await;
        let plan = BlockPlan::new(100, 64);
        let (a, b) = duplex_pair();
        let sender = LaneSender {
            lane: 3,
            transport: a,
            offsets: Vec::new(),
        };
        let input = BlockFile::open_read(&src).await.unwrap();
        let sent = sender
            .run(
                input,
                plan,
                BlockCodec::new(None, false),
                Status::new(),
                CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(sent, 0);
        assert!(is_magic(&b.receive().await.unwrap()));
    }

    #[tokio::test]
    async fn test_receiver_rejects_wrong_length_block() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest.bin");
        let meta = FileMetaData {
            name: "dest.bin".into(),
            sent_name: "dest.bin".into(),
            size: 100,
            hash: "00".repeat(32),
            mod_time: 0,
            is_dir: false,
            is_compressed: false,
            is_encrypted: false,
            block_size: 64,
        };
        let out = BlockFile::open_write(&dest, 100).await.unwrap();
        let sidecar = Arc::new(Sidecar::open(&dest, &meta, false).await.unwrap());
        let codec = BlockCodec::new(None, false);

        let (a, b) = duplex_pair();
        a.send(&codec.encode(0, &[1u8; 10]).unwrap()).await.unwrap();
        let receiver = LaneReceiver {
            lane: 0,
            transport: b,
        };
        let result = receiver
            .run(
                out,
                meta.plan(),
                codec,
                sidecar,
                Status::new(),
                CancelToken::new(),
                Duration::from_secs(5),
            )
            .await;
        assert!(matches!(result, Err(Error::Protocol(ProtocolError::Malformed(_)))));
    }

    #[tokio::test]
    async fn test_receiver_stops_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest.bin");
        let meta = FileMetaData {
            name: "d".into(),
            sent_name: "d".into(),
            size: 10,
            hash: "00".repeat(32),
            mod_time: 0,
            is_dir: false,
            is_compressed: false,
            is_encrypted: false,
            block_size: 64,
        };
        let out = BlockFile::open_write(&dest, 10).await.unwrap();
        let sidecar = Arc::new(Sidecar::open(&dest, &meta, false).await.unwrap());
        let (_a, b) = duplex_pair();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = LaneReceiver {
            lane: 0,
            transport: b,
        }
        .run(
            out,
            meta.plan(),
            BlockCodec::new(None, false),
            sidecar,
            Status::new(),
            cancel,
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_join_lanes_sums_and_fails_fast() {
        let mut set = JoinSet::new();
        set.spawn(async { Ok(10) });
        set.spawn(async { Ok(32) });
        assert_eq!(join_lanes(set).await.unwrap(), 42);

        let mut set = JoinSet::new();
        set.spawn(async { Err(Error::Cancelled) });
        set.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        });
        assert!(matches!(join_lanes(set).await, Err(Error::Cancelled)));
    }
}
