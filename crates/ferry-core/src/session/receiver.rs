//! Receiving side of a transfer.

use super::{
    BLOCK_LIST_AAD, Context, Control, METADATA_AAD, exchange_init, open_lanes, recv_pake,
    unexpected,
};
use crate::config::{MAX_BLOCK_SIZE, MAX_LANES};
use crate::error::{Error, IntegrityError, ProtocolError, Result};
use crate::lanes::{LaneReceiver, join_lanes};
use crate::message::Message;
use crate::status::Phase;
use crate::transfer::{AcceptFn, Offer, TransferSummary};
use ferry_crypto::constant_time::ct_eq;
use ferry_crypto::hash::derive_transfer_key;
use ferry_crypto::{Envelope, Pake, Role};
use ferry_files::{BlockCodec, BlockFile, FileMetaData, Sidecar, hasher, safe_file_name, sidecar};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Accept the file offered under `codephrase`.
pub(crate) async fn receive(
    ctx: &Context,
    codephrase: &str,
    accept: &AcceptFn,
) -> Result<TransferSummary> {
    let (control, observed_ip) = ctx.join_room(codephrase).await?;
    let mut dest = None;
    let result = run(ctx, &control, codephrase, observed_ip, accept, &mut dest).await;
    if let (Err(e), Some(dest)) = (&result, &dest) {
        if e.is_integrity() && !ctx.config.debug {
            discard(dest).await;
        }
    }
    ctx.finish(&control, result).await
}

async fn discard(dest: &Path) {
    warn!("Removing corrupt file {}", dest.display());
    if let Err(e) = tokio::fs::remove_file(dest).await {
        warn!("Could not remove {}: {}", dest.display(), e);
    }
    if let Err(e) = sidecar::remove(dest).await {
        warn!("Could not remove sidecar for {}: {}", dest.display(), e);
    }
}

async fn run(
    ctx: &Context,
    control: &Control,
    codephrase: &str,
    observed_ip: Option<String>,
    accept: &AcceptFn,
    dest_out: &mut Option<PathBuf>,
) -> Result<TransferSummary> {
    let config = &ctx.config;
    let peer_ip = exchange_init(control, config.curve, observed_ip).await?;

    ctx.status.set(Phase::Handshake, "Performing PAKE...");
    let mut pake = Pake::init(codephrase.as_bytes(), Role::Responder, config.curve)?;
    recv_pake(control, &mut pake).await?;
    control
        .send(&Message::Pake {
            state: pake.to_base64(),
        })
        .await?;
    recv_pake(control, &mut pake).await?;
    let session_key = pake.session_key()?;
    debug!("PAKE verified");
    control.send(&Message::Ready).await?;

    ctx.status.set(Phase::Negotiating, "Receiving metadata...");
    let envelope = match control.recv("metadata").await? {
        Message::Metadata { envelope } => envelope,
        other => return Err(unexpected("metadata", &other)),
    };
    let salt = envelope
        .salt
        .as_deref()
        .ok_or_else(|| ProtocolError::Malformed("metadata carries no salt".into()))?;
    let key = derive_transfer_key(&session_key, salt);
    let meta = FileMetaData::from_bytes(&envelope.open(&key, METADATA_AAD)?)?;
    check_metadata(&meta)?;

    let dest = config.out_dir.join(safe_file_name(&meta.sent_name)?);
    *dest_out = Some(dest.clone());
    let skip = sidecar::load(&dest, &meta).await?;
    let resuming = skip.is_some();
    let skip = skip.unwrap_or_default();
    let plan = meta.plan();
    let skipped = plan.skipped_bytes(&skip);

    let offer = Offer {
        file_name: meta.sent_name.clone(),
        size: meta.size,
        destination: dest.clone(),
        exists: tokio::fs::try_exists(&dest).await.unwrap_or(false),
        resuming,
        already_have: skipped,
    };
    if !accept(&offer) {
        info!("Refused {}", meta.sent_name);
        return Err(ProtocolError::Refused.into());
    }
    ctx.status.set_file(&meta.sent_name, meta.size);
    ctx.status.add_bytes(skipped);
    if resuming {
        info!("Resuming {}: {} blocks already on disk", meta.sent_name, skip.len());
    }

    let offsets: Vec<u64> = skip.iter().copied().collect();
    let list = serde_json::to_vec(&offsets)
        .map_err(|e| ProtocolError::Malformed(format!("block list: {e}")))?;
    let envelope = Envelope::seal(&key, &list, BLOCK_LIST_AAD)?;
    control.send(&Message::BlockList { envelope }).await?;

    let count = match control.recv("lanes").await? {
        Message::Lanes { count } if count >= 1 && count as usize <= MAX_LANES => count,
        Message::Lanes { count } => {
            return Err(ProtocolError::Malformed(format!("bad lane count {count}")).into());
        }
        other => return Err(unexpected("lanes", &other)),
    };
    let file = BlockFile::open_write(&dest, meta.size).await?;
    let progress = Arc::new(Sidecar::open(&dest, &meta, resuming).await?);
    let lanes = open_lanes(&ctx.connector, &session_key, count, &ctx.cancel).await?;
    control.send(&Message::Ready).await?;

    let peer = peer_ip.as_deref().unwrap_or("peer");
    ctx.status
        .set(Phase::Transferring, format!("Receiving (<-{peer})..."));
    let started = Instant::now();
    let codec = BlockCodec::new(Some(key), meta.is_compressed).with_max_block(meta.block_size as usize);
    let mut set = JoinSet::new();
    for (lane, transport) in (0u32..).zip(lanes) {
        let receiver = LaneReceiver { lane, transport };
        set.spawn(receiver.run(
            file.clone(),
            plan,
            codec.clone(),
            Arc::clone(&progress),
            ctx.status.clone(),
            ctx.cancel.clone(),
            config.timeouts.message,
        ));
    }
    let transferred = join_lanes(set).await?;

    ctx.status.set(Phase::Verifying, "Verifying...");
    let announced = match control.recv("hash").await? {
        Message::Hash { hash } => hex::decode(&hash)
            .map_err(|e| ProtocolError::Malformed(format!("file hash: {e}")))?,
        other => return Err(unexpected("hash", &other)),
    };
    file.sync().await?;
    let actual = hasher::hash_file(&dest).await?;
    let total = transferred + skipped;
    let size_ok = total == meta.size;
    let hash_ok = ct_eq(&actual, &announced) && ct_eq(&actual, &meta.hash_bytes()?);
    control
        .send(&Message::HashAck {
            ok: size_ok && hash_ok,
        })
        .await?;
    if !size_ok {
        return Err(IntegrityError::SizeMismatch {
            expected: meta.size,
            actual: total,
        }
        .into());
    }
    if !hash_ok {
        return Err(IntegrityError::HashMismatch.into());
    }

    sidecar::remove(&dest).await?;
    let elapsed = started.elapsed();
    ctx.status
        .set(Phase::Success, format!("Received {}", meta.sent_name));
    info!("Received {} into {}", meta.sent_name, dest.display());
    Ok(TransferSummary {
        file_name: meta.sent_name,
        path: dest,
        size: meta.size,
        transferred,
        skipped,
        lanes: count,
        block_size: meta.block_size,
        elapsed,
        peer_ip,
    })
}

fn check_metadata(meta: &FileMetaData) -> Result<()> {
    if !meta.is_encrypted {
        return Err(ProtocolError::Malformed("unencrypted transfers are not accepted".into()).into());
    }
    if meta.is_dir {
        return Err(ProtocolError::Malformed("directories are not transferred".into()).into());
    }
    if meta.block_size > MAX_BLOCK_SIZE {
        return Err(ProtocolError::Malformed(format!(
            "block size {} exceeds {MAX_BLOCK_SIZE}",
            meta.block_size
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> FileMetaData {
        FileMetaData {
            name: "a.txt".into(),
            sent_name: "a.txt".into(),
            size: 10,
            hash: "00".repeat(32),
            mod_time: 0,
            is_dir: false,
            is_compressed: true,
            is_encrypted: true,
            block_size: 1024,
        }
    }

    #[test]
    fn test_check_metadata() {
        assert!(check_metadata(&meta()).is_ok());

        let plain = FileMetaData {
            is_encrypted: false,
            ..meta()
        };
        assert!(matches!(
            check_metadata(&plain),
            Err(Error::Protocol(ProtocolError::Malformed(_)))
        ));

        let huge = FileMetaData {
            block_size: MAX_BLOCK_SIZE + 1,
            ..meta()
        };
        assert!(check_metadata(&huge).is_err());
    }
}
