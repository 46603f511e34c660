//! Sending side of a transfer.

use super::{
    BLOCK_LIST_AAD, Context, Control, METADATA_AAD, exchange_init, expect_ready, open_lanes,
    recv_pake, unexpected,
};
use crate::error::{IntegrityError, ProtocolError, Result};
use crate::lanes::{LaneSender, join_lanes};
use crate::message::Message;
use crate::status::Phase;
use crate::transfer::TransferSummary;
use ferry_crypto::aead::AeadKey;
use ferry_crypto::hash::derive_transfer_key;
use ferry_crypto::random::session_salt;
use ferry_crypto::{Envelope, Pake, Role};
use ferry_files::{
    BlockCodec, BlockFile, BlockSkipList, FileMetaData, partition, safe_file_name,
};
use std::path::Path;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Offer the file at `path` under `codephrase`.
pub(crate) async fn send(ctx: &Context, path: &Path, codephrase: &str) -> Result<TransferSummary> {
    let config = &ctx.config;
    let block_size = config.block_size.min(ctx.connector.max_block_size());
    let mut meta = FileMetaData::from_path(path, block_size, config.compress, true).await?;
    if let Some(name) = &config.send_as {
        meta.sent_name = safe_file_name(name)?.to_string();
    }
    ctx.status.set_file(&meta.sent_name, meta.size);
    info!("Offering {} ({} bytes)", meta.sent_name, meta.size);

    let (control, observed_ip) = ctx.join_room(codephrase).await?;
    let result = run(ctx, &control, path, &meta, codephrase, observed_ip).await;
    ctx.finish(&control, result).await
}

async fn run(
    ctx: &Context,
    control: &Control,
    path: &Path,
    meta: &FileMetaData,
    codephrase: &str,
    observed_ip: Option<String>,
) -> Result<TransferSummary> {
    let config = &ctx.config;
    let peer_ip = exchange_init(control, config.curve, observed_ip).await?;

    ctx.status.set(Phase::Handshake, "Performing PAKE...");
    let mut pake = Pake::init(codephrase.as_bytes(), Role::Initiator, config.curve)?;
    control
        .send(&Message::Pake {
            state: pake.to_base64(),
        })
        .await?;
    recv_pake(control, &mut pake).await?;
    control
        .send(&Message::Pake {
            state: pake.to_base64(),
        })
        .await?;
    let session_key = pake.session_key()?;
    expect_ready(control).await?;
    debug!("PAKE verified");

    ctx.status.set(Phase::Negotiating, "Sending metadata...");
    let salt = session_salt()?;
    let key = derive_transfer_key(&session_key, &salt);
    let envelope = Envelope::seal_with_salt(&key, &meta.to_bytes()?, METADATA_AAD, &salt)?;
    control.send(&Message::Metadata { envelope }).await?;

    let skip = recv_block_list(control, &key, meta).await?;
    let plan = meta.plan();
    let pending = plan.pending(&skip);
    let skipped = plan.skipped_bytes(&skip);
    ctx.status.add_bytes(skipped);
    if !skip.is_empty() {
        info!("Receiver already has {} blocks, resuming", skip.len());
    }

    let count = config.lanes.min(pending.len().max(1));
    let count = u32::try_from(count).unwrap_or(1);
    control.send(&Message::Lanes { count }).await?;
    let lanes = open_lanes(&ctx.connector, &session_key, count, &ctx.cancel).await?;
    expect_ready(control).await?;

    let peer = peer_ip.as_deref().unwrap_or("peer");
    ctx.status
        .set(Phase::Transferring, format!("Sending (->{peer})..."));
    let started = Instant::now();
    let file = BlockFile::open_read(path).await?;
    let codec = BlockCodec::new(Some(key), meta.is_compressed);
    let mut set = JoinSet::new();
    for ((lane, transport), offsets) in (0u32..).zip(lanes).zip(partition(&pending, count as usize)) {
        let sender = LaneSender {
            lane,
            transport,
            offsets,
        };
        set.spawn(sender.run(
            file.clone(),
            plan,
            codec.clone(),
            ctx.status.clone(),
            ctx.cancel.clone(),
        ));
    }
    let transferred = join_lanes(set).await?;

    ctx.status.set(Phase::Verifying, "Verifying...");
    control
        .send(&Message::Hash {
            hash: meta.hash.clone(),
        })
        .await?;
    match control.recv("hash_ack").await? {
        Message::HashAck { ok: true } => {}
        Message::HashAck { ok: false } => return Err(IntegrityError::HashMismatch.into()),
        other => return Err(unexpected("hash_ack", &other)),
    }

    let elapsed = started.elapsed();
    ctx.status.set(Phase::Success, format!("Sent {}", meta.sent_name));
    info!("Sent {} in {:?}", meta.sent_name, elapsed);
    Ok(TransferSummary {
        file_name: meta.sent_name.clone(),
        path: path.to_path_buf(),
        size: meta.size,
        transferred,
        skipped,
        lanes: count,
        block_size: meta.block_size,
        elapsed,
        peer_ip,
    })
}

async fn recv_block_list(
    control: &Control,
    key: &AeadKey,
    meta: &FileMetaData,
) -> Result<BlockSkipList> {
    let envelope = match control.recv("block_list").await? {
        Message::BlockList { envelope } => envelope,
        other => return Err(unexpected("block_list", &other)),
    };
    let plain = envelope.open(key, BLOCK_LIST_AAD)?;
    let offsets: Vec<u64> = serde_json::from_slice(&plain)
        .map_err(|e| ProtocolError::Malformed(format!("block list: {e}")))?;
    let plan = meta.plan();
    let mut skip = BlockSkipList::new();
    for offset in offsets {
        plan.check_offset(offset)?;
        skip.insert(offset);
    }
    Ok(skip)
}
