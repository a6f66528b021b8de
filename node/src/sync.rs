//! The pairwise sync protocol.
//!
//! A symmetric, length-prefixed exchange over a reliable byte stream: each
//! frame is an ASCII decimal byte length, a newline, and that many payload
//! bytes. The initiator announces its tips first; each side then ships the
//! units the other is missing. Anything malformed aborts the sync and closes
//! the stream; nothing is admitted until it is fully received and verified.

use crate::{
    driver::{Mailbox, MailboxError},
    poset::ComplianceError,
};
use commonware_codec::{DecodeExt, Encode};
use lattice_types::{Status, UnitBatch};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// The longest frame header we accept (decimal digits before the newline).
const MAX_HEADER_DIGITS: usize = 10;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    #[error("malformed payload: {0}")]
    Codec(#[from] commonware_codec::Error),
    #[error("peer {got} answered a sync intended for {expected}")]
    WrongPeer { expected: u32, got: u32 },
    #[error("peer sent a non-compliant unit: {0}")]
    NonCompliant(#[from] ComplianceError),
    #[error("driver unavailable: {0}")]
    Driver(#[from] MailboxError),
}

/// What a completed sync moved in each direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub sent: usize,
    pub received: usize,
}

/// Write one length-prefixed frame.
pub async fn write_frame<S>(stream: &mut S, payload: &[u8]) -> Result<(), SyncError>
where
    S: AsyncWrite + Unpin,
{
    let header = format!("{}\n", payload.len());
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame of at most `max` payload bytes.
pub async fn read_frame<S>(stream: &mut S, max: usize) -> Result<Vec<u8>, SyncError>
where
    S: AsyncRead + Unpin,
{
    let mut digits = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        if !byte.is_ascii_digit() || digits.len() >= MAX_HEADER_DIGITS {
            return Err(SyncError::Protocol("malformed frame header"));
        }
        digits.push(byte);
    }
    if digits.is_empty() {
        return Err(SyncError::Protocol("empty frame header"));
    }
    let length: usize = std::str::from_utf8(&digits)
        .expect("digits are ascii")
        .parse()
        .map_err(|_| SyncError::Protocol("malformed frame header"))?;
    if length > max {
        return Err(SyncError::Protocol("frame exceeds size limit"));
    }

    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Run a sync we initiated against `target`.
pub async fn run_initiator<S>(
    stream: &mut S,
    target: u32,
    max_frame: usize,
    mailbox: &mut Mailbox,
) -> Result<SyncOutcome, SyncError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Exchange tips, initiator first.
    let local = mailbox.status().await?;
    write_frame(stream, local.encode().as_ref()).await?;
    let remote = Status::decode(read_frame(stream, max_frame).await?.as_slice())?;
    if remote.process != target {
        return Err(SyncError::WrongPeer {
            expected: target,
            got: remote.process,
        });
    }
    if remote.tips.len() != local.tips.len() {
        return Err(SyncError::Protocol("status describes a different committee"));
    }

    // Ship what the peer is missing, then admit what we are.
    let units = mailbox.units_since(remote.tips).await?;
    let sent = units.len();
    write_frame(stream, UnitBatch { units }.encode().as_ref()).await?;

    let batch = UnitBatch::decode(read_frame(stream, max_frame).await?.as_slice())?;
    let received = mailbox.deliver(batch.units).await??;
    debug!(peer = target, sent, received, "sync completed");
    Ok(SyncOutcome { sent, received })
}

/// Run the answering side of a sync someone opened with us.
pub async fn run_listener<S>(
    stream: &mut S,
    me: u32,
    max_frame: usize,
    mailbox: &mut Mailbox,
) -> Result<SyncOutcome, SyncError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let remote = Status::decode(read_frame(stream, max_frame).await?.as_slice())?;
    let local = mailbox.status().await?;
    if remote.process == me {
        return Err(SyncError::Protocol("peer claims our own id"));
    }
    if remote.process as usize >= local.tips.len() {
        return Err(SyncError::Protocol("peer id outside the committee"));
    }
    if remote.tips.len() != local.tips.len() {
        return Err(SyncError::Protocol("status describes a different committee"));
    }
    write_frame(stream, local.encode().as_ref()).await?;

    let batch = UnitBatch::decode(read_frame(stream, max_frame).await?.as_slice())?;
    let received = mailbox.deliver(batch.units).await??;

    let units = mailbox.units_since(remote.tips).await?;
    let sent = units.len();
    write_frame(stream, UnitBatch { units }.encode().as_ref()).await?;
    debug!(peer = remote.process, sent, received, "sync answered");
    Ok(SyncOutcome { sent, received })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Actor, Config};
    use crate::orderer::ValidationMode;
    use crate::testing;
    use commonware_runtime::{deterministic, Metrics, Runner, Spawner};
    use std::time::Duration;

    const MAX_FRAME: usize = 10 * 1024 * 1024;

    fn driver_config(fixture: &testing::Fixture, me: u32) -> Config {
        Config {
            me,
            signer: fixture.privates[me as usize].clone(),
            share: fixture.shares[me as usize].clone(),
            committee: fixture.committee.clone(),
            mode: ValidationMode::None,
            endowments: Vec::new(),
            n_parents: 2,
            coin_level: testing::COIN_LEVEL,
            create_period: Duration::from_secs(3_600),
            max_unit_transactions: 16,
            mempool_capacity: 64,
            mailbox_size: 16,
            unit_limit: Some(0),
            level_limit: None,
            shutdown_grace: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_frame_round_trip() {
        let runner = deterministic::Runner::default();
        runner.start(|_| async move {
            let (mut a, mut b) = tokio::io::duplex(1024);
            write_frame(&mut a, b"hello frames").await.expect("write");
            let payload = read_frame(&mut b, 1024).await.expect("read");
            assert_eq!(payload, b"hello frames");

            // Zero-length frames are fine.
            write_frame(&mut a, b"").await.expect("write");
            let payload = read_frame(&mut b, 1024).await.expect("read");
            assert!(payload.is_empty());
        });
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let runner = deterministic::Runner::default();
        runner.start(|_| async move {
            let (mut a, mut b) = tokio::io::duplex(4096);
            write_frame(&mut a, &[0u8; 2048]).await.expect("write");
            let err = read_frame(&mut b, 16).await.expect_err("must reject");
            assert!(matches!(err, SyncError::Protocol(_)));
        });
    }

    #[test]
    fn test_malformed_header_rejected() {
        let runner = deterministic::Runner::default();
        runner.start(|_| async move {
            let (mut a, mut b) = tokio::io::duplex(64);
            tokio::io::AsyncWriteExt::write_all(&mut a, b"12x\n")
                .await
                .expect("write");
            let err = read_frame(&mut b, 64).await.expect_err("must reject");
            assert!(matches!(err, SyncError::Protocol(_)));
        });
    }

    #[test]
    fn test_stale_peer_catches_up() {
        let runner = deterministic::Runner::default();
        runner.start(|context| async move {
            let fixture = testing::fixture(4);

            // Grow a reference poset several rounds ahead.
            let mut rng = rand::rngs::mock::StepRng::new(7, 11);
            let mut source = testing::poset(&fixture);
            let units = testing::grow(&mut rng, &fixture, &mut source, 5);
            let total = units.len();
            let ahead_tips = source.tips();

            // The "ahead" driver holds everything; the "behind" one nothing.
            let (ahead, mut ahead_mailbox) =
                Actor::new(context.with_label("ahead"), driver_config(&fixture, 0));
            let (behind, mut behind_mailbox) =
                Actor::new(context.with_label("behind"), driver_config(&fixture, 1));
            let ahead_handle = ahead.start();
            let behind_handle = behind.start();
            ahead_mailbox
                .deliver(units)
                .await
                .expect("driver alive")
                .expect("units admit");

            // One sync: initiator = ahead, listener = behind.
            let (mut initiator_stream, mut listener_stream) = tokio::io::duplex(1 << 20);
            let mut listener_mailbox = behind_mailbox.clone();
            let listener = context.with_label("listener").spawn(move |_| async move {
                run_listener(&mut listener_stream, 1, MAX_FRAME, &mut listener_mailbox).await
            });
            let outcome = run_initiator(&mut initiator_stream, 1, MAX_FRAME, &mut ahead_mailbox)
                .await
                .expect("sync succeeds");
            assert_eq!(outcome.sent, total);
            assert_eq!(outcome.received, 0);
            let answered = listener.await.expect("listener task").expect("listener ok");
            assert_eq!(answered.received, outcome.sent);

            // The stale peer now matches the pre-sync tips of the ahead peer.
            let status = behind_mailbox.status().await.expect("driver alive");
            assert_eq!(status.tips, ahead_tips);

            ahead_handle.abort();
            behind_handle.abort();
        });
    }

    #[test]
    fn test_wrong_peer_id_aborts() {
        let runner = deterministic::Runner::default();
        runner.start(|context| async move {
            let fixture = testing::fixture(4);
            let (first, mut first_mailbox) =
                Actor::new(context.with_label("first"), driver_config(&fixture, 0));
            let (second, mut second_mailbox) =
                Actor::new(context.with_label("second"), driver_config(&fixture, 2));
            let first_handle = first.start();
            let second_handle = second.start();

            // The initiator expected to reach process 1 but process 2 answers.
            let (mut initiator_stream, mut listener_stream) = tokio::io::duplex(1 << 16);
            let listener = context.with_label("listener").spawn(move |_| async move {
                run_listener(&mut listener_stream, 2, MAX_FRAME, &mut second_mailbox).await
            });
            let err = run_initiator(&mut initiator_stream, 1, MAX_FRAME, &mut first_mailbox)
                .await
                .expect_err("must abort");
            assert!(matches!(
                err,
                SyncError::WrongPeer {
                    expected: 1,
                    got: 2
                }
            ));
            drop(initiator_stream);
            let _ = listener.await;

            first_handle.abort();
            second_handle.abort();
        });
    }
}
