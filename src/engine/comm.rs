//! Communication backend abstraction for the distributed engine.
//!
//! Provides a trait for message passing between grid processes
//! (point-to-point, combined exchange, broadcast, scatter/gather,
//! reductions) and a pass-through single-process implementation.

use crate::error::{GridError, Result};

/// Message tag, matched between a send and its receive.
pub type Tag = i32;

/// Completion semantics of a point-to-point send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    /// Implementation chooses between buffering and synchronizing.
    #[default]
    Standard,
    /// Completes only once the matching receive has started.
    Synchronous,
    /// The matching receive must already be posted; both sides handshake
    /// through `receive_with_mode` to guarantee it.
    Ready,
    /// Copied into a user-attached buffer and completes locally.
    Buffered,
}

/// Abstraction over inter-process communication.
///
/// Implementations: `SingleProcessComm` (pass-through), `LocalComm`
/// (in-process worker threads), `MpiComm` (via mpi crate, `distributed`
/// feature). All ranks are local to the communicator they are called on.
pub trait CommunicationBackend {
    /// This process's rank within the communicator.
    fn rank(&self) -> usize;

    /// Number of ranks in the communicator.
    fn num_ranks(&self) -> usize;

    /// Blocking send of `data` to `dest`.
    fn send(&self, dest: usize, tag: Tag, data: &[f64]) -> Result<()>;

    /// Blocking receive from `source` into `buf`. The message length must
    /// equal `buf.len()`.
    fn receive_into(&self, source: usize, tag: Tag, buf: &mut [f64]) -> Result<()>;

    /// Send with explicit completion semantics. Backends without distinct
    /// modes treat every mode as a standard send.
    fn send_with_mode(&self, dest: usize, tag: Tag, data: &[f64], _mode: SendMode) -> Result<()> {
        self.send(dest, tag, data)
    }

    /// Receive the counterpart of `send_with_mode`; `mode` must match the
    /// sender's.
    fn receive_with_mode(
        &self,
        source: usize,
        tag: Tag,
        buf: &mut [f64],
        _mode: SendMode,
    ) -> Result<()> {
        self.receive_into(source, tag, buf)
    }

    /// Send `send` to `dest` while receiving from `source` into `recv`,
    /// without deadlocking when every rank of a ring calls it at once.
    fn send_receive(
        &self,
        send: &[f64],
        dest: usize,
        recv: &mut [f64],
        source: usize,
        tag: Tag,
    ) -> Result<()>;

    /// Broadcast `buf` from `root` to every rank. On non-root ranks `buf` is
    /// overwritten; its length must match the root's.
    fn broadcast(&self, root: usize, buf: &mut [f64]) -> Result<()>;

    /// Scatter consecutive slices of `send` (only read on `root`) with
    /// per-rank lengths `counts` into `recv` (length `counts[rank]`).
    fn scatter_varcount(
        &self,
        root: usize,
        send: &[f64],
        counts: &[usize],
        recv: &mut [f64],
    ) -> Result<()>;

    /// Gather `local` from every rank into consecutive slices of `recv`
    /// (only written on `root`) with per-rank lengths `counts`.
    fn gather_varcount(
        &self,
        root: usize,
        local: &[f64],
        counts: &[usize],
        recv: &mut [f64],
    ) -> Result<()>;

    /// Max of a local scalar across all ranks.
    fn all_reduce_max(&self, local: f64) -> Result<f64>;

    /// Synchronization barrier.
    fn barrier(&self) -> Result<()>;

    /// Partition the communicator: ranks passing the same `color` end up in
    /// the same sub-communicator, ordered by `key` then by parent rank.
    /// Collective over the parent.
    fn split(&self, color: usize, key: usize) -> Result<Box<dyn CommunicationBackend>>;
}

/// Check a rank argument against a communicator size.
pub(crate) fn check_rank(rank: usize, num_ranks: usize) -> Result<()> {
    if rank >= num_ranks {
        return Err(GridError::Comm(format!(
            "rank {rank} outside communicator of size {num_ranks}"
        )));
    }
    Ok(())
}

/// Validate per-rank counts and return the total.
pub(crate) fn check_counts(counts: &[usize], num_ranks: usize) -> Result<usize> {
    if counts.len() != num_ranks {
        return Err(GridError::Comm(format!(
            "{} counts given for a communicator of size {num_ranks}",
            counts.len()
        )));
    }
    Ok(counts.iter().sum())
}

/// Pass-through backend for a single process.
///
/// Every collective degenerates to a local copy; point-to-point messages can
/// only be addressed to rank 0 itself, so the combined exchange copies `send`
/// into `recv`.
pub struct SingleProcessComm;

impl CommunicationBackend for SingleProcessComm {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn send(&self, dest: usize, _tag: Tag, _data: &[f64]) -> Result<()> {
        check_rank(dest, 1)?;
        Err(GridError::Comm(
            "single process cannot send to itself without a matching exchange".into(),
        ))
    }

    fn receive_into(&self, source: usize, _tag: Tag, _buf: &mut [f64]) -> Result<()> {
        check_rank(source, 1)?;
        Err(GridError::Comm(
            "single process has no peer to receive from".into(),
        ))
    }

    fn send_receive(
        &self,
        send: &[f64],
        dest: usize,
        recv: &mut [f64],
        source: usize,
        _tag: Tag,
    ) -> Result<()> {
        check_rank(dest, 1)?;
        check_rank(source, 1)?;
        if send.len() != recv.len() {
            return Err(GridError::Comm(format!(
                "exchange of {} values into a buffer of {}",
                send.len(),
                recv.len()
            )));
        }
        recv.copy_from_slice(send);
        Ok(())
    }

    fn broadcast(&self, root: usize, _buf: &mut [f64]) -> Result<()> {
        check_rank(root, 1)
    }

    fn scatter_varcount(
        &self,
        root: usize,
        send: &[f64],
        counts: &[usize],
        recv: &mut [f64],
    ) -> Result<()> {
        check_rank(root, 1)?;
        let total = check_counts(counts, 1)?;
        if send.len() < total || recv.len() != total {
            return Err(GridError::Comm("scatter buffer size mismatch".into()));
        }
        recv.copy_from_slice(&send[..total]);
        Ok(())
    }

    fn gather_varcount(
        &self,
        root: usize,
        local: &[f64],
        counts: &[usize],
        recv: &mut [f64],
    ) -> Result<()> {
        check_rank(root, 1)?;
        let total = check_counts(counts, 1)?;
        if local.len() != total || recv.len() < total {
            return Err(GridError::Comm("gather buffer size mismatch".into()));
        }
        recv[..total].copy_from_slice(local);
        Ok(())
    }

    fn all_reduce_max(&self, local: f64) -> Result<f64> {
        Ok(local)
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn split(&self, _color: usize, _key: usize) -> Result<Box<dyn CommunicationBackend>> {
        Ok(Box::new(SingleProcessComm))
    }
}
