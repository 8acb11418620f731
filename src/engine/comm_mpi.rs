//! MPI communication backend for the distributed engine.
//!
//! Requires the `distributed` feature flag and an MPI installation.
//! Implements `CommunicationBackend` using `mpi::traits::*`.
//!
//! # Usage
//!
//! The caller must initialize MPI before constructing `MpiComm` and keep the
//! universe alive for as long as any communicator is in use:
//!
//! ```ignore
//! let universe = mpi::initialize().expect("MPI init failed");
//! let comm = MpiComm::new();
//! ```
//!
//! MPI aborts the job on communication errors, so every method here returns
//! `Ok` once the call completes.

use super::comm::{check_counts, check_rank, CommunicationBackend, SendMode, Tag};
use crate::error::{GridError, Result};
use mpi::collective::SystemOperation;
use mpi::datatype::{Partition, PartitionMut};
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::*;
use mpi::Count;

/// MPI-based communication backend.
pub struct MpiComm {
    comm: SimpleCommunicator,
}

impl MpiComm {
    /// Wrap the world communicator.
    ///
    /// Panics if MPI has not been initialized via `mpi::initialize()`.
    pub fn new() -> Self {
        Self {
            comm: SimpleCommunicator::world(),
        }
    }
}

impl Default for MpiComm {
    fn default() -> Self {
        Self::new()
    }
}

fn to_counts(counts: &[usize]) -> (Vec<Count>, Vec<Count>) {
    let counts: Vec<Count> = counts.iter().map(|&c| c as Count).collect();
    let displs = counts
        .iter()
        .scan(0 as Count, |acc, &c| {
            let start = *acc;
            *acc += c;
            Some(start)
        })
        .collect();
    (counts, displs)
}

impl CommunicationBackend for MpiComm {
    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn num_ranks(&self) -> usize {
        self.comm.size() as usize
    }

    fn send(&self, dest: usize, tag: Tag, data: &[f64]) -> Result<()> {
        check_rank(dest, self.num_ranks())?;
        self.comm
            .process_at_rank(dest as i32)
            .send_with_tag(data, tag);
        Ok(())
    }

    fn receive_into(&self, source: usize, tag: Tag, buf: &mut [f64]) -> Result<()> {
        check_rank(source, self.num_ranks())?;
        self.comm
            .process_at_rank(source as i32)
            .receive_into_with_tag(buf, tag);
        Ok(())
    }

    fn send_with_mode(&self, dest: usize, tag: Tag, data: &[f64], mode: SendMode) -> Result<()> {
        check_rank(dest, self.num_ranks())?;
        let process = self.comm.process_at_rank(dest as i32);
        match mode {
            SendMode::Standard => process.send_with_tag(data, tag),
            SendMode::Synchronous => process.synchronous_send_with_tag(data, tag),
            SendMode::Ready => {
                // Empty token from the receiver: its receive is posted.
                let mut token: [f64; 0] = [];
                process.receive_into_with_tag(&mut token[..], tag);
                process.ready_send_with_tag(data, tag);
            }
            // Needs a buffer attached to the universe, see `buffered_capacity`.
            SendMode::Buffered => process.buffered_send_with_tag(data, tag),
        }
        Ok(())
    }

    fn receive_with_mode(
        &self,
        source: usize,
        tag: Tag,
        buf: &mut [f64],
        mode: SendMode,
    ) -> Result<()> {
        check_rank(source, self.num_ranks())?;
        let process = self.comm.process_at_rank(source as i32);
        if mode != SendMode::Ready {
            process.receive_into_with_tag(buf, tag);
            return Ok(());
        }
        mpi::request::scope(|scope| {
            let request = process.immediate_receive_into_with_tag(scope, buf, tag);
            let token: [f64; 0] = [];
            process.send_with_tag(&token[..], tag);
            request.wait();
        });
        Ok(())
    }

    fn send_receive(
        &self,
        send: &[f64],
        dest: usize,
        recv: &mut [f64],
        source: usize,
        tag: Tag,
    ) -> Result<()> {
        check_rank(dest, self.num_ranks())?;
        check_rank(source, self.num_ranks())?;
        let dest = self.comm.process_at_rank(dest as i32);
        let source = self.comm.process_at_rank(source as i32);
        mpi::point_to_point::send_receive_into_with_tags(send, &dest, tag, recv, &source, tag);
        Ok(())
    }

    fn broadcast(&self, root: usize, buf: &mut [f64]) -> Result<()> {
        check_rank(root, self.num_ranks())?;
        self.comm.process_at_rank(root as i32).broadcast_into(buf);
        Ok(())
    }

    fn scatter_varcount(
        &self,
        root: usize,
        send: &[f64],
        counts: &[usize],
        recv: &mut [f64],
    ) -> Result<()> {
        check_rank(root, self.num_ranks())?;
        let total = check_counts(counts, self.num_ranks())?;
        let root_process = self.comm.process_at_rank(root as i32);
        if self.rank() == root {
            if send.len() < total {
                return Err(GridError::Comm("scatter source too small".into()));
            }
            let (counts, displs) = to_counts(counts);
            let partition = Partition::new(send, counts, displs);
            root_process.scatter_varcount_into_root(&partition, recv);
        } else {
            root_process.scatter_varcount_into(recv);
        }
        Ok(())
    }

    fn gather_varcount(
        &self,
        root: usize,
        local: &[f64],
        counts: &[usize],
        recv: &mut [f64],
    ) -> Result<()> {
        check_rank(root, self.num_ranks())?;
        let total = check_counts(counts, self.num_ranks())?;
        let root_process = self.comm.process_at_rank(root as i32);
        if self.rank() == root {
            if recv.len() < total {
                return Err(GridError::Comm("gather destination too small".into()));
            }
            let (counts, displs) = to_counts(counts);
            let mut partition = PartitionMut::new(recv, counts, displs);
            root_process.gather_varcount_into_root(local, &mut partition);
        } else {
            root_process.gather_varcount_into(local);
        }
        Ok(())
    }

    fn all_reduce_max(&self, local: f64) -> Result<f64> {
        let mut global = 0.0f64;
        self.comm
            .all_reduce_into(&local, &mut global, SystemOperation::max());
        Ok(global)
    }

    fn barrier(&self) -> Result<()> {
        self.comm.barrier();
        Ok(())
    }

    fn split(&self, color: usize, key: usize) -> Result<Box<dyn CommunicationBackend>> {
        let comm = self
            .comm
            .split_by_color_with_key(Color::with_value(color as i32), key as i32)
            .ok_or_else(|| GridError::Comm(format!("split by color {color} produced no group")))?;
        Ok(Box::new(MpiComm { comm }))
    }
}
