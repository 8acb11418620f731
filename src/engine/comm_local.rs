//! In-process communication backend: one worker thread per rank.
//!
//! Ranks exchange envelopes over `std::sync::mpsc` channels, one inbox per
//! rank. Sends never block (channels are unbounded), which gives buffered-send
//! semantics: any ordering of sends and receives between a pair of ranks
//! completes. Envelopes that arrive before they are asked for are parked and
//! matched later by (context, source, tag).
//!
//! A failure on any rank raises a shared abort flag; ranks blocked in a
//! receive notice it on their next poll and fail too, so the whole group
//! stops instead of hanging.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::comm::{check_counts, check_rank, CommunicationBackend, Tag};
use crate::error::{GridError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const WORLD_CONTEXT: u64 = 0;
const NO_FAILURE: usize = usize::MAX;

struct Envelope {
    context: u64,
    /// World rank of the sender.
    source: usize,
    /// `None` for collective traffic, which is matched in FIFO order.
    tag: Option<Tag>,
    data: Vec<f64>,
}

struct Inbox {
    receiver: Receiver<Envelope>,
    parked: VecDeque<Envelope>,
}

/// State shared by every rank of one local world.
struct Shared {
    senders: Vec<Sender<Envelope>>,
    aborted: AtomicBool,
    first_failure: AtomicUsize,
}

impl Shared {
    fn abort(&self, world_rank: usize) {
        let _ = self.first_failure.compare_exchange(
            NO_FAILURE,
            world_rank,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.aborted.store(true, Ordering::SeqCst);
    }
}

/// Communicator over worker threads of the same process.
pub struct LocalComm {
    shared: Arc<Shared>,
    inbox: Arc<Mutex<Inbox>>,
    context: u64,
    /// World rank of each member, indexed by rank in this communicator.
    members: Vec<usize>,
    rank: usize,
    splits: AtomicUsize,
}

impl LocalComm {
    /// Create the world communicators for `num_ranks` ranks. Element `r` of
    /// the result belongs to rank `r` and must be moved to its own thread.
    pub fn world(num_ranks: usize) -> Vec<LocalComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..num_ranks).map(|_| mpsc::channel()).unzip();
        let shared = Arc::new(Shared {
            senders,
            aborted: AtomicBool::new(false),
            first_failure: AtomicUsize::new(NO_FAILURE),
        });
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| LocalComm {
                shared: Arc::clone(&shared),
                inbox: Arc::new(Mutex::new(Inbox {
                    receiver,
                    parked: VecDeque::new(),
                })),
                context: WORLD_CONTEXT,
                members: (0..num_ranks).collect(),
                rank,
                splits: AtomicUsize::new(0),
            })
            .collect()
    }

    fn world_rank(&self) -> usize {
        self.members[self.rank]
    }

    fn post(&self, dest: usize, tag: Option<Tag>, data: Vec<f64>) -> Result<()> {
        check_rank(dest, self.members.len())?;
        let envelope = Envelope {
            context: self.context,
            source: self.world_rank(),
            tag,
            data,
        };
        self.shared.senders[self.members[dest]]
            .send(envelope)
            .map_err(|_| GridError::Comm(format!("rank {dest} has exited")))
    }

    fn take(&self, source: usize, tag: Option<Tag>) -> Result<Vec<f64>> {
        check_rank(source, self.members.len())?;
        let source = self.members[source];
        let matches =
            |e: &Envelope| e.context == self.context && e.source == source && e.tag == tag;

        let mut inbox = self
            .inbox
            .lock()
            .map_err(|_| GridError::Comm("inbox lock poisoned".into()))?;
        if let Some(pos) = inbox.parked.iter().position(|e| matches(e)) {
            if let Some(envelope) = inbox.parked.remove(pos) {
                return Ok(envelope.data);
            }
        }
        loop {
            match inbox.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(envelope) if matches(&envelope) => return Ok(envelope.data),
                Ok(envelope) => inbox.parked.push_back(envelope),
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.aborted.load(Ordering::SeqCst) {
                        return Err(GridError::Comm("process group aborted".into()));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(GridError::Comm("all peers have exited".into()));
                }
            }
        }
    }

    fn take_into(&self, source: usize, tag: Option<Tag>, buf: &mut [f64]) -> Result<()> {
        let data = self.take(source, tag)?;
        if data.len() != buf.len() {
            return Err(GridError::Comm(format!(
                "message of {} values from rank {source} does not fit buffer of {}",
                data.len(),
                buf.len()
            )));
        }
        buf.copy_from_slice(&data);
        Ok(())
    }

    fn next_context(&self, color: usize) -> u64 {
        let seq = self.splits.fetch_add(1, Ordering::SeqCst);
        let mut hasher = DefaultHasher::new();
        (self.context, seq, color).hash(&mut hasher);
        // Zero is reserved for the world.
        hasher.finish().max(1)
    }
}

impl CommunicationBackend for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.members.len()
    }

    fn send(&self, dest: usize, tag: Tag, data: &[f64]) -> Result<()> {
        self.post(dest, Some(tag), data.to_vec())
    }

    fn receive_into(&self, source: usize, tag: Tag, buf: &mut [f64]) -> Result<()> {
        self.take_into(source, Some(tag), buf)
    }

    fn send_receive(
        &self,
        send: &[f64],
        dest: usize,
        recv: &mut [f64],
        source: usize,
        tag: Tag,
    ) -> Result<()> {
        // The send is buffered, so posting it first cannot deadlock a ring.
        self.post(dest, Some(tag), send.to_vec())?;
        self.take_into(source, Some(tag), recv)
    }

    fn broadcast(&self, root: usize, buf: &mut [f64]) -> Result<()> {
        check_rank(root, self.num_ranks())?;
        if self.rank == root {
            for dest in (0..self.num_ranks()).filter(|&r| r != root) {
                self.post(dest, None, buf.to_vec())?;
            }
            Ok(())
        } else {
            self.take_into(root, None, buf)
        }
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
        if self.rank == root {
            if send.len() < total {
                return Err(GridError::Comm(format!(
                    "scatter source holds {} values, counts need {total}",
                    send.len()
                )));
            }
            let mut offset = 0;
            for (dest, &count) in counts.iter().enumerate() {
                let slice = &send[offset..offset + count];
                if dest == root {
                    if recv.len() != count {
                        return Err(GridError::Comm("scatter receive buffer size mismatch".into()));
                    }
                    recv.copy_from_slice(slice);
                } else {
                    self.post(dest, None, slice.to_vec())?;
                }
                offset += count;
            }
            Ok(())
        } else {
            self.take_into(root, None, recv)
        }
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
        if self.rank != root {
            return self.post(root, None, local.to_vec());
        }
        if recv.len() < total {
            return Err(GridError::Comm(format!(
                "gather destination holds {} values, counts need {total}",
                recv.len()
            )));
        }
        let mut offset = 0;
        for (source, &count) in counts.iter().enumerate() {
            let slot = &mut recv[offset..offset + count];
            if source == root {
                if local.len() != count {
                    return Err(GridError::Comm("gather send buffer size mismatch".into()));
                }
                slot.copy_from_slice(local);
            } else {
                self.take_into(source, None, slot)?;
            }
            offset += count;
        }
        Ok(())
    }

    fn all_reduce_max(&self, local: f64) -> Result<f64> {
        let mut value = [local];
        if self.rank == 0 {
            for source in 1..self.num_ranks() {
                let mut other = [0.0];
                self.take_into(source, None, &mut other)?;
                value[0] = value[0].max(other[0]);
            }
        } else {
            self.post(0, None, value.to_vec())?;
        }
        self.broadcast(0, &mut value)?;
        Ok(value[0])
    }

    fn barrier(&self) -> Result<()> {
        self.all_reduce_max(0.0).map(|_| ())
    }

    fn split(&self, color: usize, key: usize) -> Result<Box<dyn CommunicationBackend>> {
        // Every rank learns every (color, key) pair, then picks its group.
        let mine = [color as f64, key as f64];
        let mut all = vec![(0usize, 0usize); self.num_ranks()];
        for dest in (0..self.num_ranks()).filter(|&r| r != self.rank) {
            self.post(dest, None, mine.to_vec())?;
        }
        for (source, slot) in all.iter_mut().enumerate() {
            if source == self.rank {
                *slot = (color, key);
            } else {
                let mut pair = [0.0; 2];
                self.take_into(source, None, &mut pair)?;
                *slot = (pair[0] as usize, pair[1] as usize);
            }
        }

        let mut group: Vec<usize> = (0..self.num_ranks()).filter(|&r| all[r].0 == color).collect();
        group.sort_by_key(|&r| (all[r].1, r));
        let rank = group
            .iter()
            .position(|&r| r == self.rank)
            .ok_or_else(|| GridError::Comm("split lost the calling rank".into()))?;

        Ok(Box::new(LocalComm {
            shared: Arc::clone(&self.shared),
            inbox: Arc::clone(&self.inbox),
            context: self.next_context(color),
            members: group.into_iter().map(|r| self.members[r]).collect(),
            rank,
            splits: AtomicUsize::new(0),
        }))
    }
}

/// Raises the abort flag unless disarmed, including during a panic unwind.
struct AbortGuard<'a> {
    shared: &'a Shared,
    world_rank: usize,
    armed: bool,
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.abort(self.world_rank);
        }
    }
}

/// Run `f` on `num_ranks` worker threads, one per rank, and collect the
/// per-rank results in rank order.
///
/// If any rank fails, the others are aborted and the error of the first
/// failing rank is returned.
pub fn run_local<T, F>(num_ranks: usize, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&LocalComm) -> Result<T> + Sync,
{
    if num_ranks == 0 {
        return Err(GridError::InvalidTopology("process count must be positive".into()));
    }
    let comms = LocalComm::world(num_ranks);
    let shared = Arc::clone(&comms[0].shared);

    let outcomes: Vec<std::thread::Result<Result<T>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                scope.spawn(move || {
                    let mut guard = AbortGuard {
                        shared: &comm.shared,
                        world_rank: comm.rank,
                        armed: true,
                    };
                    let result = f(&comm);
                    guard.armed = result.is_err();
                    drop(guard);
                    result
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join()).collect()
    });

    let first_failure = shared.first_failure.load(Ordering::SeqCst);
    let mut results = Vec::with_capacity(num_ranks);
    let mut errors: Vec<(usize, GridError)> = Vec::new();
    for (rank, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(Ok(value)) => results.push(value),
            Ok(Err(e)) => errors.push((rank, e)),
            Err(_) => errors.push((rank, GridError::Comm(format!("rank {rank} panicked")))),
        }
    }
    if errors.is_empty() {
        return Ok(results);
    }
    let pos = errors
        .iter()
        .position(|(rank, _)| *rank == first_failure)
        .unwrap_or(0);
    let (rank, err) = errors.swap_remove(pos);
    tracing::error!(rank, %err, "local process group aborted");
    Err(err)
}
