// SPDX-License-Identifier: AGPL-3.0-only

//! In-process fabric: one ordered channel per directed rank pair.
//!
//! Sends are buffered (never block), receives block until the matching
//! message arrives — the same progress guarantees a post-receive/send/wait
//! triple gets from a real fabric, without a global mailbox. Each fabric
//! handle owns its incoming channel ends, so a universe is just a `Vec` of
//! independent handles, one per rank, typically moved onto one OS thread
//! each.
//!
//! Hostnames are injectable so NUMA grouping is testable on one machine.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use std::thread;

use crate::error::CommError;
use crate::fabric::Fabric;

enum Packet {
    Count(usize),
    F64(Vec<f64>),
    I32(Vec<i32>),
    Bytes(Vec<u8>),
}

impl Packet {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Count(_) => "count",
            Self::F64(_) => "f64",
            Self::I32(_) => "i32",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// One rank's endpoint of an in-process universe.
pub struct LocalFabric {
    rank: usize,
    size: usize,
    hostname: String,
    to: Vec<Sender<Packet>>,
    from: Vec<Mutex<Receiver<Packet>>>,
}

/// Factory for sets of connected [`LocalFabric`] endpoints.
pub struct LocalUniverse;

impl LocalUniverse {
    /// Build `size` connected endpoints, all reporting the same hostname.
    #[must_use]
    pub fn new(size: usize) -> Vec<LocalFabric> {
        Self::with_hostnames(&vec![String::from("localnode"); size])
    }

    /// Build one endpoint per entry of `hostnames` (rank order).
    #[must_use]
    pub fn with_hostnames(hostnames: &[String]) -> Vec<LocalFabric> {
        let size = hostnames.len();
        let mut senders: Vec<Vec<Option<Sender<Packet>>>> = (0..size)
            .map(|_| (0..size).map(|_| None).collect())
            .collect();
        let mut receivers: Vec<Vec<Option<Mutex<Receiver<Packet>>>>> = (0..size)
            .map(|_| (0..size).map(|_| None).collect())
            .collect();

        for src in 0..size {
            for dst in 0..size {
                let (tx, rx) = channel();
                senders[src][dst] = Some(tx);
                receivers[dst][src] = Some(Mutex::new(rx));
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (to, from))| LocalFabric {
                rank,
                size,
                hostname: hostnames[rank].clone(),
                to: to.into_iter().flatten().collect(),
                from: from.into_iter().flatten().collect(),
            })
            .collect()
    }

    /// Run `body` once per rank, one OS thread each, and return the
    /// per-rank results in rank order. Panics in any rank propagate.
    pub fn run<R, F>(size: usize, body: F) -> Vec<R>
    where
        R: Send,
        F: Fn(LocalFabric) -> R + Send + Sync,
    {
        let fabrics = Self::new(size);
        Self::run_fabrics(fabrics, &body)
    }

    /// As [`LocalUniverse::run`] but over pre-built endpoints (e.g. with
    /// synthetic hostnames).
    pub fn run_fabrics<R, F>(fabrics: Vec<LocalFabric>, body: &F) -> Vec<R>
    where
        R: Send,
        F: Fn(LocalFabric) -> R + Send + Sync,
    {
        thread::scope(|scope| {
            let handles: Vec<_> = fabrics
                .into_iter()
                .map(|fabric| scope.spawn(move || body(fabric)))
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(result) => result,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }
}

impl LocalFabric {
    fn post(&self, dst: usize, packet: Packet) -> Result<(), CommError> {
        self.to[dst]
            .send(packet)
            .map_err(|_| CommError::Fabric(format!("rank {dst} hung up")))
    }

    fn take(&self, src: usize) -> Result<Packet, CommError> {
        let rx = self.from[src]
            .lock()
            .map_err(|_| CommError::Fabric(format!("receiver for rank {src} poisoned")))?;
        rx.recv()
            .map_err(|_| CommError::Fabric(format!("rank {src} hung up")))
    }

    fn protocol_mismatch(expected: &str, got: &Packet, src: usize) -> CommError {
        CommError::Fabric(format!(
            "expected {expected} packet from rank {src}, got {}",
            got.kind()
        ))
    }
}

impl Fabric for LocalFabric {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn processor_name(&self) -> String {
        self.hostname.clone()
    }

    fn exchange_count(&self, dst: usize, n: usize, src: usize) -> Result<usize, CommError> {
        self.post(dst, Packet::Count(n))?;
        match self.take(src)? {
            Packet::Count(m) => Ok(m),
            other => Err(Self::protocol_mismatch("count", &other, src)),
        }
    }

    fn exchange(
        &self,
        dst: usize,
        send: &[f64],
        src: usize,
        recv: &mut [f64],
    ) -> Result<usize, CommError> {
        self.post(dst, Packet::F64(send.to_vec()))?;
        match self.take(src)? {
            Packet::F64(data) => {
                if data.len() > recv.len() {
                    return Err(CommError::Fabric(format!(
                        "message of {} values from rank {src} overruns buffer of {}",
                        data.len(),
                        recv.len()
                    )));
                }
                recv[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
            other => Err(Self::protocol_mismatch("f64", &other, src)),
        }
    }

    fn allgather_i32(&self, send: &[i32], recv: &mut [i32]) -> Result<(), CommError> {
        let chunk = send.len();
        recv[self.rank * chunk..(self.rank + 1) * chunk].copy_from_slice(send);
        // Shifted ring: every rank sends its own chunk to (rank+shift) and
        // receives the chunk of (rank-shift); all pairs match per shift.
        for shift in 1..self.size {
            let dst = (self.rank + shift) % self.size;
            let src = (self.rank + self.size - shift) % self.size;
            self.post(dst, Packet::I32(send.to_vec()))?;
            match self.take(src)? {
                Packet::I32(data) => {
                    recv[src * chunk..src * chunk + data.len()].copy_from_slice(&data);
                }
                other => return Err(Self::protocol_mismatch("i32", &other, src)),
            }
        }
        Ok(())
    }

    fn allgather_bytes(&self, send: &[u8], recv: &mut [u8]) -> Result<(), CommError> {
        let chunk = send.len();
        recv[self.rank * chunk..(self.rank + 1) * chunk].copy_from_slice(send);
        for shift in 1..self.size {
            let dst = (self.rank + shift) % self.size;
            let src = (self.rank + self.size - shift) % self.size;
            self.post(dst, Packet::Bytes(send.to_vec()))?;
            match self.take(src)? {
                Packet::Bytes(data) => {
                    recv[src * chunk..src * chunk + data.len()].copy_from_slice(&data);
                }
                other => return Err(Self::protocol_mismatch("bytes", &other, src)),
            }
        }
        Ok(())
    }

    fn barrier(&self) -> Result<(), CommError> {
        // An allgather of one word is a synchronization: nobody leaves
        // before having heard from everyone.
        let mut sink = vec![0i32; self.size];
        self.allgather_i32(&[0], &mut sink)
    }
}
