// SPDX-License-Identifier: AGPL-3.0-only

//! Message-passing fabric abstraction.
//!
//! The communicator only ever talks to the fabric in paired shapes: a
//! posted receive matched with a blocking send (`exchange`), a one-integer
//! sendrecv used as a length header (`exchange_count`), and the collectives
//! the planners need (`allgather_*`, `barrier`). Everything runs on one
//! logical tag, so correctness leans on the fabric's strong pairwise
//! ordering: messages between two ranks arrive in send order.
//!
//! Two backends:
//!
//! - [`local::LocalUniverse`] — in-process, one ordered channel per
//!   directed rank pair. Used by tests and single-node drivers.
//! - `mpi::MpiFabric` — the real thing over rsmpi, behind the
//!   `mpi-fabric` feature.
//!
//! Payloads are flat `f64` arrays; variable-length records carry their own
//! length in the first slot and a count header travels ahead of each
//! variable-length payload.

use crate::error::CommError;

/// In-process fabric over per-pair channels.
pub mod local;

/// rsmpi-backed fabric.
#[cfg(feature = "mpi-fabric")]
pub mod mpi;

/// MPI-style communication surface used by the communicator and planners.
///
/// Implementations must guarantee pairwise FIFO ordering and may block
/// only inside these calls.
pub trait Fabric: Send + Sync {
    /// This process's 0-based rank.
    fn rank(&self) -> usize;

    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Host identifier used for NUMA grouping (uniform per shared-memory
    /// node).
    fn processor_name(&self) -> String;

    /// Send the count `n` to `dst` while receiving a count from `src`.
    ///
    /// # Errors
    ///
    /// [`CommError::Fabric`] if a peer disappeared or the backend failed.
    fn exchange_count(&self, dst: usize, n: usize, src: usize) -> Result<usize, CommError>;

    /// Post a receive from `src` into `recv`, send `send` to `dst`, wait.
    /// Returns the number of values received.
    ///
    /// # Errors
    ///
    /// [`CommError::Fabric`] if a peer disappeared, the backend failed, or
    /// the incoming message overruns `recv`.
    fn exchange(
        &self,
        dst: usize,
        send: &[f64],
        src: usize,
        recv: &mut [f64],
    ) -> Result<usize, CommError>;

    /// Gather a fixed-size `i32` chunk from every rank, rank-major.
    ///
    /// # Errors
    ///
    /// [`CommError::Fabric`] on backend failure.
    fn allgather_i32(&self, send: &[i32], recv: &mut [i32]) -> Result<(), CommError>;

    /// Gather a fixed-size byte chunk from every rank, rank-major.
    ///
    /// # Errors
    ///
    /// [`CommError::Fabric`] on backend failure.
    fn allgather_bytes(&self, send: &[u8], recv: &mut [u8]) -> Result<(), CommError>;

    /// Block until every rank has entered the barrier.
    ///
    /// # Errors
    ///
    /// [`CommError::Fabric`] on backend failure.
    fn barrier(&self) -> Result<(), CommError>;
}
