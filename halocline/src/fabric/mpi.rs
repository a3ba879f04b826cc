// SPDX-License-Identifier: AGPL-3.0-only

//! rsmpi-backed fabric (feature `mpi-fabric`).
//!
//! The paired-exchange shape maps onto the classic immediate-receive,
//! blocking-send, wait triple; collectives map onto their MPI
//! counterparts. Everything travels on the world communicator with the
//! default tag, relying on MPI's pairwise ordering guarantee.

use mpi::environment::Universe;
use mpi::point_to_point::{Destination, Source};
use mpi::topology::{Communicator, SimpleCommunicator};
use mpi::traits::*;

use crate::error::CommError;
use crate::fabric::Fabric;

/// Fabric over the MPI world communicator.
pub struct MpiFabric {
    _universe: Universe,
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
}

impl MpiFabric {
    /// Initialize MPI and wrap the world communicator.
    ///
    /// # Errors
    ///
    /// [`CommError::Fabric`] if MPI is already (or cannot be) initialized.
    pub fn new() -> Result<Self, CommError> {
        let universe = mpi::initialize()
            .ok_or_else(|| CommError::Fabric("MPI initialization failed".into()))?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(Self {
            _universe: universe,
            world,
            rank,
            size,
        })
    }
}

impl Fabric for MpiFabric {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn processor_name(&self) -> String {
        mpi::environment::processor_name().unwrap_or_else(|_| format!("rank{}", self.rank))
    }

    fn exchange_count(&self, dst: usize, n: usize, src: usize) -> Result<usize, CommError> {
        let send = [n as i32];
        let mut recv = [0i32];
        mpi::request::scope(|scope| {
            let rreq = self
                .world
                .process_at_rank(src as i32)
                .immediate_receive_into(scope, &mut recv);
            self.world.process_at_rank(dst as i32).send(&send[..]);
            rreq.wait();
        });
        Ok(recv[0] as usize)
    }

    fn exchange(
        &self,
        dst: usize,
        send: &[f64],
        src: usize,
        recv: &mut [f64],
    ) -> Result<usize, CommError> {
        let mut count = 0usize;
        mpi::request::scope(|scope| {
            let rreq = self
                .world
                .process_at_rank(src as i32)
                .immediate_receive_into(scope, recv);
            self.world.process_at_rank(dst as i32).send(send);
            let status = rreq.wait();
            count = status.count(f64::equivalent_datatype()) as usize;
        });
        Ok(count)
    }

    fn allgather_i32(&self, send: &[i32], recv: &mut [i32]) -> Result<(), CommError> {
        self.world.all_gather_into(send, recv);
        Ok(())
    }

    fn allgather_bytes(&self, send: &[u8], recv: &mut [u8]) -> Result<(), CommError> {
        self.world.all_gather_into(send, recv);
        Ok(())
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.world.barrier();
        Ok(())
    }
}
