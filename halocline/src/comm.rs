// SPDX-License-Identifier: AGPL-3.0-only

//! The communicator: swap execution engines and extension dispatch.
//!
//! One `Comm` object per rank holds the topology, the compiled swap plan,
//! and the scratch buffers — all communication state is explicit here,
//! nothing is process-global. The steady loop is:
//!
//! ```text
//! every step:    forward_comm  (positions out, plan order)
//!                reverse_comm  (forces back, exact reverse order)
//! reneighbor:    exchange      (ownership migration, 6 face neighbors)
//!                borders       (halo rebuild, sendlists cached)
//! ```
//!
//! Swaps run strictly sequentially: ghosts shipped in x become send
//! candidates in y, which is what fills corner cells. A swap whose
//! partner is this rank (`P_d = 1`) elides the fabric and copies through
//! the send buffer or straight into the ghost slots; that elision is a
//! correctness requirement, not an optimization.
//!
//! Extension subsystems (force models, fixes, computes, outputs) ride the
//! same plan through the [`CommKernel`] capability trait.

use crate::buffers::CommBuffers;
use crate::config::{CommSettings, CommStyle};
use crate::domain::Domain;
use crate::error::CommError;
use crate::fabric::Fabric;
use crate::grid::factor_grid;
use crate::numa;
use crate::particles::{
    ParticleStore, SIZE_BORDER, SIZE_FORWARD, SIZE_REVERSE, SIZE_VELOCITY,
};
use crate::plan::SwapPlan;
use crate::topology::ProcTopology;

/// Capability bundle an extension subsystem provides to piggyback on the
/// swap plan. Pack methods return the per-particle width actually packed.
pub trait CommKernel {
    /// Upper bound on values per particle in forward messages.
    fn comm_forward_size(&self) -> usize;
    /// Upper bound on values per particle in reverse messages.
    fn comm_reverse_size(&self) -> usize;
    /// Pack outgoing values for the particles in `list`.
    fn pack_comm(&self, list: &[usize], buf: &mut [f64], pbc_flag: bool, pbc: &[i32; 6]) -> usize;
    /// Unpack `n` incoming records into ghosts starting at `first`.
    fn unpack_comm(&mut self, n: usize, first: usize, buf: &[f64]);
    /// Pack reverse values of ghosts `[first, first + n)`.
    fn pack_reverse(&self, n: usize, first: usize, buf: &mut [f64]) -> usize;
    /// Accumulate reverse records onto the owners in `list`.
    fn unpack_reverse(&mut self, list: &[usize], buf: &[f64]);
}

/// Per-call accounting of an `exchange`.
///
/// A packed record that no rank keeps is a lost particle — the documented
/// policy for movers of more than one sub-box and for non-periodic
/// escapes. Locally `sent - kept` over-counts loss when `P_d > 2`
/// (both neighbors see every record; one keeping it is normal), so hosts
/// that cannot tolerate loss must reduce both counters globally and
/// compare the sums.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExchangeReport {
    /// Records packed for migration on this rank (all dimensions).
    pub sent: usize,
    /// Records this rank accepted as new owned particles.
    pub kept: usize,
}

/// Spatial-decomposition communicator for one rank.
#[must_use]
pub struct Comm<F: Fabric> {
    fabric: F,
    settings: CommSettings,
    topo: ProcTopology,
    plan: SwapPlan,
    buffers: CommBuffers,
    size_forward: usize,
    size_reverse: usize,
    size_border: usize,
    maxforward: usize,
    maxreverse: usize,
    comm_x_only: bool,
    comm_f_only: bool,
    bordergroup: bool,
}

impl<F: Fabric> Comm<F> {
    /// Plan the process grid and build the communicator.
    ///
    /// Uses the NUMA planner when `NUMA_NODES` was set at build time,
    /// falling back to the plain factorizer whenever its uniformity
    /// assumptions fail.
    ///
    /// # Errors
    ///
    /// [`CommError::BadGrid`] when the grid cannot cover the world size
    /// (e.g. an unsatisfiable user override) and
    /// [`CommError::DimensionMismatch`] for a 2D box split in z.
    pub fn new(
        fabric: F,
        settings: CommSettings,
        domain: &Domain,
        user_procgrid: [usize; 3],
    ) -> Result<Self, CommError> {
        Self::with_numa(
            fabric,
            settings,
            domain,
            user_procgrid,
            numa::numa_nodes_configured(),
        )
    }

    /// As [`Comm::new`] with an explicit NUMA-domains-per-node count
    /// (0 disables NUMA grouping).
    ///
    /// # Errors
    ///
    /// See [`Comm::new`].
    pub fn with_numa(
        fabric: F,
        settings: CommSettings,
        domain: &Domain,
        user_procgrid: [usize; 3],
        numa_per_node: usize,
    ) -> Result<Self, CommError> {
        let topo = match numa::plan(&fabric, domain, user_procgrid, numa_per_node)? {
            Some(topo) => topo,
            None => {
                let nprocs = fabric.size();
                let grid = factor_grid(
                    nprocs,
                    user_procgrid,
                    domain.face_areas(),
                    [1; 3],
                    domain.dimension == 2,
                );
                if grid[0] * grid[1] * grid[2] != nprocs {
                    return Err(CommError::BadGrid { nprocs, grid });
                }
                ProcTopology::cartesian(fabric.rank(), grid)
            }
        };
        if domain.dimension == 2 && topo.procgrid[2] != 1 {
            return Err(CommError::DimensionMismatch {
                pz: topo.procgrid[2],
            });
        }

        Ok(Self {
            fabric,
            settings,
            topo,
            plan: SwapPlan::default(),
            buffers: CommBuffers::new(),
            size_forward: SIZE_FORWARD,
            size_reverse: SIZE_REVERSE,
            size_border: SIZE_BORDER,
            maxforward: SIZE_BORDER,
            maxreverse: SIZE_REVERSE,
            comm_x_only: true,
            comm_f_only: true,
            bordergroup: false,
        })
    }

    /// Resolve per-message sizes and fast-path hints against the store
    /// and the registered extension kernels.
    ///
    /// # Errors
    ///
    /// [`CommError::InvalidGroup`] when the configured border group is
    /// unknown or is not the store's first group.
    pub fn init(
        &mut self,
        store: &ParticleStore,
        kernels: &[&dyn CommKernel],
    ) -> Result<(), CommError> {
        let vel = self.settings.ghost_velocity;
        self.comm_x_only = store.comm_x_only() && !vel;
        self.comm_f_only = store.comm_f_only();
        self.size_forward = SIZE_FORWARD + if vel { SIZE_VELOCITY } else { 0 };
        self.size_reverse = SIZE_REVERSE;
        self.size_border = SIZE_BORDER + if vel { SIZE_VELOCITY } else { 0 };

        self.maxforward = self.size_forward.max(self.size_border);
        self.maxreverse = self.size_reverse;
        for kernel in kernels {
            self.maxforward = self.maxforward.max(kernel.comm_forward_size());
            self.maxreverse = self.maxreverse.max(kernel.comm_reverse_size());
        }

        self.bordergroup = false;
        if let Some(name) = self.settings.border_group.clone() {
            let known = store.find_group(&name).is_some();
            let is_first = store.first_group_name() == Some(name.as_str());
            if !known || !is_first {
                return Err(CommError::InvalidGroup(name));
            }
            self.bordergroup = true;
        }
        Ok(())
    }

    /// Recompile the swap plan for the current box and cutoffs. Call on
    /// every box resize and before the first `borders`.
    pub fn setup(&mut self, domain: &Domain, cut_neigh_max: f64, cut_species: &[f64]) {
        self.plan = SwapPlan::build(&self.topo, domain, &self.settings, cut_neigh_max, cut_species);
    }

    /// The planned topology.
    #[must_use]
    pub const fn topology(&self) -> &ProcTopology {
        &self.topo
    }

    /// The compiled swap plan.
    #[must_use]
    pub const fn plan(&self) -> &SwapPlan {
        &self.plan
    }

    /// The active settings.
    #[must_use]
    pub const fn settings(&self) -> &CommSettings {
        &self.settings
    }

    /// Nominal send-buffer capacity (monotone over the communicator's
    /// lifetime).
    #[must_use]
    pub const fn max_send_capacity(&self) -> usize {
        self.buffers.maxsend()
    }

    /// Receive-buffer capacity (monotone likewise).
    #[must_use]
    pub const fn max_recv_capacity(&self) -> usize {
        self.buffers.maxrecv()
    }

    // ── forward comm ─────────────────────────────────────────────────

    /// Ship owned/ghost positions outward along the cached plan; every
    /// timestep.
    ///
    /// # Errors
    ///
    /// [`CommError::Fabric`] if the message layer fails.
    pub fn forward_comm(
        &mut self,
        store: &mut ParticleStore,
        domain: &Domain,
    ) -> Result<(), CommError> {
        let me = self.fabric.rank();
        let vel = self.settings.ghost_velocity;
        let x_only = self.comm_x_only;
        let Self {
            ref fabric,
            ref plan,
            ref mut buffers,
            ..
        } = *self;

        for swap in &plan.swaps {
            let shift = if swap.pbc_flag {
                domain.image_shift(&swap.pbc)
            } else {
                [0.0; 3]
            };

            if swap.sendproc == me {
                if x_only {
                    if swap.sendnum > 0 {
                        store.pack_comm_to_ghosts(&swap.sendlist, swap.firstrecv, shift);
                    }
                } else if vel {
                    let n = store.pack_comm_vel(&swap.sendlist, &mut buffers.send, shift);
                    store.unpack_comm_vel(swap.recvnum, swap.firstrecv, &buffers.send[..n]);
                } else {
                    let n = store.pack_comm(&swap.sendlist, &mut buffers.send, shift);
                    store.unpack_comm(swap.recvnum, swap.firstrecv, &buffers.send[..n]);
                }
            } else if x_only {
                // Receive straight into the ghost position slice.
                let n = store.pack_comm(&swap.sendlist, &mut buffers.send, shift);
                let lo = swap.firstrecv * 3;
                let recv = &mut store.x[lo..lo + swap.size_forward_recv];
                fabric.exchange(swap.sendproc, &buffers.send[..n], swap.recvproc, recv)?;
            } else {
                let n = if vel {
                    store.pack_comm_vel(&swap.sendlist, &mut buffers.send, shift)
                } else {
                    store.pack_comm(&swap.sendlist, &mut buffers.send, shift)
                };
                fabric.exchange(
                    swap.sendproc,
                    &buffers.send[..n],
                    swap.recvproc,
                    &mut buffers.recv[..swap.size_forward_recv],
                )?;
                if vel {
                    store.unpack_comm_vel(swap.recvnum, swap.firstrecv, &buffers.recv);
                } else {
                    store.unpack_comm(swap.recvnum, swap.firstrecv, &buffers.recv);
                }
            }
        }
        Ok(())
    }

    // ── reverse comm ─────────────────────────────────────────────────

    /// Return ghost force accumulations to their owners, in exact
    /// reverse plan order; every timestep.
    ///
    /// # Errors
    ///
    /// [`CommError::Fabric`] if the message layer fails.
    pub fn reverse_comm(&mut self, store: &mut ParticleStore) -> Result<(), CommError> {
        let me = self.fabric.rank();
        let f_only = self.comm_f_only;
        let Self {
            ref fabric,
            ref plan,
            ref mut buffers,
            ..
        } = *self;

        for swap in plan.swaps.iter().rev() {
            if swap.sendproc == me {
                if f_only {
                    if swap.sendnum > 0 {
                        store.unpack_reverse_from_ghosts(&swap.sendlist, swap.firstrecv);
                    }
                } else {
                    let n = store.pack_reverse(swap.recvnum, swap.firstrecv, &mut buffers.send);
                    store.unpack_reverse(&swap.sendlist, &buffers.send[..n]);
                }
                continue;
            }

            if f_only {
                // Send straight from the ghost force slice.
                let lo = swap.firstrecv * 3;
                let send = &store.f[lo..lo + swap.size_reverse_send];
                fabric.exchange(
                    swap.recvproc,
                    send,
                    swap.sendproc,
                    &mut buffers.recv[..swap.size_reverse_recv],
                )?;
            } else {
                let n = store.pack_reverse(swap.recvnum, swap.firstrecv, &mut buffers.send);
                fabric.exchange(
                    swap.recvproc,
                    &buffers.send[..n],
                    swap.sendproc,
                    &mut buffers.recv[..swap.size_reverse_recv],
                )?;
            }
            store.unpack_reverse(&swap.sendlist, &buffers.recv);
        }
        Ok(())
    }

    // ── exchange ─────────────────────────────────────────────────────

    /// Migrate owned particles that left this sub-box to the face
    /// neighbors; runs before every `borders`.
    ///
    /// In a triclinic box the caller converts positions to lamda
    /// coordinates first; in a periodic box the caller remaps coordinates
    /// into the global box first. Particles that would have to travel
    /// more than one sub-box (or that escaped a non-periodic boundary)
    /// are dropped — see [`ExchangeReport`].
    ///
    /// # Errors
    ///
    /// [`CommError::Fabric`] if the message layer fails.
    pub fn exchange(
        &mut self,
        store: &mut ParticleStore,
        domain: &Domain,
    ) -> Result<ExchangeReport, CommError> {
        let mut report = ExchangeReport::default();
        let (sublo, subhi) = domain.comm_sub_bounds();
        let Self {
            ref fabric,
            ref topo,
            ref mut buffers,
            ..
        } = *self;

        store.map_clear();

        for dim in 0..3 {
            let lo = sublo[dim];
            let hi = subhi[dim];

            // Pack leavers, deleting by swap-with-last (< lo or >= hi).
            let mut nsend = 0;
            let mut i = 0;
            while i < store.nlocal {
                let coord = store.x[i * 3 + dim];
                if coord < lo || coord >= hi {
                    if nsend > buffers.maxsend() {
                        buffers.ensure_send(nsend, true);
                    }
                    nsend += store.pack_exchange(i, &mut buffers.send[nsend..]);
                    report.sent += 1;
                    store.copy(store.nlocal - 1, i);
                    store.nlocal -= 1;
                } else {
                    i += 1;
                }
            }

            // One rank in this dimension: the send buffer is the receive
            // buffer. Two ranks: one paired exchange. More: both
            // neighbors get the same packed buffer.
            let pd = topo.procgrid[dim];
            let minus = topo.procneigh[dim][0];
            let plus = topo.procneigh[dim][1];
            let nrecv = if pd == 1 {
                nsend
            } else {
                let nrecv1 = fabric.exchange_count(minus, nsend, plus)?;
                let mut nrecv = nrecv1;
                if pd > 2 {
                    nrecv += fabric.exchange_count(plus, nsend, minus)?;
                }
                buffers.ensure_recv(nrecv);
                fabric.exchange(
                    minus,
                    &buffers.send[..nsend],
                    plus,
                    &mut buffers.recv[..nrecv1],
                )?;
                if pd > 2 {
                    fabric.exchange(
                        plus,
                        &buffers.send[..nsend],
                        minus,
                        &mut buffers.recv[nrecv1..nrecv],
                    )?;
                }
                nrecv
            };

            // Keep arrivals that fall inside my slab of this dimension.
            let buf: &[f64] = if pd == 1 {
                &buffers.send[..nrecv]
            } else {
                &buffers.recv[..nrecv]
            };
            let mut m = 0;
            while m < nrecv {
                let width = buf[m] as usize;
                let coord = buf[m + 1 + dim];
                if coord >= lo && coord < hi {
                    store.unpack_exchange(&buf[m..m + width]);
                    report.kept += 1;
                }
                m += width;
            }
        }

        if store.first_group_name().is_some() {
            store.first_reorder();
        }
        Ok(report)
    }

    // ── borders ──────────────────────────────────────────────────────

    /// Rebuild the ghost halo: select border particles per swap, exchange
    /// them, install them as ghosts, and cache the send lists for the
    /// steady-state engines. Runs after every `exchange`.
    ///
    /// # Errors
    ///
    /// [`CommError::Fabric`] if the message layer fails.
    pub fn borders(&mut self, store: &mut ParticleStore, domain: &Domain) -> Result<(), CommError> {
        let me = self.fabric.rank();
        let vel = self.settings.ghost_velocity;
        let single = self.settings.style == CommStyle::Single;
        let bordergroup = self.bordergroup;
        let size_border = self.size_border;
        let size_forward = self.size_forward;
        let size_reverse = self.size_reverse;
        let maxforward = self.maxforward;
        let maxreverse = self.maxreverse;
        let Self {
            ref fabric,
            ref mut plan,
            ref mut buffers,
            ..
        } = *self;

        store.clear_ghosts();

        let mut iswap = 0;
        let mut smax = 0;
        let mut rmax = 0;

        for dim in 0..3 {
            let mut nfirst = 0;
            let mut nlast = 0;
            for ineed in 0..2 * plan.need[dim] {
                // Candidate window: first hops scan owned plus ghosts from
                // earlier dimensions; later hops scan only the ghosts the
                // previous pair of this dimension brought in.
                if ineed % 2 == 0 {
                    nfirst = nlast;
                    nlast = store.ntotal();
                }

                let swap = &mut plan.swaps[iswap];
                swap.sendlist.clear();
                {
                    let mut select = |from: usize, to: usize| {
                        if single {
                            for i in from..to {
                                let coord = store.x[i * 3 + dim];
                                if coord >= swap.slablo && coord <= swap.slabhi {
                                    swap.sendlist.push(i);
                                }
                            }
                        } else {
                            for i in from..to {
                                let t = store.species[i] as usize;
                                let coord = store.x[i * 3 + dim];
                                if coord >= swap.multilo[t] && coord <= swap.multihi[t] {
                                    swap.sendlist.push(i);
                                }
                            }
                        }
                    };
                    if !bordergroup || ineed >= 2 {
                        select(nfirst, nlast);
                    } else {
                        // First hops with a border group: owned candidates
                        // come from the first group only, then all ghosts.
                        select(0, store.nfirst);
                        select(store.nlocal, nlast);
                    }
                }
                let nsend = swap.sendlist.len();

                buffers.ensure_send(nsend * size_border, false);
                let shift = if swap.pbc_flag {
                    domain.border_shift(&swap.pbc)
                } else {
                    [0.0; 3]
                };
                let n = if vel {
                    store.pack_border_vel(&swap.sendlist, &mut buffers.send, shift)
                } else {
                    store.pack_border(&swap.sendlist, &mut buffers.send, shift)
                };

                // Swap with the partner; incoming ghosts land at the end
                // of the particle arrays. A self-swap just copies.
                let nrecv = if swap.sendproc == me {
                    nsend
                } else {
                    let nrecv = fabric.exchange_count(swap.sendproc, nsend, swap.recvproc)?;
                    buffers.ensure_recv(nrecv * size_border);
                    fabric.exchange(
                        swap.sendproc,
                        &buffers.send[..n],
                        swap.recvproc,
                        &mut buffers.recv[..nrecv * size_border],
                    )?;
                    nrecv
                };

                let first = store.ntotal();
                {
                    let buf: &[f64] = if swap.sendproc == me {
                        &buffers.send
                    } else {
                        &buffers.recv
                    };
                    if vel {
                        store.unpack_border_vel(nrecv, first, buf);
                    } else {
                        store.unpack_border(nrecv, first, buf);
                    }
                }
                store.nghost += nrecv;

                smax = smax.max(nsend);
                rmax = rmax.max(nrecv);
                swap.sendnum = nsend;
                swap.recvnum = nrecv;
                swap.firstrecv = first;
                swap.size_forward_recv = nrecv * size_forward;
                swap.size_reverse_send = nrecv * size_reverse;
                swap.size_reverse_recv = nsend * size_reverse;
                iswap += 1;
            }
        }

        // Pre-grow both buffers to the steady-state worst case so no
        // forward/reverse call reallocates.
        buffers.ensure_send((maxforward * smax).max(maxreverse * rmax), false);
        buffers.ensure_recv((maxforward * rmax).max(maxreverse * smax));

        store.map_set();
        Ok(())
    }

    // ── extension dispatch ───────────────────────────────────────────

    /// Forward communication on behalf of an extension subsystem, using
    /// the cached plan and send lists.
    ///
    /// # Errors
    ///
    /// [`CommError::Fabric`] if the message layer fails.
    pub fn forward_comm_kernel(&mut self, kernel: &mut dyn CommKernel) -> Result<(), CommError> {
        let me = self.fabric.rank();
        let Self {
            ref fabric,
            ref plan,
            ref mut buffers,
            ..
        } = *self;

        for swap in &plan.swaps {
            buffers.ensure_send(kernel.comm_forward_size() * swap.sendnum, false);
            let n = kernel.pack_comm(&swap.sendlist, &mut buffers.send, swap.pbc_flag, &swap.pbc);

            if swap.sendproc == me {
                kernel.unpack_comm(swap.recvnum, swap.firstrecv, &buffers.send);
            } else {
                buffers.ensure_recv(n * swap.recvnum);
                fabric.exchange(
                    swap.sendproc,
                    &buffers.send[..n * swap.sendnum],
                    swap.recvproc,
                    &mut buffers.recv[..n * swap.recvnum],
                )?;
                kernel.unpack_comm(swap.recvnum, swap.firstrecv, &buffers.recv);
            }
        }
        Ok(())
    }

    /// Reverse communication on behalf of an extension subsystem, in
    /// exact reverse plan order.
    ///
    /// # Errors
    ///
    /// [`CommError::Fabric`] if the message layer fails.
    pub fn reverse_comm_kernel(&mut self, kernel: &mut dyn CommKernel) -> Result<(), CommError> {
        let me = self.fabric.rank();
        let Self {
            ref fabric,
            ref plan,
            ref mut buffers,
            ..
        } = *self;

        for swap in plan.swaps.iter().rev() {
            buffers.ensure_send(kernel.comm_reverse_size() * swap.recvnum, false);
            let n = kernel.pack_reverse(swap.recvnum, swap.firstrecv, &mut buffers.send);

            if swap.sendproc == me {
                kernel.unpack_reverse(&swap.sendlist, &buffers.send);
            } else {
                buffers.ensure_recv(n * swap.sendnum);
                fabric.exchange(
                    swap.recvproc,
                    &buffers.send[..n * swap.recvnum],
                    swap.sendproc,
                    &mut buffers.recv[..n * swap.sendnum],
                )?;
                kernel.unpack_reverse(&swap.sendlist, &buffers.recv);
            }
        }
        Ok(())
    }
}
