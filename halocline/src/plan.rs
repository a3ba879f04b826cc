// SPDX-License-Identifier: AGPL-3.0-only

//! Swap-plan construction.
//!
//! The plan compiles cutoff geometry into a static, ordered sequence of
//! paired send/receive swaps: all x swaps, then y, then z; within a
//! dimension hops alternate minus/plus and move outward. Ordering is a
//! correctness property — ghosts shipped by dimension d become send
//! candidates for dimension d+1, which is what populates corner cells.
//!
//! Slab bounds select which particles a swap sends. The first hop pair in
//! each dimension uses an open outer bound (±[`BIG`]) so a particle whose
//! wrapped image lands marginally outside the cutghost band through
//! round-off is still shipped; later hops close at the sub-box midpoint
//! because the near half already went with the first pair. A rank on a
//! non-periodic face gets an inverted (empty) band instead of a null
//! neighbor; a rank on a periodic face gets `pbc` image flags, with the
//! tilt components coupled in triclinic boxes.

use crate::config::{CommSettings, CommStyle};
use crate::constants::BIG;
use crate::domain::Domain;
use crate::topology::ProcTopology;

/// One paired send/receive along a face of the process grid.
#[derive(Clone, Debug)]
pub struct Swap {
    /// Dimension this swap moves along.
    pub dim: usize,
    /// Rank this swap sends to.
    pub sendproc: usize,
    /// Rank this swap receives from.
    pub recvproc: usize,
    /// Slab band lower bound (single style), in comm-frame coordinates.
    pub slablo: f64,
    /// Slab band upper bound (single style). `slabhi < slablo` marks an
    /// empty band at a non-periodic face.
    pub slabhi: f64,
    /// Per-species band lower bounds (multi style).
    pub multilo: Vec<f64>,
    /// Per-species band upper bounds (multi style).
    pub multihi: Vec<f64>,
    /// Whether this swap crosses the global-box wrap.
    pub pbc_flag: bool,
    /// Image offsets `(x, y, z, yz, xz, xy)` the sender applies.
    pub pbc: [i32; 6],
    /// Particles sent (filled by borders).
    pub sendnum: usize,
    /// Particles received (filled by borders).
    pub recvnum: usize,
    /// Ghost-array index where received particles land.
    pub firstrecv: usize,
    /// Values received per forward comm (`recvnum · size_forward`).
    pub size_forward_recv: usize,
    /// Values sent per reverse comm (`recvnum · size_reverse`).
    pub size_reverse_send: usize,
    /// Values received per reverse comm (`sendnum · size_reverse`).
    pub size_reverse_recv: usize,
    /// Cached local indices selected by borders, reused every step.
    pub sendlist: Vec<usize>,
}

/// The compiled swap sequence for the current box and cutoffs.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct SwapPlan {
    /// Hops needed per dimension.
    pub need: [usize; 3],
    /// Ghost cutoff per dimension in the comm frame.
    pub cutghost: [f64; 3],
    /// Per-species ghost cutoffs (multi style only).
    pub cutghost_multi: Vec<[f64; 3]>,
    /// Ordered swaps, `2·(need[0]+need[1]+need[2])` of them.
    pub swaps: Vec<Swap>,
}

impl SwapPlan {
    /// Number of swaps in the plan.
    #[must_use]
    pub fn nswap(&self) -> usize {
        self.swaps.len()
    }

    /// Compile the plan for the current box, cutoffs and settings.
    ///
    /// `cut_neigh_max` is the neighbor builder's largest cutoff;
    /// `cut_species` its per-species cutoffs (consulted in multi style).
    pub fn build(
        topo: &ProcTopology,
        domain: &Domain,
        settings: &CommSettings,
        cut_neigh_max: f64,
        cut_species: &[f64],
    ) -> Self {
        let cut = cut_neigh_max.max(settings.cutoff_user);

        // Ghost cutoff per dimension: plain distance in an orthogonal box,
        // scaled into lamda units by the inverse-edge row norms when
        // triclinic.
        let lengths = if domain.triclinic {
            let hi = domain.h_inv;
            [
                (hi[0] * hi[0] + hi[5] * hi[5] + hi[4] * hi[4]).sqrt(),
                (hi[1] * hi[1] + hi[3] * hi[3]).sqrt(),
                hi[2],
            ]
        } else {
            [1.0; 3]
        };
        let cutghost = [cut * lengths[0], cut * lengths[1], cut * lengths[2]];
        let cutghost_multi = if settings.style == CommStyle::Multi {
            cut_species
                .iter()
                .map(|&c| [c * lengths[0], c * lengths[1], c * lengths[2]])
                .collect()
        } else {
            Vec::new()
        };
        // Empty in single style: no per-species bands are kept.
        let nspecies = cutghost_multi.len();

        let prd = domain.comm_extents();
        let (sublo, subhi) = domain.comm_sub_bounds();
        let procgrid = topo.procgrid;

        let mut need = [0usize; 3];
        for d in 0..3 {
            need[d] = (cutghost[d] * procgrid[d] as f64 / prd[d]) as usize + 1;
            if !domain.periodicity[d] {
                need[d] = need[d].min(procgrid[d] - 1);
            }
        }
        if domain.dimension == 2 {
            need[2] = 0;
        }

        let mut swaps = Vec::with_capacity(2 * (need[0] + need[1] + need[2]));
        for dim in 0..3 {
            for ineed in 0..2 * need[dim] {
                let minus = ineed % 2 == 0;
                let midpoint = 0.5 * (sublo[dim] + subhi[dim]);
                let mut swap = Swap {
                    dim,
                    sendproc: topo.procneigh[dim][usize::from(!minus)],
                    recvproc: topo.procneigh[dim][usize::from(minus)],
                    slablo: 0.0,
                    slabhi: 0.0,
                    multilo: vec![0.0; nspecies],
                    multihi: vec![0.0; nspecies],
                    pbc_flag: false,
                    pbc: [0; 6],
                    sendnum: 0,
                    recvnum: 0,
                    firstrecv: 0,
                    size_forward_recv: 0,
                    size_reverse_send: 0,
                    size_reverse_recv: 0,
                    sendlist: Vec::new(),
                };

                if minus {
                    swap.slablo = if ineed < 2 { -BIG } else { midpoint };
                    swap.slabhi = sublo[dim] + cutghost[dim];
                    for t in 0..nspecies {
                        swap.multilo[t] = swap.slablo;
                        swap.multihi[t] = sublo[dim] + cutghost_multi[t][dim];
                    }
                } else {
                    swap.slablo = subhi[dim] - cutghost[dim];
                    swap.slabhi = if ineed < 2 { BIG } else { midpoint };
                    for t in 0..nspecies {
                        swap.multilo[t] = subhi[dim] - cutghost_multi[t][dim];
                        swap.multihi[t] = swap.slabhi;
                    }
                }

                let at_edge = if minus {
                    topo.myloc[dim] == 0
                } else {
                    topo.myloc[dim] + 1 == procgrid[dim]
                };
                if at_edge {
                    if domain.periodicity[dim] {
                        swap.pbc_flag = true;
                        let sign = if minus { 1 } else { -1 };
                        swap.pbc[dim] = sign;
                        if domain.triclinic {
                            if dim == 1 {
                                swap.pbc[5] = sign;
                            } else if dim == 2 {
                                swap.pbc[4] = sign;
                                swap.pbc[3] = sign;
                            }
                        }
                    } else {
                        // Empty band: selection can never match.
                        swap.slabhi = swap.slablo - 1.0;
                        for t in 0..nspecies {
                            swap.multihi[t] = swap.multilo[t] - 1.0;
                        }
                    }
                }

                swaps.push(swap);
            }
        }

        Self {
            need,
            cutghost,
            cutghost_multi,
            swaps,
        }
    }
}
