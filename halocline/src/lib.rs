// SPDX-License-Identifier: AGPL-3.0-only

// Clippy pedantic/nursery + domain-specific allows are in
// [workspace.lints.clippy] in Cargo.toml. Library code must propagate
// errors, not panic:
#![deny(clippy::expect_used, clippy::unwrap_used)]
#![warn(missing_docs)]

//! halocline — spatial-decomposition communication core for distributed
//! molecular dynamics.
//!
//! A simulation volume is split into a 3D grid of sub-boxes, one per rank.
//! Every timestep the ranks exchange boundary-particle positions with their
//! neighbors (a halo of ghost particles), return forces accumulated on
//! ghosts to their owners, and periodically migrate ownership of particles
//! that drifted across sub-box faces.
//!
//! # Architecture
//!
//! ```text
//! startup:      grid ──▶ topology          (once; numa variant optional)
//! box resize:   plan                       (swap descriptors, slab bands)
//! every step:   comm::forward ▷ … ▷ comm::reverse
//! reneighbor:   comm::exchange ▷ comm::borders
//! ```
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `grid` | factor P ranks into (Px,Py,Pz) minimizing surface area |
//! | `numa` | two-level factorization grouping ranks that share a host |
//! | `topology` | rank↔(i,j,k) map and the six face neighbors |
//! | `plan` | hop counts, slab bands, periodic-image flags per swap |
//! | `comm` | forward/reverse halo traffic, exchange, borders |
//! | `fabric` | message layer: in-process channels or MPI (`mpi-fabric`) |
//! | `particles` | owned+ghost particle arrays and the pack/unpack codecs |
//! | `domain` | orthogonal/triclinic box geometry and sub-box bounds |
//! | `buffers` | grow-only send/recv scratch with hysteresis |
//!
//! The steady-state loop never allocates: `borders` caches per-swap send
//! lists and pre-grows both scratch buffers to the worst case it observed.

/// Grow-only send/recv scratch buffers.
pub mod buffers;
/// The communicator: swap execution engines and extension dispatch.
pub mod comm;
/// Communication style and the `communicate` command parser.
pub mod config;
/// Buffer policy and dispatch constants with justification.
pub mod constants;
/// Orthogonal/triclinic box geometry and sub-box bounds.
pub mod domain;
/// Typed errors for decomposition and communication failure modes.
pub mod error;
/// Message-passing fabric abstraction and its backends.
pub mod fabric;
/// Surface-minimizing process-grid factorization.
pub mod grid;
/// NUMA-aware two-level process-grid planning.
pub mod numa;
/// Particle store: owned+ghost arrays and pack/unpack codecs.
pub mod particles;
/// Swap-plan construction: hop counts, slabs, periodic images.
pub mod plan;
/// Process topology: grid2proc map and face neighbors.
pub mod topology;

pub use comm::Comm;
pub use config::{CommSettings, CommStyle};
pub use error::CommError;
pub use fabric::Fabric;
