// SPDX-License-Identifier: AGPL-3.0-only

//! NUMA-aware process-grid planning.
//!
//! When each compute node carries `K` NUMA domains, swap latency drops if
//! the ranks of one domain sit contiguously in the process grid: most
//! face traffic then crosses shared memory instead of the network. The
//! planner gathers hostnames, factors the rank count twice — an
//! intra-domain sub-grid and an inter-domain grid scaled by that sub-grid
//! — refines the sub-grid against the chosen domain grid, and composes
//! the two into per-rank coordinates.
//!
//! Any non-uniformity (uneven ranks per node, ranks per node not
//! divisible by the domain count, fewer than 3 ranks per domain, a single
//! domain in use) falls back to the plain factorizer: the caller gets
//! `Ok(None)` and runs [`crate::grid::factor_grid`] instead.
//!
//! Invariant: ranks of one NUMA domain are contiguous in grid coordinates
//! along x first, then y, then z.

use std::collections::BTreeMap;

use crate::domain::Domain;
use crate::error::CommError;
use crate::fabric::Fabric;
use crate::grid::factor_grid;
use crate::topology::ProcTopology;

/// Fixed width of a gathered hostname record.
const NAME_BYTES: usize = 64;

/// NUMA domains per node baked in at build time (`NUMA_NODES`), 0 when
/// unset.
#[must_use]
pub fn numa_nodes_configured() -> usize {
    option_env!("NUMA_NODES")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}

/// Plan a NUMA-grouped topology, or `Ok(None)` to fall back to the plain
/// factorizer.
///
/// # Errors
///
/// [`CommError::BadGrid`] when a factorization or the composed map is
/// inconsistent, [`CommError::DimensionMismatch`] for a 2D box split in
/// z, [`CommError::Fabric`] if a collective fails.
pub fn plan<F: Fabric>(
    fabric: &F,
    domain: &Domain,
    user: [usize; 3],
    numa_per_node: usize,
) -> Result<Option<ProcTopology>, CommError> {
    let me = fabric.rank();
    let nprocs = fabric.size();
    if numa_per_node == 0 || nprocs == 1 {
        return Ok(None);
    }

    let names = gather_hostnames(fabric)?;

    // Ranks per node, and the uniformity gates.
    let mut per_node: BTreeMap<&str, usize> = BTreeMap::new();
    for name in &names {
        *per_node.entry(name.as_str()).or_insert(0) += 1;
    }
    let procs_per_node = per_node.values().copied().next().unwrap_or(0);
    if per_node.values().any(|&count| count != procs_per_node) {
        return Ok(None);
    }
    if procs_per_node % numa_per_node != 0 {
        return Ok(None);
    }
    let procs_per_numa = procs_per_node / numa_per_node;
    if procs_per_numa < 3 || nprocs % procs_per_numa != 0 || nprocs <= procs_per_numa {
        return Ok(None);
    }

    let two_d = domain.dimension == 2;
    let areas = domain.face_areas();
    let unit = [1usize; 3];
    let no_user = [0usize; 3];
    // Sub-grid scaling only applies to orthogonal boxes.
    let scale_of = |grid: [usize; 3]| if domain.triclinic { unit } else { grid };

    // Intra-domain sub-grid, unscaled first.
    let mut numagrid = factor_grid(procs_per_numa, no_user, areas, unit, two_d);
    check_product(procs_per_numa, numagrid)?;

    // Inter-domain grid, scaled by the sub-grid.
    let domain_count = nprocs / procs_per_numa;
    let nodegrid = factor_grid(domain_count, user, areas, scale_of(numagrid), two_d);
    check_product(domain_count, nodegrid)?;

    // Refine the sub-grid now that the domain layout is known.
    numagrid = factor_grid(procs_per_numa, no_user, areas, scale_of(nodegrid), two_d);
    check_product(procs_per_numa, numagrid)?;

    if domain.dimension == 2 && (nodegrid[2] != 1 || numagrid[2] != 1) {
        return Err(CommError::DimensionMismatch {
            pz: nodegrid[2] * numagrid[2],
        });
    }

    // Rank-within-node for everyone, by world-rank order among same-host
    // ranks (the order a communicator split by hostname would produce).
    let mut node_rank = vec![0usize; nprocs];
    {
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        for (r, name) in names.iter().enumerate() {
            let count = seen.entry(name.as_str()).or_insert(0);
            node_rank[r] = *count;
            *count += 1;
        }
    }
    let numa_rank = node_rank[me] % procs_per_numa;

    // My domain's leader is the lowest world rank of my NUMA group;
    // domains are laid out over the inter-domain grid in leader
    // world-rank order.
    let leader_node_rank = node_rank[me] - numa_rank;
    let leader = (0..=me)
        .find(|&r| names[r] == names[me] && node_rank[r] == leader_node_rank)
        .unwrap_or(me);
    let domain_index = (0..leader)
        .filter(|&r| node_rank[r] % procs_per_numa == 0)
        .count();
    let leader_coord = [
        domain_index / (nodegrid[1] * nodegrid[2]),
        (domain_index / nodegrid[2]) % nodegrid[1],
        domain_index % nodegrid[2],
    ];

    // Offsets inside the domain: x fastest, then y, then z.
    let offset = [
        numa_rank % numagrid[0],
        (numa_rank / numagrid[0]) % numagrid[1],
        numa_rank / (numagrid[0] * numagrid[1]),
    ];

    let procgrid = [
        nodegrid[0] * numagrid[0],
        nodegrid[1] * numagrid[1],
        nodegrid[2] * numagrid[2],
    ];
    let myloc = [
        leader_coord[0] * numagrid[0] + offset[0],
        leader_coord[1] * numagrid[1] + offset[1],
        leader_coord[2] * numagrid[2] + offset[2],
    ];

    // Compose the map from everyone's location.
    let my_coords = [myloc[0] as i32, myloc[1] as i32, myloc[2] as i32];
    let mut gathered = vec![0i32; 3 * nprocs];
    fabric.allgather_i32(&my_coords, &mut gathered)?;

    let mut grid2proc = vec![usize::MAX; nprocs];
    for (rank, coords) in gathered.chunks_exact(3).enumerate() {
        let (i, j, k) = (coords[0] as usize, coords[1] as usize, coords[2] as usize);
        let slot = (i * procgrid[1] + j) * procgrid[2] + k;
        if grid2proc[slot] != usize::MAX {
            return Err(CommError::BadGrid {
                nprocs,
                grid: procgrid,
            });
        }
        grid2proc[slot] = rank;
    }

    Ok(Some(ProcTopology::from_parts(procgrid, myloc, grid2proc)))
}

fn check_product(count: usize, grid: [usize; 3]) -> Result<(), CommError> {
    if grid[0] * grid[1] * grid[2] == count {
        Ok(())
    } else {
        Err(CommError::BadGrid {
            nprocs: count,
            grid,
        })
    }
}

fn gather_hostnames<F: Fabric>(fabric: &F) -> Result<Vec<String>, CommError> {
    let mut record = fabric.processor_name().into_bytes();
    record.resize(NAME_BYTES, 0);
    let mut gathered = vec![0u8; NAME_BYTES * fabric.size()];
    fabric.allgather_bytes(&record, &mut gathered)?;
    Ok(gathered
        .chunks_exact(NAME_BYTES)
        .map(|chunk| {
            String::from_utf8_lossy(chunk)
                .trim_end_matches('\0')
                .to_string()
        })
        .collect())
}
