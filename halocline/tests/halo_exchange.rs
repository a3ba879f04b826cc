// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end halo-exchange scenarios on an in-process universe, one OS
//! thread per rank.
//!
//! Each thread builds the same deterministic global particle set, keeps
//! the particles that fall in its own sub-box, then drives the full
//! exchange → borders → forward → reverse cycle.

use halocline::comm::{Comm, ExchangeReport};
use halocline::config::{CommSettings, CommStyle};
use halocline::domain::Domain;
use halocline::fabric::local::{LocalFabric, LocalUniverse};
use halocline::particles::ParticleStore;

struct Rank {
    comm: Comm<LocalFabric>,
    store: ParticleStore,
    domain: Domain,
}

/// Build one rank's communicator and store from a global particle list,
/// keeping the particles inside this rank's sub-box.
fn bring_up(
    fabric: LocalFabric,
    mut domain: Domain,
    settings: CommSettings,
    user_grid: [usize; 3],
    cut: f64,
    species_cuts: &[f64],
    particles: &[([f64; 3], u32)],
) -> Rank {
    let comm = Comm::with_numa(fabric, settings, &domain, user_grid, 0).expect("comm");
    domain.set_local_box(comm.topology().myloc, comm.topology().procgrid);

    let mut store = ParticleStore::new();
    let (sublo, subhi) = domain.comm_sub_bounds();
    for (tag, (x, species)) in particles.iter().enumerate() {
        let mine = (0..3).all(|d| x[d] >= sublo[d] && x[d] < subhi[d]);
        if mine {
            store.add_owned(*x, [0.0; 3], *species, tag as i64 + 1);
        }
    }

    let mut rank = Rank {
        comm,
        store,
        domain,
    };
    rank.comm.init(&rank.store, &[]).expect("init");
    rank.comm.setup(&rank.domain, cut, species_cuts);
    rank
}

fn lcg_points(n: usize, extent: [f64; 3], seed: u64) -> Vec<([f64; 3], u32)> {
    let mut state = seed;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut x = [0.0; 3];
        for (d, slot) in x.iter_mut().enumerate() {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            *slot = (state >> 33) as f64 / (1u64 << 31) as f64 * extent[d];
        }
        out.push((x, (i % 2) as u32));
    }
    out
}

fn wrap_into_box(store: &mut ParticleStore, domain: &Domain) {
    for i in 0..store.nlocal {
        for d in 0..3 {
            if !domain.periodicity[d] {
                continue;
            }
            let lo = domain.boxlo[d];
            let prd = domain.prd[d];
            let mut c = store.x[i * 3 + d];
            while c < lo {
                c += prd;
            }
            while c >= lo + prd {
                c -= prd;
            }
            store.x[i * 3 + d] = c;
        }
    }
}

// ── S1: 4 ranks, 2D, wrapped x image ────────────────────────────────

#[test]
fn s1_two_d_wrap_image_lands_on_x_neighbor() {
    let particles = vec![([0.1f64, 2.5, 0.5], 0u32)];
    let results = LocalUniverse::run(4, |fabric| {
        let domain = Domain::orthogonal([0.0; 3], [10.0, 10.0, 1.0], [true; 3], 2);
        let mut rank = bring_up(
            fabric,
            domain,
            CommSettings::default(),
            [2, 2, 1],
            2.0,
            &[2.0],
            &particles,
        );
        assert_eq!(rank.comm.plan().need, [1, 1, 0]);
        assert_eq!(rank.comm.plan().nswap(), 4);
        rank.comm
            .borders(&mut rank.store, &rank.domain)
            .expect("borders");
        (
            rank.comm.topology().myloc,
            rank.store.nlocal,
            rank.store.nghost,
            rank.store.x.clone(),
            rank.store.tag.clone(),
        )
    });

    let owner = results
        .iter()
        .find(|(loc, ..)| *loc == [0, 0, 0])
        .expect("owner rank");
    assert_eq!(owner.1, 1);

    // The x-neighbor across the wrap sees the particle at x = 10.1.
    let (_, nlocal, nghost, x, tag) = results
        .iter()
        .find(|(loc, ..)| *loc == [1, 0, 0])
        .expect("x neighbor");
    assert_eq!(*nlocal, 0);
    let ghost = (*nlocal..nlocal + nghost)
        .find(|&g| tag[g] == 1)
        .expect("ghost image of tag 1");
    assert!((x[ghost * 3] - 10.1).abs() < 1e-12, "got {}", x[ghost * 3]);
    assert!((x[ghost * 3 + 1] - 2.5).abs() < 1e-12);
}

// ── S2: deep halo plan shape + exact corner images at one hop ───────

#[test]
fn s2_cutoff_beyond_subbox_needs_two_hops() {
    let results = LocalUniverse::run(8, |fabric| {
        let domain = Domain::orthogonal([0.0; 3], [5.0; 3], [true; 3], 3);
        let rank = bring_up(
            fabric,
            domain,
            CommSettings::default(),
            [0; 3],
            3.0,
            &[3.0],
            &[],
        );
        (rank.comm.topology().procgrid, rank.comm.plan().need, rank.comm.plan().nswap())
    });
    for (procgrid, need, nswap) in results {
        assert_eq!(procgrid, [2, 2, 2]);
        assert_eq!(need, [2, 2, 2]);
        assert_eq!(nswap, 12);
    }
}

#[test]
fn s2_corner_particle_images_seven_ranks() {
    let particles = vec![([0.1f64, 0.1, 0.1], 0u32)];
    let results = LocalUniverse::run(8, |fabric| {
        let domain = Domain::orthogonal([0.0; 3], [10.0; 3], [true; 3], 3);
        let mut rank = bring_up(
            fabric,
            domain,
            CommSettings::default(),
            [0; 3],
            2.0,
            &[2.0],
            &particles,
        );
        rank.comm
            .borders(&mut rank.store, &rank.domain)
            .expect("borders");
        let images = (rank.store.nlocal..rank.store.ntotal())
            .filter(|&g| rank.store.tag[g] == 1)
            .count();
        (rank.store.nlocal, images)
    });

    // One rank owns it; the 7 others each hold exactly one ghost image.
    let owners: Vec<_> = results.iter().filter(|(nlocal, _)| *nlocal == 1).collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].1, 0, "owner needs no image of its own particle");
    for (nlocal, images) in &results {
        if *nlocal == 0 {
            assert_eq!(*images, 1);
        }
    }
}

// ── S3: exchange across the periodic wrap ───────────────────────────

#[test]
fn s3_wrapped_mover_changes_owner_not_ghost() {
    let particles = vec![([0.1f64, 0.25, 0.25], 0u32)];
    let results = LocalUniverse::run(2, |fabric| {
        let domain = Domain::orthogonal([0.0; 3], [1.0, 0.5, 0.5], [true; 3], 3);
        let mut rank = bring_up(
            fabric,
            domain,
            CommSettings::default(),
            [2, 1, 1],
            0.4,
            &[0.4],
            &particles,
        );
        // The owner advances the particle across the wrap: 0.1 → -0.1.
        if rank.store.nlocal == 1 {
            rank.store.x[0] = -0.1;
        }
        wrap_into_box(&mut rank.store, &rank.domain);
        let report = rank
            .comm
            .exchange(&mut rank.store, &rank.domain)
            .expect("exchange");
        rank.comm
            .borders(&mut rank.store, &rank.domain)
            .expect("borders");
        (
            rank.comm.topology().myloc[0],
            rank.store.nlocal,
            report,
            rank.store.x.clone(),
        )
    });

    let total_owned: usize = results.iter().map(|r| r.1).sum();
    assert_eq!(total_owned, 1, "exchange must conserve ownership");
    let new_owner = results.iter().find(|r| r.1 == 1).expect("new owner");
    assert_eq!(new_owner.0, 1, "wrapped particle belongs to the top rank");
    assert!((new_owner.3[0] - 0.9).abs() < 1e-12);
    // The losing rank packed one record it did not keep.
    let loser = results.iter().find(|r| r.1 == 0).expect("old owner");
    assert_eq!(loser.2, ExchangeReport { sent: 1, kept: 0 });
    assert_eq!(new_owner.2, ExchangeReport { sent: 0, kept: 1 });
}

// ── S4: triclinic wrap image in lamda coordinates ───────────────────

#[test]
fn s4_triclinic_plus_x_edge_wraps_with_negative_image() {
    // Positions live in lamda coordinates for border traffic.
    let particles = vec![([0.99f64, 0.25, 0.5], 0u32)];
    let results = LocalUniverse::run(4, |fabric| {
        let domain = Domain::triclinic([0.0; 3], [10.0; 3], [3.0, 0.0, 0.0], [true; 3], 3);
        let mut rank = bring_up(
            fabric,
            domain,
            CommSettings::default(),
            [2, 2, 1],
            1.0,
            &[1.0],
            &particles,
        );
        rank.comm
            .borders(&mut rank.store, &rank.domain)
            .expect("borders");
        let wrap_pbc = rank
            .comm
            .plan()
            .swaps
            .iter()
            .find(|s| s.dim == 0 && s.pbc_flag && s.sendnum > 0)
            .map(|s| s.pbc);
        (
            rank.comm.topology().myloc,
            rank.store.nlocal,
            rank.store.nghost,
            rank.store.x.clone(),
            rank.domain.clone(),
            wrap_pbc,
        )
    });

    let owner = results
        .iter()
        .find(|(loc, nlocal, ..)| loc[0] == 1 && loc[1] == 0 && *nlocal == 1)
        .expect("owner at plus-x edge");
    assert_eq!(owner.5, Some([-1, 0, 0, 0, 0, 0]));

    let (_, nlocal, nghost, x, domain, _) = results
        .iter()
        .find(|(loc, ..)| *loc == [0, 0, 0])
        .expect("minus-x rank");
    assert_eq!(*nghost, 1);
    let g = *nlocal;
    assert!((x[g * 3] - (-0.01)).abs() < 1e-12, "lamda x = {}", x[g * 3]);

    // In real coordinates the image sits one x edge vector below the
    // original: x_ghost = x_owner - h·(1,0,0).
    let ghost_real = domain.lamda2x([x[g * 3], x[g * 3 + 1], x[g * 3 + 2]]);
    let owner_real = domain.lamda2x([0.99, 0.25, 0.5]);
    assert!((ghost_real[0] - (owner_real[0] - 10.0)).abs() < 1e-12);
    assert!((ghost_real[1] - owner_real[1]).abs() < 1e-12);
}

// ── S5: multi style, per-species ghost bands ────────────────────────

#[test]
fn s5_multi_style_ships_species_by_their_own_cutoff() {
    let particles = vec![
        ([0.2f64, 5.0, 5.0], 0u32),
        ([0.6, 5.0, 5.0], 0),
        ([0.2, 5.0, 5.0], 1),
        ([0.6, 5.0, 5.0], 1),
    ];
    let settings = CommSettings {
        style: CommStyle::Multi,
        ..CommSettings::default()
    };
    let results = LocalUniverse::run(2, |fabric| {
        let domain = Domain::orthogonal([0.0; 3], [2.0, 10.0, 10.0], [true; 3], 3);
        let mut rank = bring_up(
            fabric,
            domain,
            settings.clone(),
            [2, 1, 1],
            1.5,
            &[0.5, 1.5],
            &particles,
        );
        rank.comm
            .borders(&mut rank.store, &rank.domain)
            .expect("borders");
        let mut per_species = [0usize; 2];
        for g in rank.store.nlocal..rank.store.ntotal() {
            per_species[rank.store.species[g] as usize] += 1;
        }
        (rank.comm.topology().myloc[0], rank.store.nlocal, per_species)
    });

    let lower = results.iter().find(|r| r.0 == 0).expect("rank at x=0");
    let upper = results.iter().find(|r| r.0 == 1).expect("rank at x=1");
    assert_eq!(lower.1, 4);
    assert_eq!(upper.1, 0);
    // Short-ranged species 0 crosses only near faces; species 1's wider
    // band ships every copy. The counts must differ.
    assert_eq!(upper.2, [2, 4]);
}

// ── S6: non-periodic edge sends nothing outward ─────────────────────

#[test]
fn s6_non_periodic_edge_swaps_stay_empty() {
    // Two particles hug the non-periodic box faces (would wrap if x were
    // periodic), two sit near the interior face between the ranks.
    let particles = vec![
        ([0.1f64, 5.0, 5.0], 0u32),
        ([9.9, 5.0, 5.0], 0),
        ([4.9, 5.0, 5.0], 0),
        ([5.1, 5.0, 5.0], 0),
    ];
    let results = LocalUniverse::run(2, |fabric| {
        let domain = Domain::orthogonal([0.0; 3], [10.0; 3], [false, true, true], 3);
        let mut rank = bring_up(
            fabric,
            domain,
            CommSettings::default(),
            [2, 1, 1],
            2.0,
            &[2.0],
            &particles,
        );
        rank.comm
            .borders(&mut rank.store, &rank.domain)
            .expect("borders");
        let outward = rank
            .comm
            .plan()
            .swaps
            .iter()
            .find(|s| s.dim == 0 && s.slabhi < s.slablo)
            .map(|s| s.sendnum);
        (
            rank.comm.topology().myloc[0],
            rank.store.nghost,
            outward,
        )
    });

    for (myloc_x, nghost, outward) in results {
        // Each rank's boundary-facing swap is the empty band: the
        // face-hugging particle is never shipped across it.
        assert_eq!(outward, Some(0), "rank at x={myloc_x}");
        // Only the interior face produces a ghost.
        assert_eq!(nghost, 1, "rank at x={myloc_x}");
    }
}

// ── universal properties on a random system ─────────────────────────

#[test]
fn round_trip_sums_every_image_exactly_once() {
    let particles = lcg_points(64, [10.0; 3], 977);
    let results = LocalUniverse::run(8, |fabric| {
        let domain = Domain::orthogonal([0.0; 3], [10.0; 3], [true; 3], 3);
        let mut rank = bring_up(
            fabric,
            domain,
            CommSettings::default(),
            [0; 3],
            2.5,
            &[2.5],
            &particles,
        );
        rank.comm
            .borders(&mut rank.store, &rank.domain)
            .expect("borders");
        rank.comm
            .forward_comm(&mut rank.store, &rank.domain)
            .expect("forward");

        // Unit force on every ghost, zero on owners; reverse once.
        for i in 0..rank.store.nlocal * 3 {
            rank.store.f[i] = 0.0;
        }
        for g in rank.store.nlocal..rank.store.ntotal() {
            rank.store.f[g * 3] = 1.0;
        }
        rank.comm.reverse_comm(&mut rank.store).expect("reverse");

        let owned_sum: f64 = (0..rank.store.nlocal).map(|i| rank.store.f[i * 3]).sum();
        (owned_sum, rank.store.nghost)
    });

    let total_owned: f64 = results.iter().map(|r| r.0).sum();
    let total_ghosts: usize = results.iter().map(|r| r.1).sum();
    assert!(total_ghosts > 0);
    assert!(
        (total_owned - total_ghosts as f64).abs() < 1e-9,
        "each ghost must contribute exactly once: {total_owned} vs {total_ghosts}"
    );
}

#[test]
fn exchange_conserves_particles_in_a_periodic_box() {
    let particles = lcg_points(96, [10.0; 3], 1313);
    let results = LocalUniverse::run(8, |fabric| {
        let domain = Domain::orthogonal([0.0; 3], [10.0; 3], [true; 3], 3);
        let mut rank = bring_up(
            fabric,
            domain,
            CommSettings::default(),
            [0; 3],
            2.0,
            &[2.0],
            &particles,
        );
        // Kick every owned particle deterministically from its tag; some
        // cross faces, some wrap around the box.
        for i in 0..rank.store.nlocal {
            let t = rank.store.tag[i] as f64;
            rank.store.x[i * 3] += 1.2 * (t * 0.7).sin();
            rank.store.x[i * 3 + 1] += 1.2 * (t * 1.3).cos();
            rank.store.x[i * 3 + 2] += 1.2 * (t * 2.1).sin();
        }
        wrap_into_box(&mut rank.store, &rank.domain);
        let report = rank
            .comm
            .exchange(&mut rank.store, &rank.domain)
            .expect("exchange");

        // Every survivor must now sit inside this rank's sub-box.
        let (sublo, subhi) = rank.domain.comm_sub_bounds();
        for i in 0..rank.store.nlocal {
            for d in 0..3 {
                let c = rank.store.x[i * 3 + d];
                assert!(c >= sublo[d] && c < subhi[d], "particle escaped scan");
            }
        }
        (rank.store.nlocal, report)
    });

    let total: usize = results.iter().map(|r| r.0).sum();
    assert_eq!(total, 96);
    let sent: usize = results.iter().map(|r| r.1.sent).sum();
    let kept: usize = results.iter().map(|r| r.1.kept).sum();
    assert_eq!(sent, kept, "no particle may be lost at this step size");
}

#[test]
fn halo_is_complete_within_the_cutoff() {
    let rc = 2.5;
    let side = 10.0;
    let particles = lcg_points(48, [side; 3], 4242);
    let results = LocalUniverse::run(8, |fabric| {
        let domain = Domain::orthogonal([0.0; 3], [side; 3], [true; 3], 3);
        let mut rank = bring_up(
            fabric,
            domain,
            CommSettings::default(),
            [0; 3],
            rc,
            &[rc],
            &particles,
        );
        rank.comm
            .borders(&mut rank.store, &rank.domain)
            .expect("borders");

        // For every owned p and every global q within the periodic
        // cutoff, some local copy of q must lie within rc in plain
        // coordinates.
        for i in 0..rank.store.nlocal {
            let p = [
                rank.store.x[i * 3],
                rank.store.x[i * 3 + 1],
                rank.store.x[i * 3 + 2],
            ];
            for (qtag0, (q, _)) in particles.iter().enumerate() {
                let qtag = qtag0 as i64 + 1;
                if qtag == rank.store.tag[i] {
                    continue;
                }
                let mut dist2 = 0.0;
                for d in 0..3 {
                    let mut delta = (p[d] - q[d]).abs() % side;
                    if delta > side / 2.0 {
                        delta = side - delta;
                    }
                    dist2 += delta * delta;
                }
                if dist2.sqrt() > rc {
                    continue;
                }
                let covered = (0..rank.store.ntotal()).any(|j| {
                    if rank.store.tag[j] != qtag {
                        return false;
                    }
                    let mut raw2 = 0.0;
                    for d in 0..3 {
                        let delta = p[d] - rank.store.x[j * 3 + d];
                        raw2 += delta * delta;
                    }
                    raw2.sqrt() <= rc + 1e-9
                });
                assert!(covered, "missing halo copy of tag {qtag}");
            }
        }
        rank.store.nghost
    });
    assert!(results.into_iter().all(|n| n > 0));
}

#[test]
fn steady_loop_runs_many_cycles_without_drift() {
    let particles = lcg_points(60, [10.0; 3], 31415);
    let results = LocalUniverse::run(4, |fabric| {
        let domain = Domain::orthogonal([0.0; 3], [10.0; 3], [true; 3], 3);
        let mut rank = bring_up(
            fabric,
            domain,
            CommSettings::default(),
            [0; 3],
            2.0,
            &[2.0],
            &particles,
        );
        for step in 0..6 {
            for i in 0..rank.store.nlocal {
                rank.store.x[i * 3 + step % 3] += 0.45;
            }
            wrap_into_box(&mut rank.store, &rank.domain);
            rank.comm
                .exchange(&mut rank.store, &rank.domain)
                .expect("exchange");
            rank.comm
                .borders(&mut rank.store, &rank.domain)
                .expect("borders");
            rank.comm
                .forward_comm(&mut rank.store, &rank.domain)
                .expect("forward");
            rank.comm.reverse_comm(&mut rank.store).expect("reverse");
        }
        rank.store.nlocal
    });
    let total: usize = results.into_iter().sum();
    assert_eq!(total, 60);
}

#[test]
fn map_resolves_tags_after_borders() {
    let particles = lcg_points(32, [10.0; 3], 2718);
    let results = LocalUniverse::run(4, |fabric| {
        let domain = Domain::orthogonal([0.0; 3], [10.0; 3], [true; 3], 3);
        let mut rank = bring_up(
            fabric,
            domain,
            CommSettings::default(),
            [0; 3],
            2.0,
            &[2.0],
            &particles,
        );
        rank.comm
            .borders(&mut rank.store, &rank.domain)
            .expect("borders");
        for j in 0..rank.store.ntotal() {
            let found = rank.store.map_find(rank.store.tag[j]).expect("mapped tag");
            assert_eq!(rank.store.tag[found], rank.store.tag[j]);
            // owned copies shadow their own ghost images
            if j < rank.store.nlocal {
                assert_eq!(found, j);
            }
        }
        true
    });
    assert!(results.into_iter().all(|ok| ok));
}
