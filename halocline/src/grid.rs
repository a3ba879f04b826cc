// SPDX-License-Identifier: AGPL-3.0-only

//! Factor a rank count into a 3D process grid minimizing surface area.
//!
//! Communication volume per rank scales with the surface of its sub-box,
//! so the factorizer minimizes `a_xy/(px·py) + a_xz/(px·pz) + a_yz/(py·pz)`
//! over all factorizations `px·py·pz = P`. User-pinned dimensions and the
//! 2D constraint (`pz = 1`) restrict the search; per-dimension scale
//! factors shrink the effective box when a sub-grid of a larger plan is
//! being factored (the NUMA path).
//!
//! The search enumerates divisors — trivially cheap for any realistic P —
//! in ascending `(px, py)` lexicographic order, keeping the first optimum.

/// Factor `nprocs` into `(px, py, pz)`.
///
/// `user` pins a dimension when nonzero. `areas` are the global box face
/// areas `(xy, xz, yz)`; `scale` divides the corresponding box edges
/// (pass `[1, 1, 1]` when factoring the whole box). `two_d` forces
/// `pz = 1`.
///
/// When the user pins make `nprocs` unreachable the returned triple does
/// not multiply to `nprocs`; callers must check and surface
/// [`crate::error::CommError::BadGrid`].
#[must_use]
pub fn factor_grid(
    nprocs: usize,
    user: [usize; 3],
    areas: [f64; 3],
    scale: [usize; 3],
    two_d: bool,
) -> [usize; 3] {
    let mut grid = user;

    // All three pinned: taken verbatim.
    if user[0] > 0 && user[1] > 0 && user[2] > 0 {
        return grid;
    }

    // Exactly two pinned: the third is the quotient.
    if user[0] > 0 && user[1] > 0 {
        grid[2] = nprocs / (user[0] * user[1]);
        return grid;
    } else if user[0] > 0 && user[2] > 0 {
        grid[1] = nprocs / (user[0] * user[2]);
        return grid;
    } else if user[1] > 0 && user[2] > 0 {
        grid[0] = nprocs / (user[1] * user[2]);
        return grid;
    }

    let area = [
        areas[0] / (scale[0] * scale[1]) as f64,
        areas[1] / (scale[0] * scale[2]) as f64,
        areas[2] / (scale[1] * scale[2]) as f64,
    ];

    // Any admissible factorization beats this: its surface is at most
    // area[0] + area[1] + area[2].
    let mut bestsurf = 2.0 * (area[0] + area[1] + area[2]);

    for ipx in 1..=nprocs {
        if nprocs % ipx != 0 || (user[0] > 0 && ipx != user[0]) {
            continue;
        }
        let rem = nprocs / ipx;
        for ipy in 1..=rem {
            if rem % ipy != 0 || (user[1] > 0 && ipy != user[1]) {
                continue;
            }
            let ipz = rem / ipy;
            if (user[2] > 0 && ipz != user[2]) || (two_d && ipz != 1) {
                continue;
            }
            let surf = area[0] / (ipx * ipy) as f64
                + area[1] / (ipx * ipz) as f64
                + area[2] / (ipy * ipz) as f64;
            if surf < bestsurf {
                bestsurf = surf;
                grid = [ipx, ipy, ipz];
            }
        }
    }

    grid
}
