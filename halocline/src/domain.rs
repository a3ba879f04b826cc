// SPDX-License-Identifier: AGPL-3.0-only

//! Simulation-box geometry: orthogonal or triclinic, global and per-rank.
//!
//! The triclinic box is held as the 6-component upper-triangular edge
//! matrix `h = (xx, yy, zz, yz, xz, xy)`; fractional ("lamda") coordinates
//! in `[0,1)` map to box coordinates through `h`. All communication in a
//! triclinic box happens in lamda coordinates, where the sub-box is again
//! an axis-aligned brick.
//!
//! Face areas drive the grid factorizer: communication volume scales with
//! the per-rank surface, so the factorizer wants the areas of the three
//! distinct box faces (cross products of edge vectors in the triclinic
//! case).

/// Vector cross product `a × b`.
#[must_use]
pub fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Global box plus this rank's sub-box, in box and lamda coordinates.
#[derive(Clone, Debug)]
#[must_use]
pub struct Domain {
    /// 2 or 3. In 2D no communication happens along z.
    pub dimension: usize,
    /// Non-orthogonal box flag; when set, comm runs in lamda coordinates.
    pub triclinic: bool,
    /// Periodic boundary flag per dimension.
    pub periodicity: [bool; 3],
    /// Global box lower corner.
    pub boxlo: [f64; 3],
    /// Global box upper corner.
    pub boxhi: [f64; 3],
    /// Global box edge lengths (xprd, yprd, zprd).
    pub prd: [f64; 3],
    /// Edge matrix (xx, yy, zz, yz, xz, xy). Tilts are zero when orthogonal.
    pub h: [f64; 6],
    /// Inverse edge matrix, same component order.
    pub h_inv: [f64; 6],
    /// This rank's sub-box bounds in box coordinates.
    pub sublo: [f64; 3],
    /// Upper sub-box bounds in box coordinates.
    pub subhi: [f64; 3],
    /// Sub-box bounds in lamda coordinates (triclinic comm path).
    pub sublo_lamda: [f64; 3],
    /// Upper sub-box bounds in lamda coordinates.
    pub subhi_lamda: [f64; 3],
}

impl Domain {
    /// Orthogonal box from its two corners.
    pub fn orthogonal(
        boxlo: [f64; 3],
        boxhi: [f64; 3],
        periodicity: [bool; 3],
        dimension: usize,
    ) -> Self {
        let prd = [
            boxhi[0] - boxlo[0],
            boxhi[1] - boxlo[1],
            boxhi[2] - boxlo[2],
        ];
        let h = [prd[0], prd[1], prd[2], 0.0, 0.0, 0.0];
        Self {
            dimension,
            triclinic: false,
            periodicity,
            boxlo,
            boxhi,
            prd,
            h,
            h_inv: Self::invert_h(h),
            sublo: boxlo,
            subhi: boxhi,
            sublo_lamda: [0.0; 3],
            subhi_lamda: [1.0; 3],
        }
    }

    /// Triclinic box from its corners and tilt factors `(xy, xz, yz)`.
    pub fn triclinic(
        boxlo: [f64; 3],
        boxhi: [f64; 3],
        tilt: [f64; 3],
        periodicity: [bool; 3],
        dimension: usize,
    ) -> Self {
        let prd = [
            boxhi[0] - boxlo[0],
            boxhi[1] - boxlo[1],
            boxhi[2] - boxlo[2],
        ];
        let (xy, xz, yz) = (tilt[0], tilt[1], tilt[2]);
        let h = [prd[0], prd[1], prd[2], yz, xz, xy];
        Self {
            dimension,
            triclinic: true,
            periodicity,
            boxlo,
            boxhi,
            prd,
            h,
            h_inv: Self::invert_h(h),
            sublo: boxlo,
            subhi: boxhi,
            sublo_lamda: [0.0; 3],
            subhi_lamda: [1.0; 3],
        }
    }

    /// Inverse of the upper-triangular edge matrix.
    fn invert_h(h: [f64; 6]) -> [f64; 6] {
        [
            1.0 / h[0],
            1.0 / h[1],
            1.0 / h[2],
            -h[3] / (h[1] * h[2]),
            (h[3] * h[5] - h[1] * h[4]) / (h[0] * h[1] * h[2]),
            -h[5] / (h[0] * h[1]),
        ]
    }

    /// Areas of the three distinct box faces: `(xy, xz, yz)`.
    ///
    /// Orthogonal boxes are axis-aligned products; triclinic faces are
    /// cross products of the `h` edge vectors.
    #[must_use]
    pub fn face_areas(&self) -> [f64; 3] {
        if self.triclinic {
            let a = [self.h[0], 0.0, 0.0];
            let b = [self.h[5], self.h[1], 0.0];
            let c = [self.h[4], self.h[3], self.h[2]];
            [norm(cross(a, b)), norm(cross(a, c)), norm(cross(b, c))]
        } else {
            [
                self.prd[0] * self.prd[1],
                self.prd[0] * self.prd[2],
                self.prd[1] * self.prd[2],
            ]
        }
    }

    /// Assign this rank's sub-box from its grid location.
    ///
    /// The top rank in each dimension lands exactly on the box face so
    /// round-off can never open a gap at the global boundary.
    pub fn set_local_box(&mut self, myloc: [usize; 3], procgrid: [usize; 3]) {
        for d in 0..3 {
            let pd = procgrid[d] as f64;
            let lo_frac = myloc[d] as f64 / pd;
            let hi_frac = (myloc[d] + 1) as f64 / pd;
            self.sublo_lamda[d] = lo_frac;
            self.subhi_lamda[d] = if myloc[d] + 1 == procgrid[d] {
                1.0
            } else {
                hi_frac
            };
            self.sublo[d] = self.boxlo[d] + lo_frac * self.prd[d];
            self.subhi[d] = if myloc[d] + 1 == procgrid[d] {
                self.boxhi[d]
            } else {
                self.boxlo[d] + hi_frac * self.prd[d]
            };
        }
    }

    /// Box → lamda coordinates for one point.
    #[must_use]
    pub fn x2lamda(&self, x: [f64; 3]) -> [f64; 3] {
        let d = [x[0] - self.boxlo[0], x[1] - self.boxlo[1], x[2] - self.boxlo[2]];
        [
            self.h_inv[0] * d[0] + self.h_inv[5] * d[1] + self.h_inv[4] * d[2],
            self.h_inv[1] * d[1] + self.h_inv[3] * d[2],
            self.h_inv[2] * d[2],
        ]
    }

    /// Lamda → box coordinates for one point.
    #[must_use]
    pub fn lamda2x(&self, la: [f64; 3]) -> [f64; 3] {
        [
            self.h[0] * la[0] + self.h[5] * la[1] + self.h[4] * la[2] + self.boxlo[0],
            self.h[1] * la[1] + self.h[3] * la[2] + self.boxlo[1],
            self.h[2] * la[2] + self.boxlo[2],
        ]
    }

    /// Extents of the coordinate frame communication runs in: box edge
    /// lengths when orthogonal, unit lamda extents when triclinic.
    #[must_use]
    pub fn comm_extents(&self) -> [f64; 3] {
        if self.triclinic {
            [1.0; 3]
        } else {
            self.prd
        }
    }

    /// Sub-box bounds in the communication frame.
    #[must_use]
    pub fn comm_sub_bounds(&self) -> ([f64; 3], [f64; 3]) {
        if self.triclinic {
            (self.sublo_lamda, self.subhi_lamda)
        } else {
            (self.sublo, self.subhi)
        }
    }

    /// Displacement a forward-comm pack applies for a periodic image, in
    /// box coordinates (tilt-coupled when triclinic).
    #[must_use]
    pub fn image_shift(&self, pbc: &[i32; 6]) -> [f64; 3] {
        if self.triclinic {
            [
                f64::from(pbc[0]) * self.h[0]
                    + f64::from(pbc[5]) * self.h[5]
                    + f64::from(pbc[4]) * self.h[4],
                f64::from(pbc[1]) * self.h[1] + f64::from(pbc[3]) * self.h[3],
                f64::from(pbc[2]) * self.h[2],
            ]
        } else {
            [
                f64::from(pbc[0]) * self.prd[0],
                f64::from(pbc[1]) * self.prd[1],
                f64::from(pbc[2]) * self.prd[2],
            ]
        }
    }

    /// Displacement a border/exchange pack applies for a periodic image.
    ///
    /// Border traffic runs in lamda coordinates when triclinic, where each
    /// periodic extent is exactly 1.
    #[must_use]
    pub fn border_shift(&self, pbc: &[i32; 6]) -> [f64; 3] {
        if self.triclinic {
            [f64::from(pbc[0]), f64::from(pbc[1]), f64::from(pbc[2])]
        } else {
            [
                f64::from(pbc[0]) * self.prd[0],
                f64::from(pbc[1]) * self.prd[1],
                f64::from(pbc[2]) * self.prd[2],
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn orthogonal_face_areas() {
        let d = Domain::orthogonal([0.0; 3], [2.0, 3.0, 5.0], [true; 3], 3);
        let areas = d.face_areas();
        assert!(close(areas[0], 6.0));
        assert!(close(areas[1], 10.0));
        assert!(close(areas[2], 15.0));
    }

    #[test]
    fn triclinic_zero_tilt_matches_orthogonal() {
        let o = Domain::orthogonal([0.0; 3], [2.0, 3.0, 5.0], [true; 3], 3);
        let t = Domain::triclinic([0.0; 3], [2.0, 3.0, 5.0], [0.0; 3], [true; 3], 3);
        let ao = o.face_areas();
        let at = t.face_areas();
        for d in 0..3 {
            assert!(close(ao[d], at[d]), "face {d}");
        }
    }

    #[test]
    fn tilted_xy_face_area_grows_in_xz() {
        // xy tilt shears the y edge into x; the xy face area is unchanged
        // (|a×b| = xx*yy) but the xz/yz faces grow.
        let t = Domain::triclinic([0.0; 3], [2.0, 2.0, 2.0], [1.0, 0.0, 0.0], [true; 3], 3);
        let areas = t.face_areas();
        assert!(close(areas[0], 4.0));
        assert!(areas[2] > 4.0);
    }

    #[test]
    fn lamda_round_trip() {
        let t = Domain::triclinic(
            [-1.0, 0.0, 2.0],
            [3.0, 4.0, 6.0],
            [0.5, 0.25, -0.3],
            [true; 3],
            3,
        );
        let x = [1.7, 2.9, 4.1];
        let back = t.lamda2x(t.x2lamda(x));
        for d in 0..3 {
            assert!(close(x[d], back[d]), "dim {d}");
        }
    }

    #[test]
    fn lamda_of_corners_is_unit_cube() {
        let t = Domain::triclinic([0.0; 3], [2.0, 3.0, 4.0], [0.7, 0.2, 0.4], [true; 3], 3);
        let lo = t.x2lamda(t.boxlo);
        for d in 0..3 {
            assert!(close(lo[d], 0.0), "low corner dim {d}");
        }
        // upper corner in box coords is h·(1,1,1) + boxlo
        let hi = t.lamda2x([1.0, 1.0, 1.0]);
        let back = t.x2lamda(hi);
        for d in 0..3 {
            assert!(close(back[d], 1.0), "high corner dim {d}");
        }
    }

    #[test]
    fn local_box_partitions_exactly() {
        let mut d = Domain::orthogonal([0.0; 3], [10.0; 3], [true; 3], 3);
        d.set_local_box([2, 0, 0], [3, 1, 1]);
        assert!(close(d.subhi[0], 10.0));
        assert!(close(d.sublo[0], 10.0 * 2.0 / 3.0));
        assert!(close(d.sublo[1], 0.0));
        assert!(close(d.subhi[1], 10.0));
        assert!(close(d.subhi_lamda[0], 1.0));
    }

    #[test]
    fn image_shift_orthogonal() {
        let d = Domain::orthogonal([0.0; 3], [10.0, 20.0, 30.0], [true; 3], 3);
        let s = d.image_shift(&[1, -1, 0, 0, 0, 0]);
        assert!(close(s[0], 10.0));
        assert!(close(s[1], -20.0));
        assert!(close(s[2], 0.0));
    }

    #[test]
    fn image_shift_triclinic_couples_tilt() {
        let d = Domain::triclinic([0.0; 3], [10.0, 10.0, 10.0], [2.0, 0.0, 0.0], [true; 3], 3);
        // y image crosses the xy tilt: pbc = (0,1,0, 0,0,1)
        let s = d.image_shift(&[0, 1, 0, 0, 0, 1]);
        assert!(close(s[0], 2.0));
        assert!(close(s[1], 10.0));
    }

    #[test]
    fn border_shift_is_unit_in_lamda() {
        let d = Domain::triclinic([0.0; 3], [10.0, 10.0, 10.0], [2.0, 0.0, 0.0], [true; 3], 3);
        let s = d.border_shift(&[-1, 0, 0, 0, 0, 0]);
        assert!(close(s[0], -1.0));
    }

    #[test]
    fn cross_of_axes() {
        let c = cross([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        assert!(close(c[2], 1.0));
        assert!(close(c[0], 0.0));
    }
}
