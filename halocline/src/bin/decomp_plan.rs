// SPDX-License-Identifier: AGPL-3.0-only

//! Decomposition planning report.
//!
//! Factors a rank count over a box, builds rank 0's topology and swap
//! plan, prints the human-readable grid line and emits a JSON report.
//!
//! ```text
//! decomp_plan <nprocs> <lx> <ly> <lz> <cutoff> [px py pz]
//! ```

use std::env;
use std::process;

use serde::Serialize;

use halocline::config::CommSettings;
use halocline::domain::Domain;
use halocline::grid::factor_grid;
use halocline::plan::SwapPlan;
use halocline::topology::ProcTopology;

#[derive(Serialize)]
struct PlanReport {
    nprocs: usize,
    procgrid: [usize; 3],
    need: [usize; 3],
    nswap: usize,
    cutghost: [f64; 3],
    subbox: [f64; 3],
    wrapping_swaps: usize,
}

fn usage() -> ! {
    eprintln!("usage: decomp_plan <nprocs> <lx> <ly> <lz> <cutoff> [px py pz]");
    process::exit(2);
}

fn parse<T: std::str::FromStr>(arg: Option<&String>) -> T {
    match arg.and_then(|a| a.parse().ok()) {
        Some(value) => value,
        None => usage(),
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 6 && args.len() != 9 {
        usage();
    }
    let nprocs: usize = parse(args.get(1));
    let lx: f64 = parse(args.get(2));
    let ly: f64 = parse(args.get(3));
    let lz: f64 = parse(args.get(4));
    let cutoff: f64 = parse(args.get(5));
    let user: [usize; 3] = if args.len() == 9 {
        [parse(args.get(6)), parse(args.get(7)), parse(args.get(8))]
    } else {
        [0; 3]
    };

    let mut domain = Domain::orthogonal([0.0; 3], [lx, ly, lz], [true; 3], 3);
    let procgrid = factor_grid(nprocs, user, domain.face_areas(), [1; 3], false);
    if procgrid[0] * procgrid[1] * procgrid[2] != nprocs {
        eprintln!(
            "Bad grid of processors: {}x{}x{} != {nprocs} ranks",
            procgrid[0], procgrid[1], procgrid[2]
        );
        process::exit(1);
    }

    let topo = ProcTopology::cartesian(0, procgrid);
    domain.set_local_box(topo.myloc, topo.procgrid);

    let settings = CommSettings::default();
    let plan = SwapPlan::build(&topo, &domain, &settings, cutoff, &[cutoff]);

    println!(
        "  {} by {} by {} processor grid",
        procgrid[0], procgrid[1], procgrid[2]
    );
    println!(
        "  halo: need = {:?}, {} swaps, cutghost = {:.4}",
        plan.need,
        plan.nswap(),
        plan.cutghost[0]
    );

    let report = PlanReport {
        nprocs,
        procgrid,
        need: plan.need,
        nswap: plan.nswap(),
        cutghost: plan.cutghost,
        subbox: [
            domain.subhi[0] - domain.sublo[0],
            domain.subhi[1] - domain.sublo[1],
            domain.subhi[2] - domain.sublo[2],
        ],
        wrapping_swaps: plan.swaps.iter().filter(|s| s.pbc_flag).count(),
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("report serialization failed: {err}");
            process::exit(1);
        }
    }
}
