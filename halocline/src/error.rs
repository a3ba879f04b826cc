// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for decomposition and communication operations.
//!
//! Every structural failure here is a configuration or programming bug on
//! some rank; callers are expected to abort the whole run, not retry.
//! The one tolerated soft failure — particles that move more than one
//! sub-box between reneighborings — is *not* an error: `Comm::exchange`
//! reports sent/kept record counts instead. Allocation failure aborts
//! the process outright (`Vec` semantics), so it has no variant either.

use std::fmt;

/// Errors arising from grid planning, command parsing, or the fabric.
#[derive(Debug)]
pub enum CommError {
    /// The factored processor grid does not multiply to the world size.
    BadGrid {
        /// Number of ranks the grid had to cover.
        nprocs: usize,
        /// The grid that was produced.
        grid: [usize; 3],
    },

    /// A 2D simulation was given a grid with more than one rank in z.
    DimensionMismatch {
        /// Rank count in z.
        pz: usize,
    },

    /// Unknown token or missing argument in the `communicate` command.
    InvalidCommand(String),

    /// Negative user ghost cutoff.
    InvalidCutoff(f64),

    /// Border group is unknown or is not the store's first group.
    InvalidGroup(String),

    /// The message layer failed (wraps the backend's message).
    Fabric(String),
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadGrid { nprocs, grid } => write!(
                f,
                "Bad grid of processors: {}x{}x{} != {nprocs} ranks",
                grid[0], grid[1], grid[2]
            ),
            Self::DimensionMismatch { pz } => write!(
                f,
                "Processor count in z must be 1 for 2d simulation (got {pz})"
            ),
            Self::InvalidCommand(msg) => write!(f, "Illegal communicate command: {msg}"),
            Self::InvalidCutoff(value) => {
                write!(f, "Invalid cutoff in communicate command: {value}")
            }
            Self::InvalidGroup(name) => {
                write!(f, "Communicate group '{name}' is not the first group")
            }
            Self::Fabric(msg) => write!(f, "Message fabric failure: {msg}"),
        }
    }
}

impl std::error::Error for CommError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_bad_grid() {
        let err = CommError::BadGrid {
            nprocs: 6,
            grid: [2, 2, 2],
        };
        assert_eq!(err.to_string(), "Bad grid of processors: 2x2x2 != 6 ranks");
    }

    #[test]
    fn display_dimension_mismatch() {
        let err = CommError::DimensionMismatch { pz: 2 };
        assert!(err.to_string().contains("must be 1 for 2d"));
    }

    #[test]
    fn display_invalid_command() {
        let err = CommError::InvalidCommand("bogus".into());
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn display_invalid_cutoff_keeps_value() {
        let err = CommError::InvalidCutoff(-1.5);
        assert!(err.to_string().contains("-1.5"));
    }

    #[test]
    fn error_trait_works() {
        let err = CommError::Fabric("peer hung up".into());
        let dyn_err: &dyn std::error::Error = &err;
        assert!(dyn_err.to_string().contains("peer hung up"));
    }
}
