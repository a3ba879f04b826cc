// SPDX-License-Identifier: AGPL-3.0-only

//! Communication style settings and the `communicate` command parser.
//!
//! The command mirrors the input-script surface of the host engine:
//!
//! ```text
//! communicate single|multi [group <name>] [cutoff <value>] [vel yes|no]
//! ```
//!
//! `single` uses one slab width per swap from the largest cutoff; `multi`
//! keeps a per-species band so short-ranged species ship fewer ghosts.

use serde::{Deserialize, Serialize};

use crate::error::CommError;

/// Ghost-cutoff style: one uniform slab width or one band per species.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommStyle {
    /// Uniform slab width from the largest neighbor cutoff.
    Single,
    /// Per-species slab bands from per-species cutoffs.
    Multi,
}

/// Settings consumed by [`crate::comm::Comm`] when building swap plans.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct CommSettings {
    /// Slab-selection style.
    pub style: CommStyle,
    /// User-requested minimum ghost cutoff; the plan uses
    /// `max(neighbor cutoff, cutoff_user)`.
    pub cutoff_user: f64,
    /// Ship velocities with ghost updates (disables the position-only
    /// fast path).
    pub ghost_velocity: bool,
    /// Restrict first-hop border scans to the store's first group.
    pub border_group: Option<String>,
}

impl Default for CommSettings {
    fn default() -> Self {
        Self {
            style: CommStyle::Single,
            cutoff_user: 0.0,
            ghost_velocity: false,
            border_group: None,
        }
    }
}

impl CommSettings {
    /// Parse the token list of a `communicate` command.
    ///
    /// # Errors
    ///
    /// [`CommError::InvalidCommand`] on an unknown token or a missing
    /// argument; [`CommError::InvalidCutoff`] on a negative cutoff.
    /// Group-name validity is checked later against the particle store,
    /// which owns the group registry.
    pub fn parse(args: &[&str]) -> Result<Self, CommError> {
        let mut settings = Self::default();

        let style = args
            .first()
            .ok_or_else(|| CommError::InvalidCommand("missing style".into()))?;
        settings.style = match *style {
            "single" => CommStyle::Single,
            "multi" => CommStyle::Multi,
            other => return Err(CommError::InvalidCommand(format!("unknown style '{other}'"))),
        };

        let mut iarg = 1;
        while iarg < args.len() {
            match args[iarg] {
                "group" => {
                    let name = Self::value_of(args, iarg, "group")?;
                    settings.border_group = Some(name.to_string());
                    iarg += 2;
                }
                "cutoff" => {
                    let raw = Self::value_of(args, iarg, "cutoff")?;
                    let cut: f64 = raw.parse().map_err(|_| {
                        CommError::InvalidCommand(format!("cutoff '{raw}' is not a number"))
                    })?;
                    if cut < 0.0 {
                        return Err(CommError::InvalidCutoff(cut));
                    }
                    settings.cutoff_user = cut;
                    iarg += 2;
                }
                "vel" => {
                    settings.ghost_velocity = match Self::value_of(args, iarg, "vel")? {
                        "yes" => true,
                        "no" => false,
                        other => {
                            return Err(CommError::InvalidCommand(format!(
                                "vel expects yes|no, got '{other}'"
                            )))
                        }
                    };
                    iarg += 2;
                }
                other => {
                    return Err(CommError::InvalidCommand(format!("unknown token '{other}'")))
                }
            }
        }

        Ok(settings)
    }

    fn value_of<'a>(args: &[&'a str], iarg: usize, token: &str) -> Result<&'a str, CommError> {
        args.get(iarg + 1)
            .copied()
            .ok_or_else(|| CommError::InvalidCommand(format!("{token} needs an argument")))
    }
}
