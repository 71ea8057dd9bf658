// ByteMind - Самообучающаяся байтовая графовая система с циклической саморегуляцией.
// Copyright (C) 2024-2025 Chernov Denys

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Tracing wiring for hosts embedding the core.
//!
//! The core logs at three natural granularities: `warn!` for brain-file
//! oddities (unknown records, partial loads), `debug!` for episode
//! boundaries, minting, and pruning, and `trace!` for every propagation
//! step inside the wave engine — the last one is far too chatty for
//! anything but single-episode debugging. [`Verbosity`] names those
//! tiers so a host does not hand-write filter directives; a `RUST_LOG`
//! value in the environment still overrides the chosen tier.

use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// How much of the core's logging a host wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Brain-file warnings only.
    Quiet,
    /// Episode summaries, minting, pruning.
    Episodes,
    /// Every propagation step. One episode produces hundreds of lines.
    Propagation,
}

impl Verbosity {
    /// The filter directive for this tier, scoped to the core so a
    /// host's own logging is untouched.
    pub fn directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "bytemind_core=warn",
            Verbosity::Episodes => "bytemind_core=debug",
            Verbosity::Propagation => "bytemind_core=trace",
        }
    }
}

/// Install a compact subscriber at the given tier. Returns an error
/// when a global subscriber is already set (a host that brings its own
/// subscriber simply skips this).
pub fn try_init_tracing(verbosity: Verbosity) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .finish()
        .try_init()
}

/// [`try_init_tracing`] for binaries that own the process and want the
/// double-init case to be fatal.
pub fn init_tracing(verbosity: Verbosity) {
    if let Err(e) = try_init_tracing(verbosity) {
        panic!("tracing subscriber already installed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_directives_parse_as_filters() {
        for verbosity in [Verbosity::Quiet, Verbosity::Episodes, Verbosity::Propagation] {
            assert!(
                EnvFilter::try_new(verbosity.directive()).is_ok(),
                "directive {:?} must be a valid filter",
                verbosity.directive()
            );
        }
    }

    #[test]
    fn test_propagation_tier_is_the_chattiest() {
        assert_eq!(Verbosity::Quiet.directive(), "bytemind_core=warn");
        assert_eq!(Verbosity::Propagation.directive(), "bytemind_core=trace");
    }

    #[test]
    fn test_second_init_is_rejected() {
        // Whether or not another test installed a subscriber first,
        // the second of two consecutive installs must fail.
        let _ = try_init_tracing(Verbosity::Quiet);
        assert!(try_init_tracing(Verbosity::Quiet).is_err());
    }
}
