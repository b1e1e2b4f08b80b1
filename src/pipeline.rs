// src/pipeline.rs

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};

use crate::census::TableSource;
use crate::checks::{self, Totals};
use crate::synth::{Microsynthesis, SynthError, Synthesiser};

/// How a run ended without an error.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Synthesis completed and the dwellings table was written.
    Written { rows: usize },
    /// The backend rejected the inputs; nothing was written.
    Abandoned { reason: String },
}

/// The whole run: load, validate, synthesize, reconcile, write.
///
/// Construction failures and invariant violations are errors (no recovery,
/// no output). Backend failures abandon the run but are not errors at this
/// level; the caller learns about them through [`Outcome::Abandoned`].
#[instrument(level = "info", skip(source, backend, output))]
pub fn run(
    region: &str,
    resolution: &str,
    source: &dyn TableSource,
    backend: &dyn Synthesiser,
    output: &Path,
) -> Result<Outcome> {
    let start = Instant::now();
    info!(region, resolution, "microsynthesis starting");

    let mut msynth = Microsynthesis::new(region, resolution, source)?;

    let totals = Totals::compute(&msynth)?;
    totals.log();
    checks::check_invariants(&msynth, &totals)?;

    match msynth.run(backend) {
        Ok(()) => {}
        Err(SynthError::Validation(reason)) => {
            error!(%reason, "synthesis rejected the inputs, run abandoned");
            return Ok(Outcome::Abandoned { reason });
        }
        Err(err @ SynthError::Unknown(_)) => {
            error!(%err, "synthesis failed, run abandoned");
            return Ok(Outcome::Abandoned {
                reason: err.to_string(),
            });
        }
    }
    info!(elapsed = ?start.elapsed(), "synthesis finished");

    if !checks::check_result(&msynth, &totals)? {
        warn!("synthesized totals do not reconcile, writing output regardless");
    }

    let dwellings = msynth
        .dwellings
        .as_ref()
        .context("backend reported success but produced no dwellings table")?;
    info!(path = %output.display(), rows = dwellings.num_rows(), "writing synthetic households");
    dwellings.write_csv(output)?;

    info!("done");
    Ok(Outcome::Written {
        rows: dwellings.num_rows(),
    })
}
