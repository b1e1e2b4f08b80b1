// src/synth/mod.rs

pub mod expand;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::info;

use crate::census::{self, Resolution, TableSource};
use crate::table::Table;

/// Failures raised by a synthesis backend.
#[derive(Debug, Error)]
pub enum SynthError {
    /// The input aggregates cannot be reconciled into individual records.
    /// Recoverable by fixing the inputs; the run is abandoned without output.
    #[error("{0}")]
    Validation(String),
    /// Anything else the backend failed on.
    #[error("unknown synthesis failure: {0}")]
    Unknown(String),
}

/// Black-box contract for the combinatorial synthesis engine: consume the
/// loaded aggregates, produce one row per dwelling.
pub trait Synthesiser {
    fn synthesise(&self, msynth: &Microsynthesis) -> std::result::Result<Table, SynthError>;
}

/// Loaded census aggregates for one region/resolution, plus the synthesis
/// result once `run` has succeeded.
#[derive(Debug)]
pub struct Microsynthesis {
    pub region: String,
    pub resolution: Resolution,
    /// Accommodation type / central heating / tenure.
    pub lc4402: Table,
    /// Tenure / household size / rooms.
    pub lc4404: Table,
    /// Tenure / household size / bedrooms.
    pub lc4405: Table,
    /// Tenure / persons per bedroom.
    pub lc4408: Table,
    /// Residence type / sex / age.
    pub lc1105: Table,
    /// Dwellings, household spaces and accommodation type.
    pub ks401: Table,
    /// Communal establishments.
    pub communal: Table,
    /// Communal establishment residents.
    pub communal_people: Table,
    /// Synthesized dwellings, one row each. `None` until `run` succeeds.
    pub dwellings: Option<Table>,
}

impl Microsynthesis {
    /// Parse the resolution and load every table through `source`. The
    /// resolution and region strings arrive uninterpreted from the command
    /// line; validating them is this constructor's (and the source's) job.
    pub fn new(region: &str, resolution: &str, source: &dyn TableSource) -> Result<Self> {
        let resolution: Resolution = resolution.parse()?;

        let load = |table: &str| -> Result<Table> {
            source
                .load(table, region, resolution)
                .with_context(|| format!("loading {} for '{}'", table, region))
        };

        let msynth = Self {
            region: region.to_string(),
            resolution,
            lc4402: load(census::LC4402)?,
            lc4404: load(census::LC4404)?,
            lc4405: load(census::LC4405)?,
            lc4408: load(census::LC4408)?,
            lc1105: load(census::LC1105)?,
            ks401: load(census::KS401)?,
            communal: load(census::QS420)?,
            communal_people: load(census::QS421)?,
            dwellings: None,
        };
        info!(region, %resolution, "census aggregates loaded");
        Ok(msynth)
    }

    /// Run the backend and keep its dwellings table.
    pub fn run(&mut self, backend: &dyn Synthesiser) -> std::result::Result<(), SynthError> {
        let dwellings = backend.synthesise(self)?;
        info!(rows = dwellings.num_rows(), "synthesis produced dwellings");
        self.dwellings = Some(dwellings);
        Ok(())
    }
}
