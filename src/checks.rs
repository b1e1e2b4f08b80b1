// src/checks.rs

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::census::{
    C_SIZHUK11, KS401_OCCUPIED_CELL, RESIDENCE_COMMUNAL, RESIDENCE_HOUSEHOLD,
};
use crate::synth::expand::{COMMUNAL_TYPE, NOT_COMMUNAL, OCCUPANTS};
use crate::synth::Microsynthesis;
use crate::table::{CELL, GEOGRAPHY_CODE, OBS_VALUE};

/// Diagnostic totals over the loaded aggregates. A pure function of the
/// input tables, computed once before synthesis and reused afterwards to
/// reconcile the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub occupied_dwellings: i64,
    pub population: i64,
    pub households: i64,
    pub communal: i64,
    pub dwellings: i64,
    pub occupied_population_lower_bound: i64,
    pub household_population: i64,
    pub communal_population: i64,
    pub areas: usize,
}

impl Totals {
    pub fn compute(m: &Microsynthesis) -> Result<Self> {
        let occupied_dwellings = m.lc4402.sum(OBS_VALUE)?;
        let households = m.ks401.sum(OBS_VALUE)?;
        let communal = m.communal.sum(OBS_VALUE)?;
        Ok(Self {
            occupied_dwellings,
            population: m.lc1105.sum(OBS_VALUE)?,
            households,
            communal,
            dwellings: households + communal,
            occupied_population_lower_bound: m.lc4404.weighted_sum(C_SIZHUK11, OBS_VALUE)?,
            household_population: m
                .lc1105
                .sum_where(crate::census::C_RESIDENCE_TYPE, RESIDENCE_HOUSEHOLD, OBS_VALUE)?,
            communal_population: m
                .lc1105
                .sum_where(crate::census::C_RESIDENCE_TYPE, RESIDENCE_COMMUNAL, OBS_VALUE)?,
            areas: m.lc4402.distinct(GEOGRAPHY_CODE)?.len(),
        })
    }

    pub fn log(&self) {
        info!(total = self.households, "household spaces");
        info!(total = self.occupied_dwellings, "occupied households");
        info!(
            total = self.households - self.occupied_dwellings,
            "unoccupied dwellings"
        );
        info!(total = self.communal, "communal residences");
        info!(total = self.dwellings, "dwellings");
        info!(total = self.population, "usual residents");
        info!(total = self.household_population, "population in households");
        info!(
            total = self.communal_population,
            "population in communal residences"
        );
        info!(
            total = self.occupied_population_lower_bound,
            "population lower bound from household sizes"
        );
        info!(
            total = self.household_population - self.occupied_population_lower_bound,
            "household population underestimate"
        );
        info!(total = self.areas, "geographical areas");
    }
}

/// The four equality invariants the aggregates must satisfy before synthesis
/// is worth attempting: every tenure cross-tab, and the occupied cell of the
/// dwellings table, must agree on the occupied-household total.
pub fn check_invariants(m: &Microsynthesis, totals: &Totals) -> Result<()> {
    let expected = totals.occupied_dwellings;
    let checks = [
        ("LC4404EW total", m.lc4404.sum(OBS_VALUE)?),
        ("LC4405EW total", m.lc4405.sum(OBS_VALUE)?),
        ("LC4408EW total", m.lc4408.sum(OBS_VALUE)?),
        (
            "KS401EW occupied cell",
            m.ks401.sum_where(CELL, KS401_OCCUPIED_CELL, OBS_VALUE)?,
        ),
    ];
    for (name, got) in checks {
        if got != expected {
            bail!(
                "invariant violated: {} is {}, occupied households total is {} (difference {:+})",
                name,
                got,
                expected,
                got - expected
            );
        }
    }
    info!(occupied = expected, "aggregate totals consistent");
    Ok(())
}

/// Post-synthesis reconciliation of the dwellings table against the
/// pre-computed totals. Mismatches are reported but never fatal; returns
/// whether everything reconciled.
pub fn check_result(m: &Microsynthesis, totals: &Totals) -> Result<bool> {
    let dwellings = m
        .dwellings
        .as_ref()
        .context("consistency check requested before synthesis")?;

    let (occupants, communal_type) = match (
        dwellings.ints(OCCUPANTS),
        dwellings.ints(COMMUNAL_TYPE),
    ) {
        (Ok(o), Ok(c)) => (o, c),
        _ => {
            warn!("dwellings table lacks reconciliation columns, skipping consistency check");
            return Ok(false);
        }
    };

    let mut household_rows = 0i64;
    let mut occupied_rows = 0i64;
    let mut communal_rows = 0i64;
    for i in 0..dwellings.num_rows() {
        if communal_type.value(i) == NOT_COMMUNAL {
            household_rows += 1;
            if occupants.value(i) > 0 {
                occupied_rows += 1;
            }
        } else {
            communal_rows += 1;
        }
    }

    let expectations = [
        ("occupied households", occupied_rows, totals.occupied_dwellings),
        ("household spaces", household_rows, totals.households),
        ("communal residences", communal_rows, totals.communal),
        (
            "dwellings",
            household_rows + communal_rows,
            totals.dwellings,
        ),
    ];

    let mut consistent = true;
    for (name, got, want) in expectations {
        if got != want {
            warn!(got, want, "synthesized {} do not match the aggregates", name);
            consistent = false;
        }
    }
    if consistent {
        info!("synthesized dwellings reconcile with the aggregates");
    }
    Ok(consistent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::census::tests_support::{fixture_source, int_col, str_col, table, AREA_1};
    use crate::census::{C_ROOMS, C_TENHUK11, LC4404};
    use crate::synth::expand::{AREA, BEDROOMS, BUILD_TYPE, CENTRAL_HEATING, PERSONS_PER_BEDROOM, ROOMS, TENURE};

    fn context() -> Microsynthesis {
        Microsynthesis::new("Testborough", "OA", &fixture_source()).unwrap()
    }

    #[test]
    fn totals_match_hand_summation() -> Result<()> {
        let totals = Totals::compute(&context())?;
        assert_eq!(totals.occupied_dwellings, 10);
        assert_eq!(totals.population, 42);
        assert_eq!(totals.households, 11);
        assert_eq!(totals.communal, 2);
        assert_eq!(totals.dwellings, 13);
        assert_eq!(totals.occupied_population_lower_bound, 14);
        assert_eq!(totals.household_population, 24);
        assert_eq!(totals.communal_population, 18);
        assert_eq!(totals.areas, 2);
        Ok(())
    }

    #[test]
    fn consistent_fixture_passes_invariants() -> Result<()> {
        let msynth = context();
        let totals = Totals::compute(&msynth)?;
        check_invariants(&msynth, &totals)
    }

    #[test]
    fn invariant_failure_names_table_and_delta() -> Result<()> {
        let mut source = fixture_source();
        // one extra household in LC4404EW breaks the shared total
        source.replace(table(
            LC4404,
            vec![
                str_col(crate::table::GEOGRAPHY_CODE, &[AREA_1]),
                int_col(C_TENHUK11, &[1]),
                int_col(crate::census::C_SIZHUK11, &[1]),
                int_col(C_ROOMS, &[2]),
                int_col(OBS_VALUE, &[11]),
            ],
        ));
        let msynth = Microsynthesis::new("Testborough", "OA", &source)?;
        let totals = Totals::compute(&msynth)?;

        let err = check_invariants(&msynth, &totals).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("LC4404EW"), "message was: {}", msg);
        assert!(msg.contains("+1"), "message was: {}", msg);
        Ok(())
    }

    fn dwellings_fixture(occupied: usize, unoccupied: usize, communal: usize) -> crate::table::Table {
        let rows = occupied + unoccupied + communal;
        let mut occupants = vec![2i64; occupied];
        occupants.extend(vec![0i64; unoccupied]);
        occupants.extend(vec![5i64; communal]);
        let mut communal_type = vec![NOT_COMMUNAL; occupied + unoccupied];
        communal_type.extend(vec![2i64; communal]);
        table(
            "dwellings",
            vec![
                str_col(AREA, &vec![AREA_1; rows]),
                int_col(TENURE, &vec![1; rows]),
                int_col(OCCUPANTS, &occupants),
                int_col(ROOMS, &vec![2; rows]),
                int_col(BEDROOMS, &vec![1; rows]),
                int_col(PERSONS_PER_BEDROOM, &vec![1; rows]),
                int_col(CENTRAL_HEATING, &vec![1; rows]),
                int_col(BUILD_TYPE, &vec![1; rows]),
                int_col(COMMUNAL_TYPE, &communal_type),
            ],
        )
    }

    #[test]
    fn reconciliation_accepts_matching_counts() -> Result<()> {
        let mut msynth = context();
        let totals = Totals::compute(&msynth)?;
        msynth.dwellings = Some(dwellings_fixture(10, 1, 2));
        assert!(check_result(&msynth, &totals)?);
        Ok(())
    }

    #[test]
    fn reconciliation_flags_missing_rows() -> Result<()> {
        let mut msynth = context();
        let totals = Totals::compute(&msynth)?;
        msynth.dwellings = Some(dwellings_fixture(9, 1, 2));
        assert!(!check_result(&msynth, &totals)?);
        Ok(())
    }
}
