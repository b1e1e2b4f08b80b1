// src/census/mod.rs

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::table::Table;

// Aggregate tables the microsynthesis draws on:
// LC4402EW - Accommodation type by type of central heating in household by tenure
// LC4404EW - Tenure by household size by number of rooms
// LC4405EW - Tenure by household size by number of bedrooms
// LC4408EW - Tenure by number of persons per bedroom in household
// LC1105EW - Residence type by sex by age
// KS401EW  - Dwellings, household spaces and accommodation type
// QS420EW  - Communal establishment management and type - Establishments
// QS421EW  - Communal establishment management and type - People
pub const LC4402: &str = "LC4402EW";
pub const LC4404: &str = "LC4404EW";
pub const LC4405: &str = "LC4405EW";
pub const LC4408: &str = "LC4408EW";
pub const LC1105: &str = "LC1105EW";
pub const KS401: &str = "KS401EW";
pub const QS420: &str = "QS420EW";
pub const QS421: &str = "QS421EW";

// Category columns, named as the census API names them.
pub const C_TENHUK11: &str = "C_TENHUK11";
pub const C_SIZHUK11: &str = "C_SIZHUK11";
pub const C_ROOMS: &str = "C_ROOMS";
pub const C_BEDROOMS: &str = "C_BEDROOMS";
pub const C_PPBROOMHEW11: &str = "C_PPBROOMHEW11";
pub const C_TYPACCOM: &str = "C_TYPACCOM";
pub const C_CENHEATHUK11: &str = "C_CENHEATHUK11";
pub const C_RESIDENCE_TYPE: &str = "C_RESIDENCE_TYPE";

/// KS401EW cell counting household spaces with at least one usual resident.
pub const KS401_OCCUPIED_CELL: i64 = 5;
/// LC1105EW residence-type code for people in households.
pub const RESIDENCE_HOUSEHOLD: i64 = 1;
/// LC1105EW residence-type code for people in communal establishments.
pub const RESIDENCE_COMMUNAL: i64 = 2;

/// Census geography granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Local authority.
    LA,
    /// Middle layer super output area.
    MSOA,
    /// Lower layer super output area.
    LSOA,
    /// Output area.
    OA,
}

impl FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LA" => Ok(Resolution::LA),
            "MSOA" => Ok(Resolution::MSOA),
            "LSOA" => Ok(Resolution::LSOA),
            "OA" => Ok(Resolution::OA),
            other => bail!("unknown resolution '{}' (expected LA, MSOA, LSOA or OA)", other),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Resolution::LA => "LA",
            Resolution::MSOA => "MSOA",
            Resolution::LSOA => "LSOA",
            Resolution::OA => "OA",
        };
        f.write_str(code)
    }
}

/// Where loaded census tables come from.
///
/// The production implementation reads the cache directory the external
/// retrieval client maintains; tests substitute in-memory fixtures.
pub trait TableSource {
    fn load(&self, table: &str, region: &str, resolution: Resolution) -> Result<Table>;
}

/// Reads pre-fetched tables from a cache directory as
/// `<TABLE>_<region-slug>_<RESOLUTION>.csv`.
pub struct CacheSource {
    cache_dir: PathBuf,
}

impl CacheSource {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    fn path_for(&self, table: &str, region: &str, resolution: Resolution) -> PathBuf {
        self.cache_dir
            .join(format!("{}_{}_{}.csv", table, region_slug(region), resolution))
    }
}

impl TableSource for CacheSource {
    fn load(&self, table: &str, region: &str, resolution: Resolution) -> Result<Table> {
        let path = self.path_for(table, region, resolution);
        debug!(table, path = %path.display(), "loading from cache");
        Table::from_csv(table, &path).with_context(|| {
            format!(
                "table {} for region '{}' at {} resolution not in cache (expected {})",
                table,
                region,
                resolution,
                path.display()
            )
        })
    }
}

/// Collapse runs of non-alphanumeric characters to `_` so region lists like
/// "Leeds, Bradford" address a single cache file.
pub fn region_slug(region: &str) -> String {
    let mut slug = String::with_capacity(region.len());
    let mut gap = false;
    for c in region.chars() {
        if c.is_ascii_alphanumeric() {
            if gap && !slug.is_empty() {
                slug.push('_');
            }
            gap = false;
            slug.push(c);
        } else {
            gap = true;
        }
    }
    slug
}

/// Shared test fixtures: an in-memory [`TableSource`] seeded with a small,
/// fully consistent two-area census extract.
///
/// Hand-checkable totals: 10 occupied dwellings, 11 household spaces,
/// 2 communal establishments with 18 residents, population 42, size-weighted
/// occupancy lower bound 14.
#[cfg(test)]
pub mod tests_support {
    use std::collections::HashMap;
    use std::sync::Arc;

    use anyhow::{Context, Result};
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;

    use super::*;
    use crate::table::{Table, CELL, GEOGRAPHY_CODE, OBS_VALUE};

    pub const AREA_1: &str = "E00000001";
    pub const AREA_2: &str = "E00000002";

    pub struct FixtureSource {
        tables: HashMap<String, Table>,
    }

    impl FixtureSource {
        /// Replace (or add) one table, keeping the rest of the fixture.
        pub fn replace(&mut self, table: Table) {
            self.tables.insert(table.name.clone(), table);
        }
    }

    impl TableSource for FixtureSource {
        fn load(&self, table: &str, _region: &str, _resolution: Resolution) -> Result<Table> {
            self.tables
                .get(table)
                .cloned()
                .with_context(|| format!("no fixture table {}", table))
        }
    }

    pub fn str_col(name: &str, values: &[&str]) -> (Field, ArrayRef) {
        (
            Field::new(name, DataType::Utf8, false),
            Arc::new(StringArray::from(values.to_vec())) as ArrayRef,
        )
    }

    pub fn int_col(name: &str, values: &[i64]) -> (Field, ArrayRef) {
        (
            Field::new(name, DataType::Int64, false),
            Arc::new(Int64Array::from(values.to_vec())) as ArrayRef,
        )
    }

    pub fn table(name: &str, cols: Vec<(Field, ArrayRef)>) -> Table {
        let (fields, arrays): (Vec<Field>, Vec<ArrayRef>) = cols.into_iter().unzip();
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).unwrap();
        Table::new(name, batch)
    }

    pub fn fixture_source() -> FixtureSource {
        let mut source = FixtureSource {
            tables: HashMap::new(),
        };

        source.replace(table(
            LC4402,
            vec![
                str_col(GEOGRAPHY_CODE, &[AREA_1, AREA_1, AREA_2, AREA_2]),
                int_col(C_TENHUK11, &[1, 2, 1, 2]),
                int_col(C_TYPACCOM, &[1, 2, 1, 3]),
                int_col(C_CENHEATHUK11, &[1, 0, 1, 1]),
                int_col(OBS_VALUE, &[5, 1, 2, 2]),
            ],
        ));
        source.replace(table(
            LC4404,
            vec![
                str_col(GEOGRAPHY_CODE, &[AREA_1, AREA_1, AREA_1, AREA_2, AREA_2]),
                int_col(C_TENHUK11, &[1, 1, 2, 1, 2]),
                int_col(C_SIZHUK11, &[1, 2, 1, 1, 2]),
                int_col(C_ROOMS, &[2, 3, 1, 2, 4]),
                int_col(OBS_VALUE, &[3, 2, 1, 2, 2]),
            ],
        ));
        source.replace(table(
            LC4405,
            vec![
                str_col(GEOGRAPHY_CODE, &[AREA_1, AREA_1, AREA_1, AREA_2, AREA_2]),
                int_col(C_TENHUK11, &[1, 1, 2, 1, 2]),
                int_col(C_SIZHUK11, &[1, 2, 1, 1, 2]),
                int_col(C_BEDROOMS, &[1, 2, 1, 1, 2]),
                int_col(OBS_VALUE, &[3, 2, 1, 2, 2]),
            ],
        ));
        source.replace(table(
            LC4408,
            vec![
                str_col(GEOGRAPHY_CODE, &[AREA_1, AREA_1, AREA_2, AREA_2]),
                int_col(C_TENHUK11, &[1, 2, 1, 2]),
                int_col(C_PPBROOMHEW11, &[1, 2, 1, 2]),
                int_col(OBS_VALUE, &[5, 1, 2, 2]),
            ],
        ));
        source.replace(table(
            LC1105,
            vec![
                str_col(GEOGRAPHY_CODE, &[AREA_1, AREA_1, AREA_2, AREA_2]),
                int_col(C_RESIDENCE_TYPE, &[1, 2, 1, 2]),
                int_col(OBS_VALUE, &[16, 10, 8, 8]),
            ],
        ));
        source.replace(table(
            KS401,
            vec![
                str_col(GEOGRAPHY_CODE, &[AREA_1, AREA_1, AREA_2, AREA_2]),
                int_col(CELL, &[5, 6, 5, 6]),
                int_col(OBS_VALUE, &[6, 1, 4, 0]),
            ],
        ));
        source.replace(table(
            QS420,
            vec![
                str_col(GEOGRAPHY_CODE, &[AREA_1, AREA_2]),
                int_col(CELL, &[2, 2]),
                int_col(OBS_VALUE, &[1, 1]),
            ],
        ));
        source.replace(table(
            QS421,
            vec![
                str_col(GEOGRAPHY_CODE, &[AREA_1, AREA_2]),
                int_col(CELL, &[2, 2]),
                int_col(OBS_VALUE, &[10, 8]),
            ],
        ));

        source
    }
}
