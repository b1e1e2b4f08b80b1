// src/synth/expand.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use tracing::{debug, info};

use crate::census::{
    C_BEDROOMS, C_CENHEATHUK11, C_PPBROOMHEW11, C_ROOMS, C_SIZHUK11, C_TENHUK11, C_TYPACCOM,
    KS401_OCCUPIED_CELL,
};
use crate::table::{Table, CELL, GEOGRAPHY_CODE, OBS_VALUE};

use super::{Microsynthesis, SynthError, Synthesiser};

// Columns of the synthesized dwellings table.
pub const AREA: &str = "Area";
pub const TENURE: &str = "Tenure";
pub const OCCUPANTS: &str = "Occupants";
pub const ROOMS: &str = "Rooms";
pub const BEDROOMS: &str = "Bedrooms";
pub const PERSONS_PER_BEDROOM: &str = "PersonsPerBedroom";
pub const CENTRAL_HEATING: &str = "CentralHeating";
pub const BUILD_TYPE: &str = "BuildType";
pub const COMMUNAL_TYPE: &str = "CommunalType";

/// `CommunalType` value for ordinary household rows.
pub const NOT_COMMUNAL: i64 = -1;

/// Deterministic expansion of the aggregates into one record per dwelling.
///
/// Not the statistical engine: occupied households are emitted straight from
/// the tenure/size/rooms counts, with the remaining attributes drawn from
/// per-area pools built out of the other cross-tabs. Given aggregates that
/// satisfy the run invariants, every pool drains exactly.
pub struct DirectExpansion;

impl Synthesiser for DirectExpansion {
    fn synthesise(&self, msynth: &Microsynthesis) -> std::result::Result<Table, SynthError> {
        expand(msynth).map_err(|e| match e.downcast::<SynthError>() {
            Ok(synth) => synth,
            Err(other) => SynthError::Unknown(format!("{:#}", other)),
        })
    }
}

/// Counted attribute values, drained one dwelling at a time.
struct Pool<T: Copy> {
    entries: Vec<(T, i64)>,
}

impl<T: Copy> Pool<T> {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn push(&mut self, value: T, count: i64) {
        if count > 0 {
            self.entries.push((value, count));
        }
    }

    fn pop(&mut self) -> Option<T> {
        for entry in self.entries.iter_mut() {
            if entry.1 > 0 {
                entry.1 -= 1;
                return Some(entry.0);
            }
        }
        None
    }
}

/// Pop from the pool under `key`, falling back to any other pool in the map.
/// The fallback keeps per-area totals exact when the cross-tabs disagree on
/// the finer breakdown.
fn pop_keyed<K: Ord, T: Copy>(pools: &mut BTreeMap<K, Pool<T>>, key: &K) -> Option<T> {
    if let Some(pool) = pools.get_mut(key) {
        if let Some(v) = pool.pop() {
            return Some(v);
        }
    }
    pools.values_mut().find_map(Pool::pop)
}

#[derive(Default)]
struct Records {
    area: Vec<String>,
    tenure: Vec<i64>,
    occupants: Vec<i64>,
    rooms: Vec<i64>,
    bedrooms: Vec<i64>,
    persons_per_bedroom: Vec<i64>,
    central_heating: Vec<i64>,
    build_type: Vec<i64>,
    communal_type: Vec<i64>,
}

impl Records {
    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        area: &str,
        tenure: i64,
        occupants: i64,
        rooms: i64,
        bedrooms: i64,
        persons_per_bedroom: i64,
        central_heating: i64,
        build_type: i64,
        communal_type: i64,
    ) {
        self.area.push(area.to_string());
        self.tenure.push(tenure);
        self.occupants.push(occupants);
        self.rooms.push(rooms);
        self.bedrooms.push(bedrooms);
        self.persons_per_bedroom.push(persons_per_bedroom);
        self.central_heating.push(central_heating);
        self.build_type.push(build_type);
        self.communal_type.push(communal_type);
    }

    fn into_table(self) -> Result<Table> {
        let schema = Arc::new(Schema::new(vec![
            Field::new(AREA, DataType::Utf8, false),
            Field::new(TENURE, DataType::Int64, false),
            Field::new(OCCUPANTS, DataType::Int64, false),
            Field::new(ROOMS, DataType::Int64, false),
            Field::new(BEDROOMS, DataType::Int64, false),
            Field::new(PERSONS_PER_BEDROOM, DataType::Int64, false),
            Field::new(CENTRAL_HEATING, DataType::Int64, false),
            Field::new(BUILD_TYPE, DataType::Int64, false),
            Field::new(COMMUNAL_TYPE, DataType::Int64, false),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(self.area)),
            Arc::new(Int64Array::from(self.tenure)),
            Arc::new(Int64Array::from(self.occupants)),
            Arc::new(Int64Array::from(self.rooms)),
            Arc::new(Int64Array::from(self.bedrooms)),
            Arc::new(Int64Array::from(self.persons_per_bedroom)),
            Arc::new(Int64Array::from(self.central_heating)),
            Arc::new(Int64Array::from(self.build_type)),
            Arc::new(Int64Array::from(self.communal_type)),
        ];
        let batch = RecordBatch::try_new(schema, columns)?;
        Ok(Table::new("dwellings", batch))
    }
}

fn validation(msg: String) -> anyhow::Error {
    SynthError::Validation(msg).into()
}

fn expand(m: &Microsynthesis) -> Result<Table> {
    // Areas sorted; occupied, then unoccupied, then communal within an area.
    let mut areas: BTreeSet<String> = BTreeSet::new();
    areas.extend(m.lc4402.distinct(GEOGRAPHY_CODE)?);
    areas.extend(m.ks401.distinct(GEOGRAPHY_CODE)?);
    areas.extend(m.communal.distinct(GEOGRAPHY_CODE)?);

    let mut records = Records::default();

    for area in &areas {
        expand_area(m, area, &mut records)?;
    }

    info!(rows = records.area.len(), areas = areas.len(), "expansion complete");
    records.into_table()
}

fn expand_area(m: &Microsynthesis, area: &str, records: &mut Records) -> Result<()> {
    let lc4402 = m.lc4402.filter_eq_str(GEOGRAPHY_CODE, area)?;
    let lc4404 = m.lc4404.filter_eq_str(GEOGRAPHY_CODE, area)?;
    let lc4405 = m.lc4405.filter_eq_str(GEOGRAPHY_CODE, area)?;
    let lc4408 = m.lc4408.filter_eq_str(GEOGRAPHY_CODE, area)?;
    let ks401 = m.ks401.filter_eq_str(GEOGRAPHY_CODE, area)?;
    let qs420 = m.communal.filter_eq_str(GEOGRAPHY_CODE, area)?;
    let qs421 = m.communal_people.filter_eq_str(GEOGRAPHY_CODE, area)?;

    // Attribute pools for this area's occupied households.
    let mut bedrooms: BTreeMap<(i64, i64), Pool<i64>> = BTreeMap::new();
    {
        let tenure = lc4405.ints(C_TENHUK11)?;
        let size = lc4405.ints(C_SIZHUK11)?;
        let beds = lc4405.ints(C_BEDROOMS)?;
        let obs = lc4405.ints(OBS_VALUE)?;
        for i in 0..lc4405.num_rows() {
            bedrooms
                .entry((tenure.value(i), size.value(i)))
                .or_insert_with(Pool::new)
                .push(beds.value(i), obs.value(i));
        }
    }

    let mut persons_per_bedroom: BTreeMap<i64, Pool<i64>> = BTreeMap::new();
    {
        let tenure = lc4408.ints(C_TENHUK11)?;
        let ppb = lc4408.ints(C_PPBROOMHEW11)?;
        let obs = lc4408.ints(OBS_VALUE)?;
        for i in 0..lc4408.num_rows() {
            persons_per_bedroom
                .entry(tenure.value(i))
                .or_insert_with(Pool::new)
                .push(ppb.value(i), obs.value(i));
        }
    }

    let mut accommodation: BTreeMap<i64, Pool<(i64, i64)>> = BTreeMap::new();
    {
        let tenure = lc4402.ints(C_TENHUK11)?;
        let build = lc4402.ints(C_TYPACCOM)?;
        let heating = lc4402.ints(C_CENHEATHUK11)?;
        let obs = lc4402.ints(OBS_VALUE)?;
        for i in 0..lc4402.num_rows() {
            accommodation
                .entry(tenure.value(i))
                .or_insert_with(Pool::new)
                .push((build.value(i), heating.value(i)), obs.value(i));
        }
    }

    // Occupied households, one record per counted dwelling.
    let tenure = lc4404.ints(C_TENHUK11)?;
    let size = lc4404.ints(C_SIZHUK11)?;
    let rooms = lc4404.ints(C_ROOMS)?;
    let obs = lc4404.ints(OBS_VALUE)?;
    let mut occupied = 0i64;
    for i in 0..lc4404.num_rows() {
        let (t, s, r) = (tenure.value(i), size.value(i), rooms.value(i));
        for _ in 0..obs.value(i) {
            let b = pop_keyed(&mut bedrooms, &(t, s)).ok_or_else(|| {
                validation(format!("bedroom counts cannot cover households in area {}", area))
            })?;
            let p = pop_keyed(&mut persons_per_bedroom, &t).ok_or_else(|| {
                validation(format!(
                    "persons-per-bedroom counts cannot cover households in area {}",
                    area
                ))
            })?;
            let (build, heat) = pop_keyed(&mut accommodation, &t).ok_or_else(|| {
                validation(format!(
                    "accommodation counts cannot cover households in area {}",
                    area
                ))
            })?;
            records.push(area, t, s, r, b, p, heat, build, NOT_COMMUNAL);
            occupied += 1;
        }
    }

    // Unoccupied household spaces: area total minus the occupied cell.
    let spaces = ks401.sum(OBS_VALUE)?;
    let occupied_spaces = ks401.sum_where(CELL, KS401_OCCUPIED_CELL, OBS_VALUE)?;
    let unoccupied = spaces - occupied_spaces;
    if unoccupied < 0 {
        return Err(validation(format!(
            "area {} has {} occupied spaces but only {} household spaces",
            area, occupied_spaces, spaces
        )));
    }
    for _ in 0..unoccupied {
        records.push(area, 0, 0, 0, 0, 0, 0, 0, NOT_COMMUNAL);
    }

    // Communal establishments, occupants split evenly with the remainder
    // going to the first establishments of each type.
    let kind = qs420.ints(CELL)?;
    let count = qs420.ints(OBS_VALUE)?;
    for i in 0..qs420.num_rows() {
        let (k, n) = (kind.value(i), count.value(i));
        if n <= 0 {
            continue;
        }
        let people = qs421.sum_where(CELL, k, OBS_VALUE)?;
        for j in 0..n {
            let occupants = people / n + i64::from(j < people % n);
            records.push(area, 0, occupants, 0, 0, 0, 0, 0, k);
        }
    }

    debug!(area, occupied, unoccupied, "area expanded");
    Ok(())
}
