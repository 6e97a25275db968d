//! The bulk import: pre-flight checks, then nine phases in one transaction.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

use arbor_core::mapping::{
    AESTHETIC_VALUE, CANOPY_SHAPE, FLOWER_COLOR, FOLIAGE_DENSITY, GROWTH_PHASE, IUCN_STATUS,
    LIFE_FORM, MEASURED_ATTRIBUTE, MEASUREMENT_METHOD, MEASUREMENT_UNIT, ORIGIN,
    PHYSICAL_CONDITION, PHYTOSANITARY_STATUS, REPRODUCTIVE_CONDITION,
};
use arbor_core::{
    BiodiversityRecord, ClimateReading, Locality, Measurement, Neighborhood, NewStation,
    Observation, Site, Species, TraitKind, TraitValue, DEFAULT_RECORDER, OBSERVATION_INDICATORS,
    SENTINEL_LOCALITY_ID, SENTINEL_NEIGHBORHOOD_ID, SENTINEL_REGION_NAME,
};
use arbor_sources::coerce::{normalize_gbif_id, parse_standing, strip_genus_prefix};
use arbor_sources::{
    read_hoods, read_localities, CsvSource, ParseWarning, SourceKind, SourcePaths, SourceRow,
    SourceSet,
};
use arbor_storage::{CatalogStore, CatalogTable, CatalogTx, HttpFetcher, SourceCache};
use chrono::{DateTime, Utc};
use geo::Point;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ImportConfig;
use crate::context::ImportContext;
use crate::error::ImportError;
use crate::integrity::{self, IntegrityReport};
use crate::reconcile::{locality_comment, neighborhood_comment, MatchCounts, RegionMatch};

/// Explicit post-create hook for biodiversity records, called once per inserted batch.
pub trait RecordHook: Send + Sync {
    fn after_insert(&self, records: &[BiodiversityRecord]) -> Result<(), String>;
}

#[derive(Debug, Default)]
pub struct NoopRecordHook;

impl RecordHook for NoopRecordHook {
    fn after_insert(&self, _records: &[BiodiversityRecord]) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: BTreeMap<CatalogTable, u64>,
    pub inline_matches: MatchCounts,
    pub warnings: Vec<ParseWarning>,
    pub integrity: IntegrityReport,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Import {} complete:", self.run_id)?;
        for table in CatalogTable::IMPORT_TARGETS {
            let count = self.counts.get(&table).copied().unwrap_or(0);
            writeln!(f, "  {table}: {count}")?;
        }
        if self.inline_matches.total() > 0 {
            writeln!(
                f,
                "  Records placed by location: {} by neighborhood, {} by locality ({} placeholders created), {} left in '{}'",
                self.inline_matches.neighborhood,
                self.inline_matches.locality,
                self.inline_matches.placeholders_created,
                self.inline_matches.unmatched,
                SENTINEL_REGION_NAME,
            )?;
        }
        writeln!(f, "  Cells stored as null after parse warnings: {}", self.warnings.len())?;
        write!(f, "{}", self.integrity)
    }
}

pub struct ImportPipeline<'a, S: CatalogStore> {
    store: &'a S,
    config: ImportConfig,
    cache: SourceCache,
    http: HttpFetcher,
    hook: Box<dyn RecordHook>,
}

impl<'a, S: CatalogStore> ImportPipeline<'a, S> {
    pub fn new(store: &'a S, mut config: ImportConfig) -> Result<Self, ImportError> {
        config.batch_size = config.batch_size.max(1);
        config.measurements_chunk_size = config.measurements_chunk_size.max(1);
        config.climate_chunk_size = config.climate_chunk_size.max(1);
        let http = HttpFetcher::new(config.http_client())
            .map_err(|err| ImportError::Configuration(format!("{err:#}")))?;
        Ok(Self {
            store,
            cache: SourceCache::new(config.source_cache_dir.clone()),
            config,
            http,
            hook: Box::<NoopRecordHook>::default(),
        })
    }

    pub fn with_hook(mut self, hook: Box<dyn RecordHook>) -> Self {
        self.hook = hook;
        self
    }

    pub async fn run(&self, sources: &SourceSet) -> Result<ImportSummary, ImportError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("import", %run_id);

        async {
            let (mut ctx, paths) = self.preflight(run_id, sources).await?;

            let mut tx = self.store.begin().await?;
            self.import_localities(&mut tx, &mut ctx, paths.path(SourceKind::Localities))
                .instrument(info_span!("import_phase", phase = "localities"))
                .await?;
            self.import_neighborhoods(&mut tx, &mut ctx, paths.path(SourceKind::Hoods))
                .instrument(info_span!("import_phase", phase = "neighborhoods"))
                .await?;
            self.import_sites(&mut tx, &mut ctx, paths.path(SourceKind::Sites))
                .instrument(info_span!("import_phase", phase = "sites"))
                .await?;
            self.import_taxonomy(&mut tx, &mut ctx, paths.path(SourceKind::Taxonomy))
                .instrument(info_span!("import_phase", phase = "taxonomy"))
                .await?;
            self.import_traits(&mut tx, &mut ctx, paths.path(SourceKind::Traits))
                .instrument(info_span!("import_phase", phase = "functional_groups"))
                .await?;
            self.import_records(&mut tx, &mut ctx, paths.path(SourceKind::Biodiversity))
                .instrument(info_span!("import_phase", phase = "biodiversity"))
                .await?;
            self.import_measurements(&mut tx, &mut ctx, paths.path(SourceKind::Measurements))
                .instrument(info_span!("import_phase", phase = "measurements"))
                .await?;
            self.import_observations(&mut tx, &mut ctx, paths.path(SourceKind::Observations))
                .instrument(info_span!("import_phase", phase = "observations"))
                .await?;
            self.import_climate(&mut tx, &mut ctx, paths.path(SourceKind::Climate))
                .instrument(info_span!("import_phase", phase = "climate"))
                .await?;
            tx.commit().await?;
            info!("import transaction committed");

            integrity::reset_sequences(self.store).await?;
            let integrity = match integrity::check_store(self.store).await {
                Ok(report) => report,
                Err(err) => {
                    warn!(error = %err, "integrity scan failed; the import stays committed");
                    IntegrityReport::failed(&err)
                }
            };

            Ok::<_, ImportError>(ImportSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                counts: ctx.counts,
                inline_matches: ctx.inline_matches,
                warnings: ctx.warnings,
                integrity,
            })
        }
        .instrument(span)
        .await
    }

    /// Every check aggregates all of its violations before failing.
    async fn preflight(
        &self,
        run_id: Uuid,
        sources: &SourceSet,
    ) -> Result<(ImportContext, SourcePaths), ImportError> {
        let mut tx = self.store.begin().await?;
        let municipality = tx
            .find_municipality(&self.config.anchor_municipality)
            .await?
            .ok_or_else(|| ImportError::missing_anchor(&self.config.anchor_municipality))?;

        let missing = sources.unavailable(&self.http, run_id).await;
        if !missing.is_empty() {
            return Err(ImportError::SourceUnavailable { missing });
        }

        let mut non_empty = Vec::new();
        for table in CatalogTable::IMPORT_TARGETS {
            if tx.count_rows(table).await? > 0 {
                non_empty.push(table.label().to_string());
            }
        }
        if !non_empty.is_empty() {
            return Err(ImportError::NonEmptyTarget { tables: non_empty });
        }
        drop(tx);
        info!("all target tables are empty");

        let paths = sources.materialize(&self.cache, &self.http, run_id).await?;
        let problems = paths.contract_problems()?;
        if !problems.is_empty() {
            return Err(ImportError::SchemaMismatch { problems });
        }

        Ok((ImportContext::new(run_id, municipality), paths))
    }

    async fn import_localities<T: CatalogTx>(
        &self,
        tx: &mut T,
        ctx: &mut ImportContext,
        path: &Path,
    ) -> Result<(), ImportError> {
        let entries = read_localities(path)?;
        let mut rows = Vec::with_capacity(entries.len());
        for entry in &entries {
            let boundary = entry.boundary().map_err(|err| ImportError::Geometry {
                entity: "Locality",
                id: entry.id,
                reason: err.to_string(),
            })?;
            rows.push(Locality {
                id: entry.id,
                name: entry.name.trim().to_string(),
                municipality_id: ctx.municipality.id,
                boundary,
                calculated_area_m2: entry.calculated_area_m2,
                population_2019: entry.population(),
            });
        }
        for batch in rows.chunks(self.config.batch_size) {
            let inserted = tx.insert_localities(batch).await?;
            ctx.add_count(CatalogTable::Locality, inserted);
        }

        let sentinel = match tx.find_locality(SENTINEL_LOCALITY_ID).await? {
            Some(existing) if existing.name == SENTINEL_REGION_NAME => existing,
            Some(existing) => {
                return Err(ImportError::SentinelConflict {
                    entity: "Locality",
                    id: SENTINEL_LOCALITY_ID,
                    found: existing.name,
                })
            }
            None => {
                let sentinel = Locality::sentinel(ctx.municipality.id);
                tx.insert_localities(std::slice::from_ref(&sentinel)).await?;
                ctx.add_count(CatalogTable::Locality, 1);
                sentinel
            }
        };

        ctx.localities = rows.into_iter().map(|row| (row.id, row)).collect();
        ctx.localities.insert(sentinel.id, sentinel);
        info!(count = ctx.localities.len(), "imported localities");
        Ok(())
    }

    async fn import_neighborhoods<T: CatalogTx>(
        &self,
        tx: &mut T,
        ctx: &mut ImportContext,
        path: &Path,
    ) -> Result<(), ImportError> {
        let entries = read_hoods(path)?;
        let mut rows = Vec::with_capacity(entries.len());
        for entry in &entries {
            if !ctx.localities.contains_key(&entry.locality_id) {
                return Err(ImportError::UnresolvedReference {
                    entity: "Locality",
                    id: entry.locality_id,
                    referenced_by: format!("Neighborhood {}", entry.id),
                });
            }
            let boundary = entry.boundary().map_err(|err| ImportError::Geometry {
                entity: "Neighborhood",
                id: entry.id,
                reason: err.to_string(),
            })?;
            rows.push(Neighborhood {
                id: entry.id,
                name: entry.name.trim().to_string(),
                locality_id: entry.locality_id,
                boundary,
                calculated_area_m2: entry.calculated_area_m2,
            });
        }
        for batch in rows.chunks(self.config.batch_size) {
            let inserted = tx.insert_neighborhoods(batch).await?;
            ctx.add_count(CatalogTable::Neighborhood, inserted);
        }

        let sentinel = match tx.find_neighborhood(SENTINEL_NEIGHBORHOOD_ID).await? {
            Some(existing)
                if existing.name == SENTINEL_REGION_NAME
                    && existing.locality_id == SENTINEL_LOCALITY_ID =>
            {
                existing
            }
            Some(existing) => {
                return Err(ImportError::SentinelConflict {
                    entity: "Neighborhood",
                    id: SENTINEL_NEIGHBORHOOD_ID,
                    found: existing.name,
                })
            }
            None => {
                let sentinel = Neighborhood::sentinel();
                tx.insert_neighborhoods(std::slice::from_ref(&sentinel))
                    .await?;
                ctx.add_count(CatalogTable::Neighborhood, 1);
                sentinel
            }
        };

        // placeholders created while importing records take ids from the sequence
        tx.reset_sequence(CatalogTable::Neighborhood).await?;

        ctx.neighborhoods = rows.into_iter().map(|row| (row.id, row)).collect();
        ctx.neighborhoods.insert(sentinel.id, sentinel);
        info!(count = ctx.neighborhoods.len(), "imported neighborhoods");
        Ok(())
    }

    async fn import_sites<T: CatalogTx>(
        &self,
        tx: &mut T,
        ctx: &mut ImportContext,
        path: &Path,
    ) -> Result<(), ImportError> {
        let mut source = CsvSource::open(SourceKind::Sites, path)?;
        loop {
            let chunk = source.next_chunk(self.config.batch_size)?;
            if chunk.is_empty() {
                break;
            }
            let mut batch = Vec::with_capacity(chunk.len());
            for row in chunk.iter() {
                let locality_id = row.optional_i64("locality_id", &mut ctx.warnings);
                if let Some(locality_id) = locality_id {
                    if !ctx.localities.contains_key(&locality_id) {
                        return Err(unresolved("Locality", locality_id, &row));
                    }
                }
                batch.push(Site {
                    id: row.required_i64("id")?,
                    name: row.required_text("name")?.to_string(),
                    locality_id,
                    zone: small_int(&row, "zone", &mut ctx.warnings),
                    subzone: small_int(&row, "subzone", &mut ctx.warnings),
                });
            }
            let inserted = tx.insert_sites(&batch).await?;
            ctx.sites.extend(batch.iter().map(|site| site.id));
            ctx.add_count(CatalogTable::Site, inserted);
        }
        info!(count = ctx.sites.len(), "imported sites");
        Ok(())
    }

    async fn import_taxonomy<T: CatalogTx>(
        &self,
        tx: &mut T,
        ctx: &mut ImportContext,
        path: &Path,
    ) -> Result<(), ImportError> {
        let mut source = CsvSource::open(SourceKind::Taxonomy, path)?;
        loop {
            let chunk = source.next_chunk(self.config.batch_size)?;
            if chunk.is_empty() {
                break;
            }
            let mut batch = Vec::with_capacity(chunk.len());
            for row in chunk.iter() {
                let family = row.required_text("family")?;
                let family_id = match ctx.families.get(family) {
                    Some(id) => *id,
                    None => {
                        let id = tx.upsert_family(family).await?;
                        ctx.families.insert(family.to_string(), id);
                        id
                    }
                };
                let genus = row.required_text("genus")?;
                let genus_id = match ctx.genera.get(genus) {
                    Some(id) => *id,
                    None => {
                        let id = tx.upsert_genus(genus, family_id).await?;
                        ctx.genera.insert(genus.to_string(), id);
                        id
                    }
                };

                batch.push(Species {
                    id: row.required_i64("taxonomy_id")?,
                    genus_id,
                    name: strip_genus_prefix(row.required_text("specie")?, genus),
                    accepted_scientific_name: row
                        .text("accept_scientific_name")
                        .map(str::to_string),
                    origin: ORIGIN.normalize(row.text("origin")),
                    iucn_status: IUCN_STATUS.normalize(row.text("iucn_category")),
                    life_form: LIFE_FORM.normalize(row.text("lifeForm")),
                    canopy_shape: CANOPY_SHAPE.normalize(row.text("canopy_shape_code")),
                    flower_color: FLOWER_COLOR.normalize(row.text("flower_color_code")),
                    gbif_id: normalize_gbif_id(row.raw("gbif_id")),
                    identified_by: row.text("identified_by").map(str::to_string),
                    identified_on: row.optional_date("date_of_identification", &mut ctx.warnings),
                    functional_group_id: None,
                });
            }
            let inserted = tx.insert_species(&batch).await?;
            ctx.species.extend(batch.iter().map(|species| species.id));
            ctx.add_count(CatalogTable::Species, inserted);
            info!(rows = source.rows_read(), "taxonomy progress");
        }
        ctx.add_count(CatalogTable::Family, ctx.families.len() as u64);
        ctx.add_count(CatalogTable::Genus, ctx.genera.len() as u64);
        info!(
            families = ctx.families.len(),
            genera = ctx.genera.len(),
            species = ctx.species.len(),
            "imported taxonomy"
        );
        Ok(())
    }

    /// One functional group per distinct `pft_id`. Trait ranges come from the first row of
    /// each group; every row links its species to the group.
    async fn import_traits<T: CatalogTx>(
        &self,
        tx: &mut T,
        ctx: &mut ImportContext,
        path: &Path,
    ) -> Result<(), ImportError> {
        let mut trait_ids = Vec::with_capacity(TraitKind::ALL.len());
        for &kind in TraitKind::ALL {
            trait_ids.push((kind, tx.upsert_trait(kind).await?));
        }
        ctx.add_count(CatalogTable::Trait, trait_ids.len() as u64);

        let mut values = Vec::new();
        let mut assignments = HashMap::new();
        let mut unknown_species = 0u64;
        let mut source = CsvSource::open(SourceKind::Traits, path)?;
        loop {
            let chunk = source.next_chunk(self.config.batch_size)?;
            if chunk.is_empty() {
                break;
            }
            for row in chunk.iter() {
                let pft_id = row.required_i64("pft_id")?;
                let group_id = match ctx.functional_groups.get(&pft_id) {
                    Some(id) => *id,
                    None => {
                        let id = tx.upsert_functional_group(pft_id).await?;
                        ctx.functional_groups.insert(pft_id, id);
                        for (kind, trait_id) in &trait_ids {
                            let prefix = kind.source_prefix();
                            let min = row.optional_f64(&format!("{prefix}_min"), &mut ctx.warnings);
                            let max = row.optional_f64(&format!("{prefix}_max"), &mut ctx.warnings);
                            match (min, max) {
                                (Some(min_value), Some(max_value)) => values.push(TraitValue {
                                    trait_id: *trait_id,
                                    functional_group_id: id,
                                    min_value,
                                    max_value,
                                }),
                                _ => warn!(pft_id, line = row.line(), trait_kind = %kind, "trait range incomplete; skipped"),
                            }
                        }
                        id
                    }
                };

                match row.optional_i64("taxonomy_id", &mut ctx.warnings) {
                    Some(species_id) if ctx.species.contains(&species_id) => {
                        assignments.insert(species_id, group_id);
                    }
                    Some(species_id) => {
                        unknown_species += 1;
                        warn!(species_id, pft_id, line = row.line(), "functional group row names an unknown species");
                    }
                    None => {}
                }
            }
        }

        for batch in values.chunks(self.config.batch_size) {
            let inserted = tx.insert_trait_values(batch).await?;
            ctx.add_count(CatalogTable::TraitValue, inserted);
        }
        let mut pairs: Vec<(i64, i64)> = assignments.into_iter().collect();
        pairs.sort_unstable();
        let mut linked = 0;
        for batch in pairs.chunks(self.config.batch_size) {
            linked += tx.assign_functional_groups(batch).await?;
        }
        ctx.add_count(CatalogTable::FunctionalGroup, ctx.functional_groups.len() as u64);
        info!(
            groups = ctx.functional_groups.len(),
            trait_values = values.len(),
            species_linked = linked,
            unknown_species,
            "imported functional groups"
        );
        Ok(())
    }

    async fn import_records<T: CatalogTx>(
        &self,
        tx: &mut T,
        ctx: &mut ImportContext,
        path: &Path,
    ) -> Result<(), ImportError> {
        let mut source = CsvSource::open(SourceKind::Biodiversity, path)?;
        let mut imported = 0u64;
        loop {
            let chunk = source.next_chunk(self.config.batch_size)?;
            if chunk.is_empty() {
                break;
            }
            let mut batch = Vec::with_capacity(chunk.len());
            for row in chunk.iter() {
                let id = row.required_i64("code_record")?;
                let species_id = row.required_i64("species_id")?;
                if !ctx.species.contains(&species_id) {
                    return Err(unresolved("Species", species_id, &row));
                }
                let site_id = row.required_i64("site_id")?;
                if !ctx.sites.contains(&site_id) {
                    return Err(unresolved("Site", site_id, &row));
                }

                let longitude = row.optional_f64("longitude", &mut ctx.warnings);
                let latitude = row.optional_f64("latitude", &mut ctx.warnings);
                let location = longitude.zip(latitude).map(|(x, y)| Point::new(x, y));

                let (neighborhood_id, system_comment) =
                    match row.optional_i64("hood_id", &mut ctx.warnings) {
                        Some(hood) if ctx.neighborhoods.contains_key(&hood) => (hood, None),
                        _ => place_by_location(tx, ctx, location).await?,
                    };

                batch.push(BiodiversityRecord {
                    id,
                    common_name: row.text("common_name").map(str::to_string),
                    species_id,
                    site_id,
                    neighborhood_id,
                    location,
                    elevation_m: row.optional_f64("elevation_m", &mut ctx.warnings),
                    recorded_by: row.text("registered_by").map(str::to_string),
                    observed_on: row.optional_date("date_event", &mut ctx.warnings),
                    system_comment,
                });
            }
            let inserted = tx.insert_records(&batch).await?;
            self.hook.after_insert(&batch).map_err(ImportError::Hook)?;
            imported += inserted;
            ctx.add_count(CatalogTable::BiodiversityRecord, inserted);
            info!(rows = imported, "biodiversity progress");
        }
        info!(count = imported, "imported biodiversity records");
        Ok(())
    }

    async fn import_measurements<T: CatalogTx>(
        &self,
        tx: &mut T,
        ctx: &mut ImportContext,
        path: &Path,
    ) -> Result<(), ImportError> {
        let mut source = CsvSource::open(SourceKind::Measurements, path)?;
        let mut imported = 0u64;
        loop {
            let chunk = source.next_chunk(self.config.measurements_chunk_size)?;
            if chunk.is_empty() {
                break;
            }
            let mut batch = Vec::with_capacity(chunk.len());
            for row in chunk.iter() {
                batch.push(Measurement {
                    biodiversity_record_id: row.required_i64("record_code")?,
                    attribute: MEASURED_ATTRIBUTE.normalize(row.text("measurement_name")),
                    value: row.optional_f64("measurement_value", &mut ctx.warnings),
                    unit: MEASUREMENT_UNIT.normalize(row.text("measurement_unit")),
                    method: MEASUREMENT_METHOD.normalize(row.text("measurement_method")),
                    measured_on: row.optional_date("measurement_date_event", &mut ctx.warnings),
                });
            }
            let inserted = tx.insert_measurements(&batch).await?;
            imported += inserted;
            ctx.add_count(CatalogTable::Measurement, inserted);
            info!(rows = imported, "measurement progress");
        }
        info!(count = imported, "imported measurements");
        Ok(())
    }

    async fn import_observations<T: CatalogTx>(
        &self,
        tx: &mut T,
        ctx: &mut ImportContext,
        path: &Path,
    ) -> Result<(), ImportError> {
        let mut source = CsvSource::open(SourceKind::Observations, path)?;
        let mut imported = 0u64;
        loop {
            let chunk = source.next_chunk(self.config.batch_size)?;
            if chunk.is_empty() {
                break;
            }
            let mut batch = Vec::with_capacity(chunk.len());
            for row in chunk.iter() {
                let indicators = OBSERVATION_INDICATORS
                    .iter()
                    .filter_map(|name| row.text(name).map(|value| (*name, value.to_string())))
                    .collect();
                let photo_url = match row.text("photo_url") {
                    None | Some("0") => String::new(),
                    Some(url) => url.to_string(),
                };
                let observed_on = match row.text("observation_date_event") {
                    Some(_) => row.optional_date("observation_date_event", &mut ctx.warnings),
                    None => row.optional_date("date_event", &mut ctx.warnings),
                };

                batch.push(Observation {
                    biodiversity_record_id: row.required_i64("record_code")?,
                    reproductive_condition: REPRODUCTIVE_CONDITION
                        .normalize(row.text("reproductive_condition")),
                    phytosanitary_status: PHYTOSANITARY_STATUS
                        .normalize(row.text("phytosanitary_status")),
                    physical_condition: PHYSICAL_CONDITION.normalize(row.text("physical_condition")),
                    foliage_density: FOLIAGE_DENSITY.normalize(row.text("foliage_density")),
                    aesthetic_value: AESTHETIC_VALUE.normalize(row.text("aesthetic_value")),
                    growth_phase: GROWTH_PHASE.normalize(row.text("growth_phase")),
                    is_standing: parse_standing(row.raw("general_state")),
                    field_notes: row.text("field_notes").map(str::to_string),
                    indicators,
                    photo_url,
                    recorded_by: DEFAULT_RECORDER.to_string(),
                    accompanying_collectors: row.text("accompanying_collectors").map(str::to_string),
                    observed_on,
                });
            }
            let inserted = tx.insert_observations(&batch).await?;
            imported += inserted;
            ctx.add_count(CatalogTable::Observation, inserted);
            info!(rows = imported, "observation progress");
        }
        info!(count = imported, "imported observations");
        Ok(())
    }

    /// Two passes: distinct stations first, then the readings that reference them.
    async fn import_climate<T: CatalogTx>(
        &self,
        tx: &mut T,
        ctx: &mut ImportContext,
        path: &Path,
    ) -> Result<(), ImportError> {
        let chunk_size = self.config.climate_chunk_size;

        let mut stations: Vec<NewStation> = Vec::new();
        let mut seen = HashSet::new();
        let mut source = CsvSource::open(SourceKind::Climate, path)?;
        loop {
            let chunk = source.next_chunk(chunk_size)?;
            if chunk.is_empty() {
                break;
            }
            for row in chunk.iter() {
                let code = row.required_i64("stationcode")?;
                if !seen.insert(code) {
                    continue;
                }
                let longitude = row.optional_f64("longitude", &mut ctx.warnings);
                let latitude = row.optional_f64("latitude", &mut ctx.warnings);
                stations.push(NewStation {
                    code,
                    name: row.text("stationname").unwrap_or_default().to_string(),
                    location: longitude.zip(latitude).map(|(x, y)| Point::new(x, y)),
                });
            }
        }
        for batch in stations.chunks(self.config.batch_size) {
            let created = tx.insert_stations(batch).await?;
            ctx.add_count(CatalogTable::Station, created.len() as u64);
            ctx.stations
                .extend(created.into_iter().map(|station| (station.code, station.id)));
        }
        info!(count = ctx.stations.len(), "imported stations");

        let mut imported = 0u64;
        let mut skipped = 0u64;
        let mut source = CsvSource::open(SourceKind::Climate, path)?;
        loop {
            let chunk = source.next_chunk(chunk_size)?;
            if chunk.is_empty() {
                break;
            }
            let mut batch = Vec::with_capacity(chunk.len());
            for row in chunk.iter() {
                let code = row.required_i64("stationcode")?;
                let station_id = *ctx
                    .stations
                    .get(&code)
                    .ok_or_else(|| unresolved("Station", code, &row))?;
                let Some(observed_at) = row.optional_timestamp("datetime", &mut ctx.warnings)
                else {
                    skipped += 1;
                    continue;
                };
                batch.push(ClimateReading {
                    station_id,
                    municipality_id: ctx.municipality.id,
                    observed_at,
                    sensor: row.text("sensordescription").unwrap_or_default().to_string(),
                    value: row.optional_f64("value", &mut ctx.warnings),
                    unit: row.text("measureunit").unwrap_or_default().to_string(),
                });
            }
            let inserted = tx.insert_climate(&batch).await?;
            imported += inserted;
            ctx.add_count(CatalogTable::Climate, inserted);
            info!(rows = imported, "climate progress");
        }
        if skipped > 0 {
            warn!(skipped, "climate rows without a timestamp were not imported");
        }
        info!(count = imported, "imported climate readings");
        Ok(())
    }
}

fn unresolved(entity: &'static str, id: i64, row: &SourceRow<'_>) -> ImportError {
    ImportError::UnresolvedReference {
        entity,
        id,
        referenced_by: format!("{} line {}", row.kind().file_name(), row.line()),
    }
}

fn small_int(row: &SourceRow<'_>, column: &str, warnings: &mut Vec<ParseWarning>) -> Option<i32> {
    row.optional_i64(column, warnings)
        .and_then(|value| i32::try_from(value).ok())
}

enum Placement {
    Neighborhood(i64, String),
    Locality(i64, String),
    Unmatched,
}

/// Neighborhood for a record whose `hood_id` is missing or unknown: the containing
/// neighborhood, else the containing locality's placeholder, else the sentinel.
async fn place_by_location<T: CatalogTx>(
    tx: &mut T,
    ctx: &mut ImportContext,
    location: Option<Point<f64>>,
) -> Result<(i64, Option<String>), ImportError> {
    let Some(point) = location else {
        ctx.inline_matches.unmatched += 1;
        return Ok((SENTINEL_NEIGHBORHOOD_ID, None));
    };

    let placement = match ctx.matcher().locate(&point) {
        RegionMatch::Neighborhood(hood) => Placement::Neighborhood(hood.id, hood.name.clone()),
        RegionMatch::Locality(locality) => Placement::Locality(locality.id, locality.name.clone()),
        RegionMatch::Unmatched => Placement::Unmatched,
    };

    match placement {
        Placement::Neighborhood(hood_id, name) => {
            ctx.inline_matches.neighborhood += 1;
            Ok((hood_id, Some(neighborhood_comment(&name))))
        }
        Placement::Locality(locality_id, locality_name) => {
            let placeholder = ctx
                .placeholders
                .resolve(tx, locality_id, &locality_name, true)
                .await?;
            ctx.inline_matches.locality += 1;
            if placeholder.created {
                ctx.inline_matches.placeholders_created += 1;
                ctx.add_count(CatalogTable::Neighborhood, 1);
            }
            Ok((
                placeholder.neighborhood_id,
                Some(locality_comment(&placeholder.name, &locality_name)),
            ))
        }
        Placement::Unmatched => {
            ctx.inline_matches.unmatched += 1;
            Ok((SENTINEL_NEIGHBORHOOD_ID, None))
        }
    }
}
