//! PostgreSQL + PostGIS catalog.
//!
//! Geometry crosses the wire as GeoJSON text; containment itself is evaluated in Rust,
//! so the database only narrows candidates by bounding box.

use arbor_core::geojson::{boundary_from_geojson_str, boundary_to_geojson};
use arbor_core::spatial::RegionShape;
use arbor_core::{
    BiodiversityRecord, Boundary, ClimateReading, Coded, Locality, Measurement, Municipality,
    Neighborhood, NewNeighborhood, NewStation, Observation, Site, Species, Station, TraitKind,
    TraitValue, OBSERVATION_INDICATORS,
};
use async_trait::async_trait;
use geo::{Point, Rect};
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::debug;

use crate::{
    CatalogStore, CatalogTable, CatalogTx, ForeignKey, RecordAssignment, RecordLocation,
    RecordSelection, StoreError,
};

/// Rows per multi-VALUES observation insert, well under the bind-parameter limit.
const OBSERVATION_INSERT_ROWS: usize = 1000;

#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgCatalog {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        Ok(PgTx {
            tx: self.pool.begin().await?,
        })
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

/// Maps constraint violations onto the store error vocabulary.
fn classify(table: CatalogTable, err: sqlx::Error) -> StoreError {
    let Some(db) = err.as_database_error() else {
        return StoreError::Database(err);
    };
    let detail = db.message().to_string();
    match db.kind() {
        ErrorKind::UniqueViolation => StoreError::Conflict {
            table: table.table_name(),
            key: detail,
        },
        ErrorKind::ForeignKeyViolation => StoreError::MissingParent {
            table: table.table_name(),
            detail,
        },
        ErrorKind::CheckViolation => StoreError::Check {
            table: table.table_name(),
            constraint: db.constraint().unwrap_or("unnamed").to_string(),
            detail,
        },
        _ => StoreError::Database(err),
    }
}

fn read_boundary(
    table: CatalogTable,
    id: i64,
    geojson: Option<String>,
) -> Result<Option<Boundary>, StoreError> {
    geojson
        .map(|text| {
            boundary_from_geojson_str(&text).map_err(|err| StoreError::Geometry {
                table: table.table_name(),
                id,
                reason: err.to_string(),
            })
        })
        .transpose()
}

fn split_points(points: impl Iterator<Item = Option<Point<f64>>>) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    points.map(|p| (p.map(|p| p.x()), p.map(|p| p.y()))).unzip()
}

fn locality_from_row(row: &PgRow) -> Result<Locality, StoreError> {
    let id: i64 = row.try_get("id")?;
    Ok(Locality {
        id,
        name: row.try_get("name")?,
        municipality_id: row.try_get("municipality_id")?,
        boundary: read_boundary(CatalogTable::Locality, id, row.try_get("boundary")?)?,
        calculated_area_m2: row.try_get("calculated_area_m2")?,
        population_2019: row.try_get("population_2019")?,
    })
}

fn neighborhood_from_row(row: &PgRow) -> Result<Neighborhood, StoreError> {
    let id: i64 = row.try_get("id")?;
    Ok(Neighborhood {
        id,
        name: row.try_get("name")?,
        locality_id: row.try_get("locality_id")?,
        boundary: read_boundary(CatalogTable::Neighborhood, id, row.try_get("boundary")?)?,
        calculated_area_m2: row.try_get("calculated_area_m2")?,
    })
}

const NEIGHBORHOOD_COLUMNS: &str =
    "id, name, locality_id, ST_AsGeoJSON(boundary) AS boundary, calculated_area_m2";

impl PgTx {
    async fn shapes(
        &mut self,
        table: CatalogTable,
        parent_column: &str,
        extent: Option<Rect<f64>>,
    ) -> Result<Vec<RegionShape>, StoreError> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT id, name, {parent_column} AS parent_id, ST_AsGeoJSON(boundary) AS boundary FROM {} WHERE boundary IS NOT NULL",
            table.table_name()
        ));
        if let Some(extent) = extent {
            query.push(" AND ST_Intersects(boundary, ST_MakeEnvelope(");
            query.push_bind(extent.min().x);
            query.push(", ");
            query.push_bind(extent.min().y);
            query.push(", ");
            query.push_bind(extent.max().x);
            query.push(", ");
            query.push_bind(extent.max().y);
            query.push(", 4326)::geography)");
        }
        query.push(" ORDER BY id");

        let rows = query.build().fetch_all(&mut *self.tx).await?;
        let mut shapes = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let Some(boundary) = read_boundary(table, id, row.try_get("boundary")?)? else {
                continue;
            };
            shapes.push(RegionShape {
                id,
                name: row.try_get("name")?,
                parent_id: row.try_get("parent_id")?,
                boundary,
            });
        }
        debug!(table = table.table_name(), count = shapes.len(), "loaded candidate boundaries");
        Ok(shapes)
    }

    async fn upsert_by_name(
        &mut self,
        table: CatalogTable,
        key_column: &str,
        key: &str,
        extra: Option<(&str, i64)>,
    ) -> Result<i64, StoreError> {
        let t = table.table_name();
        let sql = match extra {
            Some((column, _)) => format!(
                "WITH ins AS (INSERT INTO {t} ({key_column}, {column}) VALUES ($1, $2) ON CONFLICT ({key_column}) DO NOTHING RETURNING id) \
                 SELECT id FROM ins UNION ALL SELECT id FROM {t} WHERE {key_column} = $1 LIMIT 1"
            ),
            None => format!(
                "WITH ins AS (INSERT INTO {t} ({key_column}) VALUES ($1) ON CONFLICT ({key_column}) DO NOTHING RETURNING id) \
                 SELECT id FROM ins UNION ALL SELECT id FROM {t} WHERE {key_column} = $1 LIMIT 1"
            ),
        };
        let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(key);
        if let Some((_, value)) = extra {
            query = query.bind(value);
        }
        query
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|err| classify(table, err))
    }
}

#[async_trait]
impl CatalogTx for PgTx {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn find_municipality(&mut self, name: &str) -> Result<Option<Municipality>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM municipalities WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(|row| -> Result<Municipality, StoreError> {
            Ok(Municipality {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
            })
        })
        .transpose()
    }

    async fn count_rows(&mut self, table: CatalogTable) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.table_name());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *self.tx).await?;
        Ok(count as u64)
    }

    async fn insert_localities(&mut self, rows: &[Locality]) -> Result<u64, StoreError> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        let municipalities: Vec<i64> = rows.iter().map(|r| r.municipality_id).collect();
        let boundaries: Vec<Option<String>> =
            rows.iter().map(|r| r.boundary.as_ref().map(boundary_to_geojson)).collect();
        let areas: Vec<Option<f64>> = rows.iter().map(|r| r.calculated_area_m2).collect();
        let populations: Vec<Option<i64>> = rows.iter().map(|r| r.population_2019).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO localities (id, name, municipality_id, boundary, calculated_area_m2, population_2019)
            SELECT t.id, t.name, t.municipality_id,
                   ST_SetSRID(ST_GeomFromGeoJSON(t.boundary), 4326)::geography,
                   t.area, t.population
            FROM UNNEST($1::bigint[], $2::text[], $3::bigint[], $4::text[], $5::float8[], $6::bigint[])
                AS t(id, name, municipality_id, boundary, area, population)
            "#,
        )
        .bind(&ids)
        .bind(&names)
        .bind(&municipalities)
        .bind(&boundaries)
        .bind(&areas)
        .bind(&populations)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| classify(CatalogTable::Locality, err))?;
        Ok(result.rows_affected())
    }

    async fn find_locality(&mut self, id: i64) -> Result<Option<Locality>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, municipality_id, ST_AsGeoJSON(boundary) AS boundary, calculated_area_m2, population_2019 \
             FROM localities WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(locality_from_row).transpose()
    }

    async fn insert_neighborhoods(&mut self, rows: &[Neighborhood]) -> Result<u64, StoreError> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        let localities: Vec<i64> = rows.iter().map(|r| r.locality_id).collect();
        let boundaries: Vec<Option<String>> =
            rows.iter().map(|r| r.boundary.as_ref().map(boundary_to_geojson)).collect();
        let areas: Vec<Option<f64>> = rows.iter().map(|r| r.calculated_area_m2).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO neighborhoods (id, name, locality_id, boundary, calculated_area_m2)
            SELECT t.id, t.name, t.locality_id,
                   ST_SetSRID(ST_GeomFromGeoJSON(t.boundary), 4326)::geography,
                   t.area
            FROM UNNEST($1::bigint[], $2::text[], $3::bigint[], $4::text[], $5::float8[])
                AS t(id, name, locality_id, boundary, area)
            "#,
        )
        .bind(&ids)
        .bind(&names)
        .bind(&localities)
        .bind(&boundaries)
        .bind(&areas)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| classify(CatalogTable::Neighborhood, err))?;
        Ok(result.rows_affected())
    }

    async fn find_neighborhood(&mut self, id: i64) -> Result<Option<Neighborhood>, StoreError> {
        let sql = format!("SELECT {NEIGHBORHOOD_COLUMNS} FROM neighborhoods WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(neighborhood_from_row).transpose()
    }

    async fn find_neighborhood_by_name(
        &mut self,
        locality_id: i64,
        name: &str,
    ) -> Result<Option<Neighborhood>, StoreError> {
        let sql = format!(
            "SELECT {NEIGHBORHOOD_COLUMNS} FROM neighborhoods WHERE locality_id = $1 AND name = $2"
        );
        let row = sqlx::query(&sql)
            .bind(locality_id)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(neighborhood_from_row).transpose()
    }

    async fn create_neighborhood(
        &mut self,
        new: &NewNeighborhood,
    ) -> Result<Neighborhood, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO neighborhoods (name, locality_id) VALUES ($1, $2) RETURNING id",
        )
        .bind(&new.name)
        .bind(new.locality_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|err| classify(CatalogTable::Neighborhood, err))?;
        Ok(Neighborhood {
            id,
            name: new.name.clone(),
            locality_id: new.locality_id,
            boundary: None,
            calculated_area_m2: None,
        })
    }

    async fn insert_sites(&mut self, rows: &[Site]) -> Result<u64, StoreError> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        let localities: Vec<Option<i64>> = rows.iter().map(|r| r.locality_id).collect();
        let zones: Vec<Option<i32>> = rows.iter().map(|r| r.zone).collect();
        let subzones: Vec<Option<i32>> = rows.iter().map(|r| r.subzone).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO sites (id, name, locality_id, zone, subzone)
            SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::bigint[], $4::int4[], $5::int4[])
            "#,
        )
        .bind(&ids)
        .bind(&names)
        .bind(&localities)
        .bind(&zones)
        .bind(&subzones)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| classify(CatalogTable::Site, err))?;
        Ok(result.rows_affected())
    }

    async fn upsert_family(&mut self, name: &str) -> Result<i64, StoreError> {
        self.upsert_by_name(CatalogTable::Family, "name", name, None)
            .await
    }

    async fn upsert_genus(&mut self, name: &str, family_id: i64) -> Result<i64, StoreError> {
        self.upsert_by_name(CatalogTable::Genus, "name", name, Some(("family_id", family_id)))
            .await
    }

    async fn insert_species(&mut self, rows: &[Species]) -> Result<u64, StoreError> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let genera: Vec<i64> = rows.iter().map(|r| r.genus_id).collect();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        let accepted: Vec<Option<&str>> =
            rows.iter().map(|r| r.accepted_scientific_name.as_deref()).collect();
        let origins: Vec<&str> = rows.iter().map(|r| r.origin.code()).collect();
        let iucn: Vec<&str> = rows.iter().map(|r| r.iucn_status.code()).collect();
        let life_forms: Vec<&str> = rows.iter().map(|r| r.life_form.code()).collect();
        let canopies: Vec<&str> = rows.iter().map(|r| r.canopy_shape.code()).collect();
        let flowers: Vec<&str> = rows.iter().map(|r| r.flower_color.code()).collect();
        let gbif: Vec<Option<&str>> = rows.iter().map(|r| r.gbif_id.as_deref()).collect();
        let identified_by: Vec<Option<&str>> =
            rows.iter().map(|r| r.identified_by.as_deref()).collect();
        let identified_on: Vec<Option<chrono::NaiveDate>> =
            rows.iter().map(|r| r.identified_on).collect();
        let groups: Vec<Option<i64>> = rows.iter().map(|r| r.functional_group_id).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO species (id, genus_id, name, accepted_scientific_name, origin, iucn_status,
                                 life_form, canopy_shape, flower_color, gbif_id, identified_by,
                                 identified_on, functional_group_id)
            SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::text[], $4::text[], $5::text[],
                                 $6::text[], $7::text[], $8::text[], $9::text[], $10::text[],
                                 $11::text[], $12::date[], $13::bigint[])
            "#,
        )
        .bind(&ids)
        .bind(&genera)
        .bind(&names)
        .bind(&accepted)
        .bind(&origins)
        .bind(&iucn)
        .bind(&life_forms)
        .bind(&canopies)
        .bind(&flowers)
        .bind(&gbif)
        .bind(&identified_by)
        .bind(&identified_on)
        .bind(&groups)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| classify(CatalogTable::Species, err))?;
        Ok(result.rows_affected())
    }

    async fn upsert_functional_group(&mut self, group_id: i64) -> Result<i64, StoreError> {
        sqlx::query_scalar(
            "WITH ins AS (INSERT INTO functional_groups (group_id) VALUES ($1) ON CONFLICT (group_id) DO NOTHING RETURNING id) \
             SELECT id FROM ins UNION ALL SELECT id FROM functional_groups WHERE group_id = $1 LIMIT 1",
        )
        .bind(group_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|err| classify(CatalogTable::FunctionalGroup, err))
    }

    async fn upsert_trait(&mut self, kind: TraitKind) -> Result<i64, StoreError> {
        self.upsert_by_name(CatalogTable::Trait, "kind", kind.code(), None)
            .await
    }

    async fn insert_trait_values(&mut self, rows: &[TraitValue]) -> Result<u64, StoreError> {
        let traits: Vec<i64> = rows.iter().map(|r| r.trait_id).collect();
        let groups: Vec<i64> = rows.iter().map(|r| r.functional_group_id).collect();
        let mins: Vec<f64> = rows.iter().map(|r| r.min_value).collect();
        let maxs: Vec<f64> = rows.iter().map(|r| r.max_value).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO trait_values (trait_id, functional_group_id, min_value, max_value)
            SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::float8[], $4::float8[])
            "#,
        )
        .bind(&traits)
        .bind(&groups)
        .bind(&mins)
        .bind(&maxs)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| classify(CatalogTable::TraitValue, err))?;
        Ok(result.rows_affected())
    }

    async fn assign_functional_groups(&mut self, pairs: &[(i64, i64)]) -> Result<u64, StoreError> {
        let (species, groups): (Vec<i64>, Vec<i64>) = pairs.iter().copied().unzip();
        let result = sqlx::query(
            r#"
            UPDATE species AS s SET functional_group_id = u.group_id
            FROM UNNEST($1::bigint[], $2::bigint[]) AS u(species_id, group_id)
            WHERE s.id = u.species_id
            "#,
        )
        .bind(&species)
        .bind(&groups)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| classify(CatalogTable::Species, err))?;
        Ok(result.rows_affected())
    }

    async fn insert_records(&mut self, rows: &[BiodiversityRecord]) -> Result<u64, StoreError> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let common: Vec<Option<&str>> = rows.iter().map(|r| r.common_name.as_deref()).collect();
        let species: Vec<i64> = rows.iter().map(|r| r.species_id).collect();
        let sites: Vec<i64> = rows.iter().map(|r| r.site_id).collect();
        let hoods: Vec<i64> = rows.iter().map(|r| r.neighborhood_id).collect();
        let (lons, lats) = split_points(rows.iter().map(|r| r.location));
        let elevations: Vec<Option<f64>> = rows.iter().map(|r| r.elevation_m).collect();
        let recorders: Vec<Option<&str>> = rows.iter().map(|r| r.recorded_by.as_deref()).collect();
        let dates: Vec<Option<chrono::NaiveDate>> = rows.iter().map(|r| r.observed_on).collect();
        let comments: Vec<Option<&str>> = rows.iter().map(|r| r.system_comment.as_deref()).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO biodiversity_records (id, common_name, species_id, site_id, neighborhood_id,
                                              location, elevation_m, recorded_by, observed_on, system_comment)
            SELECT t.id, t.common_name, t.species_id, t.site_id, t.neighborhood_id,
                   CASE WHEN t.lon IS NULL OR t.lat IS NULL THEN NULL
                        ELSE ST_SetSRID(ST_MakePoint(t.lon, t.lat), 4326)::geography END,
                   t.elevation_m, t.recorded_by, t.observed_on, t.system_comment
            FROM UNNEST($1::bigint[], $2::text[], $3::bigint[], $4::bigint[], $5::bigint[],
                        $6::float8[], $7::float8[], $8::float8[], $9::text[], $10::date[], $11::text[])
                AS t(id, common_name, species_id, site_id, neighborhood_id, lon, lat,
                     elevation_m, recorded_by, observed_on, system_comment)
            "#,
        )
        .bind(&ids)
        .bind(&common)
        .bind(&species)
        .bind(&sites)
        .bind(&hoods)
        .bind(&lons)
        .bind(&lats)
        .bind(&elevations)
        .bind(&recorders)
        .bind(&dates)
        .bind(&comments)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| classify(CatalogTable::BiodiversityRecord, err))?;
        Ok(result.rows_affected())
    }

    async fn insert_measurements(&mut self, rows: &[Measurement]) -> Result<u64, StoreError> {
        let records: Vec<i64> = rows.iter().map(|r| r.biodiversity_record_id).collect();
        let attributes: Vec<&str> = rows.iter().map(|r| r.attribute.code()).collect();
        let values: Vec<Option<f64>> = rows.iter().map(|r| r.value).collect();
        let units: Vec<&str> = rows.iter().map(|r| r.unit.code()).collect();
        let methods: Vec<&str> = rows.iter().map(|r| r.method.code()).collect();
        let dates: Vec<Option<chrono::NaiveDate>> = rows.iter().map(|r| r.measured_on).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO measurements (biodiversity_record_id, attribute, value, unit, method, measured_on)
            SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::float8[], $4::text[], $5::text[], $6::date[])
            "#,
        )
        .bind(&records)
        .bind(&attributes)
        .bind(&values)
        .bind(&units)
        .bind(&methods)
        .bind(&dates)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| classify(CatalogTable::Measurement, err))?;
        Ok(result.rows_affected())
    }

    async fn insert_observations(&mut self, rows: &[Observation]) -> Result<u64, StoreError> {
        let mut inserted = 0;
        for chunk in rows.chunks(OBSERVATION_INSERT_ROWS) {
            let mut query = QueryBuilder::<Postgres>::new(
                "INSERT INTO observations (biodiversity_record_id, reproductive_condition, \
                 phytosanitary_status, physical_condition, foliage_density, aesthetic_value, \
                 growth_phase, is_standing, field_notes, photo_url, recorded_by, \
                 accompanying_collectors, observed_on, ",
            );
            query.push(OBSERVATION_INDICATORS.join(", "));
            query.push(") ");
            query.push_values(chunk, |mut b, row| {
                b.push_bind(row.biodiversity_record_id)
                    .push_bind(row.reproductive_condition.code())
                    .push_bind(row.phytosanitary_status.code())
                    .push_bind(row.physical_condition.code())
                    .push_bind(row.foliage_density.code())
                    .push_bind(row.aesthetic_value.code())
                    .push_bind(row.growth_phase.code())
                    .push_bind(row.is_standing)
                    .push_bind(row.field_notes.clone())
                    .push_bind(row.photo_url.clone())
                    .push_bind(row.recorded_by.clone())
                    .push_bind(row.accompanying_collectors.clone())
                    .push_bind(row.observed_on);
                for name in OBSERVATION_INDICATORS {
                    b.push_bind(row.indicators.get(name).cloned());
                }
            });
            let result = query
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(|err| classify(CatalogTable::Observation, err))?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_stations(&mut self, rows: &[NewStation]) -> Result<Vec<Station>, StoreError> {
        let codes: Vec<i64> = rows.iter().map(|r| r.code).collect();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        let (lons, lats) = split_points(rows.iter().map(|r| r.location));

        let created = sqlx::query(
            r#"
            INSERT INTO stations (code, name, location)
            SELECT t.code, t.name,
                   CASE WHEN t.lon IS NULL OR t.lat IS NULL THEN NULL
                        ELSE ST_SetSRID(ST_MakePoint(t.lon, t.lat), 4326)::geography END
            FROM UNNEST($1::bigint[], $2::text[], $3::float8[], $4::float8[]) AS t(code, name, lon, lat)
            RETURNING id, code
            "#,
        )
        .bind(&codes)
        .bind(&names)
        .bind(&lons)
        .bind(&lats)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|err| classify(CatalogTable::Station, err))?;

        let mut stations = Vec::with_capacity(created.len());
        for row in created {
            let id: i64 = row.try_get("id")?;
            let code: i64 = row.try_get("code")?;
            if let Some(source) = rows.iter().find(|r| r.code == code) {
                stations.push(Station {
                    id,
                    code,
                    name: source.name.clone(),
                    location: source.location,
                });
            }
        }
        Ok(stations)
    }

    async fn insert_climate(&mut self, rows: &[ClimateReading]) -> Result<u64, StoreError> {
        let stations: Vec<i64> = rows.iter().map(|r| r.station_id).collect();
        let municipalities: Vec<i64> = rows.iter().map(|r| r.municipality_id).collect();
        let observed: Vec<chrono::NaiveDateTime> = rows.iter().map(|r| r.observed_at).collect();
        let sensors: Vec<&str> = rows.iter().map(|r| r.sensor.as_str()).collect();
        let values: Vec<Option<f64>> = rows.iter().map(|r| r.value).collect();
        let units: Vec<&str> = rows.iter().map(|r| r.unit.as_str()).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO climate_readings (station_id, municipality_id, observed_at, sensor, value, unit)
            SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::timestamp[], $4::text[], $5::float8[], $6::text[])
            "#,
        )
        .bind(&stations)
        .bind(&municipalities)
        .bind(&observed)
        .bind(&sensors)
        .bind(&values)
        .bind(&units)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| classify(CatalogTable::Climate, err))?;
        Ok(result.rows_affected())
    }

    async fn count_orphans(&mut self, link: ForeignKey) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {child} c LEFT JOIN {parent} p ON c.{column} = p.id \
             WHERE c.{column} IS NOT NULL AND p.id IS NULL",
            child = link.child().table_name(),
            parent = link.parent().table_name(),
            column = link.column(),
        );
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *self.tx).await?;
        Ok(count as u64)
    }

    async fn count_locality_mismatches(&mut self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM biodiversity_records r
            JOIN sites s ON s.id = r.site_id
            JOIN neighborhoods n ON n.id = r.neighborhood_id
            WHERE s.locality_id IS NOT NULL AND s.locality_id <> n.locality_id
            "#,
        )
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count as u64)
    }

    async fn reset_sequence(&mut self, table: CatalogTable) -> Result<(), StoreError> {
        let t = table.table_name();
        let sql = format!(
            "SELECT setval(pg_get_serial_sequence('{t}', 'id'), COALESCE(MAX(id), 0) + 1, false) FROM {t}"
        );
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn count_selected(&mut self, selection: RecordSelection) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM biodiversity_records
            WHERE neighborhood_id = $1
              AND location IS NOT NULL
              AND ($2 OR system_comment IS NULL OR system_comment = '')
            "#,
        )
        .bind(selection.neighborhood_id)
        .bind(selection.include_commented)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count as u64)
    }

    async fn select_records(
        &mut self,
        selection: RecordSelection,
    ) -> Result<Vec<RecordLocation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, ST_X(location::geometry) AS lon, ST_Y(location::geometry) AS lat
            FROM biodiversity_records
            WHERE neighborhood_id = $1
              AND location IS NOT NULL
              AND ($2 OR system_comment IS NULL OR system_comment = '')
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(selection.neighborhood_id)
        .bind(selection.include_commented)
        .bind(selection.limit.map(|l| l as i64))
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| -> Result<RecordLocation, StoreError> {
                Ok(RecordLocation {
                    id: row.try_get("id")?,
                    location: Point::new(row.try_get("lon")?, row.try_get("lat")?),
                })
            })
            .collect()
    }

    async fn neighborhood_shapes(
        &mut self,
        extent: Option<Rect<f64>>,
    ) -> Result<Vec<RegionShape>, StoreError> {
        self.shapes(CatalogTable::Neighborhood, "locality_id", extent)
            .await
    }

    async fn locality_shapes(
        &mut self,
        extent: Option<Rect<f64>>,
    ) -> Result<Vec<RegionShape>, StoreError> {
        self.shapes(CatalogTable::Locality, "municipality_id", extent)
            .await
    }

    async fn reassign_records(&mut self, updates: &[RecordAssignment]) -> Result<u64, StoreError> {
        let ids: Vec<i64> = updates.iter().map(|u| u.record_id).collect();
        let hoods: Vec<i64> = updates.iter().map(|u| u.neighborhood_id).collect();
        let comments: Vec<&str> = updates.iter().map(|u| u.system_comment.as_str()).collect();

        let result = sqlx::query(
            r#"
            UPDATE biodiversity_records AS r
            SET neighborhood_id = u.neighborhood_id, system_comment = u.comment
            FROM UNNEST($1::bigint[], $2::bigint[], $3::text[]) AS u(id, neighborhood_id, comment)
            WHERE r.id = u.id
            "#,
        )
        .bind(&ids)
        .bind(&hoods)
        .bind(&comments)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| classify(CatalogTable::BiodiversityRecord, err))?;
        Ok(result.rows_affected())
    }
}
