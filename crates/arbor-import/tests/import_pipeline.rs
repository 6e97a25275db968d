use std::fs;
use std::path::Path;

use arbor_core::codes::Origin;
use arbor_core::{DEFAULT_RECORDER, OBSERVATION_INDICATORS, SENTINEL_NEIGHBORHOOD_ID};
use arbor_import::reconcile::{locality_comment, neighborhood_comment};
use arbor_import::{ImportConfig, ImportError, ImportPipeline};
use arbor_sources::SourceSet;
use arbor_storage::{CatalogStore, CatalogTable, CatalogTx, MemoryCatalog};
use tempfile::tempdir;

const ANCHOR: &str = "Ibagué";

fn square(west: f64, south: f64, east: f64, north: f64) -> String {
    format!(
        r#"{{"type":"Polygon","coordinates":[[[{west},{south}],[{east},{south}],[{east},{north}],[{west},{north}],[{west},{south}]]]}}"#
    )
}

fn default_localities() -> String {
    format!(
        r#"{{"localities":[{{"id":1,"name":"Comuna 1","calculated_area_m2":2.4e8,"population_2019":18500,"boundary":{}}}]}}"#,
        square(-75.30, 4.40, -75.10, 4.50)
    )
}

fn observation_header() -> String {
    let mut columns = vec![
        "record_code",
        "reproductive_condition",
        "phytosanitary_status",
        "physical_condition",
        "foliage_density",
        "aesthetic_value",
        "growth_phase",
        "field_notes",
        "general_state",
    ];
    columns.extend(OBSERVATION_INDICATORS);
    columns.extend(["photo_url", "accompanying_collectors", "date_event"]);
    columns.join(",")
}

fn observation_row(record: i64, state: &str, photo: &str) -> String {
    let mut cells = vec![
        record.to_string(),
        "Floración".to_string(),
        "Sano".to_string(),
        "Bueno".to_string(),
        "Denso".to_string(),
        "Deseable".to_string(),
        "F3".to_string(),
        "sin novedad".to_string(),
        state.to_string(),
    ];
    cells.extend(OBSERVATION_INDICATORS.iter().map(|_| String::new()));
    cells[9] = "1".to_string();
    cells.extend([photo.to_string(), String::new(), "2022-03-04".to_string()]);
    cells.join(",")
}

/// A small but complete dataset under `<dir>/json` and `<dir>/csv`.
fn write_dataset(dir: &Path, localities: &str) {
    fs::create_dir_all(dir.join("json")).expect("json dir");
    fs::create_dir_all(dir.join("csv")).expect("csv dir");

    fs::write(dir.join("json/localities.json"), localities).expect("localities");
    fs::write(
        dir.join("json/hoods.json"),
        format!(
            r#"{{"hoods":[{{"id":10,"name":"Center","locality_id":1,"calculated_area_m2":1.1e7,"boundary":{}}}]}}"#,
            square(-75.25, 4.42, -75.20, 4.46)
        ),
    )
    .expect("hoods");

    fs::write(
        dir.join("csv/sites.csv"),
        "id,name,zone,subzone,locality_id\n1,Parque Centenario,1,2,1\n",
    )
    .expect("sites");
    fs::write(
        dir.join("csv/taxonomy.csv"),
        "taxonomy_id,family,genus,specie,accept_scientific_name,origin,iucn_category,lifeForm,canopy_shape_code,flower_color_code,gbif_id,identified_by,date_of_identification\n\
         1,Bignoniaceae,Tabebuia,Tabebuia rosea,Tabebuia rosea (Bertol.) DC.,Nativa,Preocupación menor,Árbol,GL,PI,https://www.gbif.org/species/3172236,J. Pérez,2021-05-01\n\
         2,Bignoniaceae,Handroanthus,Handroanthus chrysanthus,,Exótica,,Árbol,NI,YE,0,,\n",
    )
    .expect("taxonomy");
    fs::write(
        dir.join("csv/traits.csv"),
        "pft_id,taxonomy_id,carbon_sequestration_min,carbon_sequestration_max,shade_index_min,shade_index_max,canopy_diameter_min,canopy_diameter_max,height_max_min,height_max_max\n\
         1,1,10,20,0.2,0.6,4,8,10,25\n\
         1,2,99,199,0.9,1.0,9,9,9,9\n\
         1,77,1,2,0.1,0.2,1,2,1,2\n",
    )
    .expect("traits");
    fs::write(
        dir.join("csv/biodiversity.csv"),
        "code_record,common_name,longitude,latitude,elevation_m,registered_by,date_event,site_id,species_id,hood_id\n\
         100,Ocobo,-75.23,4.43,1210,Ana,2022-03-04,1,1,10\n\
         101,Ocobo,-75.22,4.44,1215,Ana,04/03/2022,1,1,\n\
         102,Guayacán,-75.28,4.48,1190,Ana,2022-03-05,1,2,\n\
         103,Guayacán,,,,Ana,,1,2,\n",
    )
    .expect("biodiversity");
    fs::write(
        dir.join("csv/measurements.csv"),
        "record_code,measurement_name,measurement_value,measurement_unit,measurement_method,measurement_date_event\n\
         100,DAP,35.5,cm,Cinta diamétrica,2022-03-04\n\
         101,Altura total,not measured,m,Estimación óptica,2022-03-04\n",
    )
    .expect("measurements");
    fs::write(
        dir.join("csv/observations.csv"),
        format!(
            "{}\n{}\n{}\n",
            observation_header(),
            observation_row(100, "Si", "0"),
            observation_row(102, "No", "https://example.org/102.jpg"),
        ),
    )
    .expect("observations");
    fs::write(
        dir.join("csv/climate.csv"),
        "stationcode,stationname,datetime,latitude,longitude,sensordescription,measureunit,value\n\
         26125060,Aeropuerto Perales,2023-01-01 06:00:00,4.42,-75.15,Temperatura,°C,21.4\n\
         26125060,Aeropuerto Perales,,4.42,-75.15,Temperatura,°C,22.0\n",
    )
    .expect("climate");
}

fn config() -> ImportConfig {
    ImportConfig {
        anchor_municipality: ANCHOR.to_string(),
        batch_size: 2,
        ..ImportConfig::default()
    }
}

#[tokio::test]
async fn imports_a_complete_dataset() {
    let dir = tempdir().expect("tempdir");
    write_dataset(dir.path(), &default_localities());
    let store = MemoryCatalog::with_municipality(ANCHOR);

    let summary = ImportPipeline::new(&store, config())
        .expect("pipeline")
        .run(&SourceSet::local(dir.path()))
        .await
        .expect("import");

    let count = |table: CatalogTable| summary.counts.get(&table).copied().unwrap_or(0);
    assert_eq!(count(CatalogTable::Locality), 2);
    // Center, the sentinel and the placeholder for Comuna 1
    assert_eq!(count(CatalogTable::Neighborhood), 3);
    assert_eq!(count(CatalogTable::Family), 1);
    assert_eq!(count(CatalogTable::Genus), 2);
    assert_eq!(count(CatalogTable::Species), 2);
    assert_eq!(count(CatalogTable::Trait), 4);
    assert_eq!(count(CatalogTable::FunctionalGroup), 1);
    assert_eq!(count(CatalogTable::TraitValue), 4);
    assert_eq!(count(CatalogTable::BiodiversityRecord), 4);
    assert_eq!(count(CatalogTable::Measurement), 2);
    assert_eq!(count(CatalogTable::Observation), 2);
    assert_eq!(count(CatalogTable::Station), 1);
    assert_eq!(count(CatalogTable::Climate), 1);

    assert_eq!(summary.inline_matches.neighborhood, 1);
    assert_eq!(summary.inline_matches.locality, 1);
    assert_eq!(summary.inline_matches.placeholders_created, 1);
    assert_eq!(summary.inline_matches.unmatched, 1);
    assert!(summary.integrity.orphans.iter().all(|orphan| orphan.count == 0));
    // record 103 sits in the sentinel neighborhood while its site is in Comuna 1
    assert_eq!(summary.integrity.locality_mismatches, 1);
    assert!(summary
        .warnings
        .iter()
        .any(|warning| warning.column == "measurement_value" && warning.value == "not measured"));

    store.read(|state| {
        let placeholder = state
            .neighborhoods
            .values()
            .find(|hood| hood.name == "Unknown in Comuna 1")
            .expect("placeholder");
        assert_eq!(placeholder.id, SENTINEL_NEIGHBORHOOD_ID + 1);
        assert_eq!(placeholder.locality_id, 1);
        assert!(placeholder.boundary.is_none());

        let record = |id: i64| state.records.get(&id).expect("record");
        assert_eq!(record(100).neighborhood_id, 10);
        assert_eq!(record(100).system_comment, None);
        assert_eq!(record(101).neighborhood_id, 10);
        assert_eq!(
            record(101).system_comment.as_deref(),
            Some(neighborhood_comment("Center").as_str())
        );
        assert_eq!(record(102).neighborhood_id, placeholder.id);
        assert_eq!(
            record(102).system_comment.as_deref(),
            Some(locality_comment("Unknown in Comuna 1", "Comuna 1").as_str())
        );
        assert_eq!(record(103).neighborhood_id, SENTINEL_NEIGHBORHOOD_ID);
        assert!(record(103).location.is_none());

        let rosea = state.species.get(&1).expect("species 1");
        assert_eq!(rosea.name, "rosea");
        assert_eq!(rosea.origin, Origin::Native);
        assert_eq!(rosea.gbif_id.as_deref(), Some("3172236"));
        let chrysanthus = state.species.get(&2).expect("species 2");
        assert_eq!(chrysanthus.gbif_id, None);
        assert_eq!(rosea.functional_group_id, chrysanthus.functional_group_id);
        assert!(rosea.functional_group_id.is_some());

        let standing: Vec<(i64, bool, &str, &str)> = state
            .observations
            .iter()
            .map(|obs| {
                (
                    obs.biodiversity_record_id,
                    obs.is_standing,
                    obs.photo_url.as_str(),
                    obs.recorded_by.as_str(),
                )
            })
            .collect();
        assert_eq!(
            standing,
            vec![
                (100, true, "", DEFAULT_RECORDER),
                (102, false, "https://example.org/102.jpg", DEFAULT_RECORDER),
            ]
        );
        assert_eq!(state.observations[0].indicators.get("rd").map(String::as_str), Some("1"));
    });
}

#[tokio::test]
async fn missing_files_are_all_reported() {
    let dir = tempdir().expect("tempdir");
    write_dataset(dir.path(), &default_localities());
    fs::remove_file(dir.path().join("csv/sites.csv")).expect("remove sites");
    fs::remove_file(dir.path().join("csv/climate.csv")).expect("remove climate");
    let store = MemoryCatalog::with_municipality(ANCHOR);

    let err = ImportPipeline::new(&store, config())
        .expect("pipeline")
        .run(&SourceSet::local(dir.path()))
        .await
        .expect_err("files are missing");

    match err {
        ImportError::SourceUnavailable { missing } => {
            assert_eq!(missing.len(), 2);
            assert!(missing[0].ends_with("sites.csv"));
            assert!(missing[1].ends_with("climate.csv"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn refuses_to_import_into_populated_tables() {
    let dir = tempdir().expect("tempdir");
    write_dataset(dir.path(), &default_localities());
    let store = MemoryCatalog::with_municipality(ANCHOR);
    let mut tx = store.begin().await.expect("begin");
    tx.upsert_family("Fabaceae").await.expect("family");
    tx.commit().await.expect("commit");

    let err = ImportPipeline::new(&store, config())
        .expect("pipeline")
        .run(&SourceSet::local(dir.path()))
        .await
        .expect_err("family is populated");

    assert_eq!(
        err.to_string(),
        "The following tables are not empty: Family. The import requires empty target tables."
    );
    assert_eq!(store.read(|state| state.families.len()), 1);
}

#[tokio::test]
async fn missing_anchor_municipality_stops_before_reading_sources() {
    let dir = tempdir().expect("tempdir");
    let store = MemoryCatalog::new();

    let err = ImportPipeline::new(&store, config())
        .expect("pipeline")
        .run(&SourceSet::local(dir.path()))
        .await
        .expect_err("no anchor");

    assert_eq!(
        err.to_string(),
        "Municipality 'Ibagué' does not exist. Run the migrations first."
    );
}

#[tokio::test]
async fn schema_problems_are_aggregated() {
    let dir = tempdir().expect("tempdir");
    write_dataset(dir.path(), r#"{"regions":[]}"#);
    fs::write(dir.path().join("csv/sites.csv"), "id,label\n1,Parque\n").expect("sites");
    let store = MemoryCatalog::with_municipality(ANCHOR);

    let err = ImportPipeline::new(&store, config())
        .expect("pipeline")
        .run(&SourceSet::local(dir.path()))
        .await
        .expect_err("bad schema");

    match err {
        ImportError::SchemaMismatch { problems } => {
            assert_eq!(
                problems,
                vec![
                    "localities.json must be a JSON object with a 'localities' key".to_string(),
                    "Missing required columns in sites.csv: name, zone, subzone".to_string(),
                ]
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn sentinel_id_taken_by_another_locality_rolls_back() {
    let dir = tempdir().expect("tempdir");
    let localities = format!(
        r#"{{"localities":[{{"id":1,"name":"Comuna 1","boundary":{}}},{{"id":14,"name":"Rural","boundary":{}}}]}}"#,
        square(-75.30, 4.40, -75.10, 4.50),
        square(-75.50, 4.30, -75.30, 4.40)
    );
    write_dataset(dir.path(), &localities);
    let store = MemoryCatalog::with_municipality(ANCHOR);

    let err = ImportPipeline::new(&store, config())
        .expect("pipeline")
        .run(&SourceSet::local(dir.path()))
        .await
        .expect_err("sentinel conflict");

    assert!(matches!(
        err,
        ImportError::SentinelConflict { entity: "Locality", id: 14, .. }
    ));
    assert_eq!(store.read(|state| state.localities.len()), 0);
}

#[tokio::test]
async fn unreadable_locality_boundary_rolls_back() {
    let dir = tempdir().expect("tempdir");
    let localities = r#"{"localities":[{"id":1,"name":"Comuna 1","boundary":{"type":"Polygon","coordinates":[[[-75.30,4.40],[-75.10,4.50]]]}}]}"#;
    write_dataset(dir.path(), localities);
    let store = MemoryCatalog::with_municipality(ANCHOR);

    let err = ImportPipeline::new(&store, config())
        .expect("pipeline")
        .run(&SourceSet::local(dir.path()))
        .await
        .expect_err("malformed boundary");

    assert!(matches!(
        err,
        ImportError::Geometry { entity: "Locality", id: 1, .. }
    ));
    assert!(err.to_string().starts_with("Locality 1 has an unreadable boundary"));
    assert_eq!(store.read(|state| state.localities.len()), 0);
}

#[tokio::test]
async fn failed_integrity_scan_keeps_the_committed_import() {
    let dir = tempdir().expect("tempdir");
    write_dataset(dir.path(), &default_localities());
    let store = MemoryCatalog::with_municipality(ANCHOR);
    store.break_integrity_scans();

    let summary = ImportPipeline::new(&store, config())
        .expect("pipeline")
        .run(&SourceSet::local(dir.path()))
        .await
        .expect("import survives the scan failure");

    assert_eq!(summary.counts.get(&CatalogTable::BiodiversityRecord), Some(&4));
    assert!(summary.integrity.scan_error.is_some());
    assert!(summary.integrity.orphans.is_empty());
    assert!(!summary.integrity.is_clean());
    assert!(summary.to_string().contains("Not completed"));
    assert_eq!(store.read(|state| state.records.len()), 4);

    // sequences were advanced past the imported ids
    let next_record = store.read(|state| state.sequence_value(CatalogTable::BiodiversityRecord));
    assert_eq!(next_record, 104);
}

#[tokio::test]
async fn records_naming_unknown_species_abort_the_import() {
    let dir = tempdir().expect("tempdir");
    write_dataset(dir.path(), &default_localities());
    fs::write(
        dir.path().join("csv/biodiversity.csv"),
        "code_record,common_name,longitude,latitude,elevation_m,registered_by,date_event,site_id,species_id,hood_id\n\
         100,Ocobo,-75.23,4.43,1210,Ana,2022-03-04,1,42,10\n",
    )
    .expect("biodiversity");
    let store = MemoryCatalog::with_municipality(ANCHOR);

    let err = ImportPipeline::new(&store, config())
        .expect("pipeline")
        .run(&SourceSet::local(dir.path()))
        .await
        .expect_err("unknown species");

    assert_eq!(
        err.to_string(),
        "biodiversity.csv line 2 references Species 42, which was not imported"
    );
    assert_eq!(store.read(|state| state.species.len()), 0);
}

#[tokio::test]
async fn validate_only_leaves_no_trace() {
    let dir = tempdir().expect("tempdir");
    write_dataset(dir.path(), &default_localities());

    let summary = arbor_import::validate_import(config(), &SourceSet::local(dir.path()))
        .await
        .expect("validation run");

    assert_eq!(summary.counts.get(&CatalogTable::BiodiversityRecord), Some(&4));
}
