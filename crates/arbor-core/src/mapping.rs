//! Localized label tables that translate free-text source values into coded enumerations.
//!
//! Lookups are exact first, then case-insensitive in table order, then fall back to the
//! table default. Tables are small static slices so a lookup is a short linear scan.

use crate::codes::*;

/// Resolves `raw` against `table`, returning `default` when nothing matches.
pub fn resolve<T: Copy>(raw: Option<&str>, table: &[(&str, T)], default: T) -> T {
    let Some(raw) = raw else {
        return default;
    };

    if let Some((_, value)) = table.iter().find(|(label, _)| *label == raw) {
        return *value;
    }

    let lowered = raw.to_lowercase();
    table
        .iter()
        .find(|(label, _)| label.to_lowercase() == lowered)
        .map(|(_, value)| *value)
        .unwrap_or(default)
}

/// One field's label table together with its miss default.
#[derive(Debug)]
pub struct MappingTable<T: 'static> {
    pub field: &'static str,
    pub entries: &'static [(&'static str, T)],
    pub default: T,
}

impl<T: Coded> MappingTable<T> {
    pub fn resolve(&self, raw: Option<&str>) -> T {
        resolve(raw, self.entries, self.default)
    }

    /// Accepts a canonical code verbatim before consulting the label table.
    pub fn normalize(&self, raw: Option<&str>) -> T {
        match raw.map(str::trim) {
            Some(value) if !value.is_empty() => {
                T::from_code(value).unwrap_or_else(|| self.resolve(Some(value)))
            }
            _ => self.default,
        }
    }
}

pub static ORIGIN: MappingTable<Origin> = MappingTable {
    field: "origin",
    entries: &[
        ("Exótica", Origin::Exotic),
        ("Exotica", Origin::Exotic),
        ("Nativa", Origin::Native),
        ("Cultivada", Origin::Cultivated),
        ("Naturalizada", Origin::Naturalized),
        ("Endémica", Origin::Endemic),
        ("Endemica", Origin::Endemic),
    ],
    default: Origin::NotIdentified,
};

pub static IUCN_STATUS: MappingTable<IucnStatus> = MappingTable {
    field: "iucn_category",
    entries: &[
        ("Datos insuficientes", IucnStatus::DataDeficient),
        ("Preocupación menor", IucnStatus::LeastConcern),
        ("Preocupacion menor", IucnStatus::LeastConcern),
        ("Casi amenazada", IucnStatus::NearThreatened),
        ("Vulnerable", IucnStatus::Vulnerable),
        ("En peligro", IucnStatus::Endangered),
        ("En peligro crítico", IucnStatus::CriticallyEndangered),
        ("En peligro critico", IucnStatus::CriticallyEndangered),
        ("Extinta en estado silvestre", IucnStatus::ExtinctInWild),
        ("Extinta", IucnStatus::Extinct),
        ("No evaluado", IucnStatus::NotEvaluated),
        ("No evaluada", IucnStatus::NotEvaluated),
    ],
    default: IucnStatus::NotEvaluated,
};

pub static LIFE_FORM: MappingTable<LifeForm> = MappingTable {
    field: "lifeForm",
    entries: &[
        ("Árbol", LifeForm::Tree),
        ("Arbol", LifeForm::Tree),
        ("Palmera", LifeForm::Palm),
        ("Arbusto", LifeForm::Shrub),
        ("Otro", LifeForm::Other),
        ("Otra", LifeForm::Other),
    ],
    default: LifeForm::Other,
};

pub static CANOPY_SHAPE: MappingTable<CanopyShape> = MappingTable {
    field: "canopy_shape_code",
    entries: &[],
    default: CanopyShape::NotIdentified,
};

pub static FLOWER_COLOR: MappingTable<FlowerColor> = MappingTable {
    field: "flower_color_code",
    entries: &[],
    default: FlowerColor::NotIdentified,
};

pub static MEASURED_ATTRIBUTE: MappingTable<MeasuredAttribute> = MappingTable {
    field: "measurement_name",
    entries: &[
        ("Altura de fuste", MeasuredAttribute::TrunkHeight),
        ("Altura total", MeasuredAttribute::TotalHeight),
        ("Diámetro de copa", MeasuredAttribute::CrownDiameter),
        ("Diametro de copa", MeasuredAttribute::CrownDiameter),
        ("DAP", MeasuredAttribute::DiameterBreastHeight),
        ("Volumen", MeasuredAttribute::Volume),
        ("Densidad de madera", MeasuredAttribute::WoodDensity),
        ("Otro", MeasuredAttribute::Other),
        ("No reportado", MeasuredAttribute::NotReported),
        ("No reportada", MeasuredAttribute::NotReported),
    ],
    default: MeasuredAttribute::NotReported,
};

pub static MEASUREMENT_UNIT: MappingTable<MeasurementUnit> = MappingTable {
    field: "measurement_unit",
    entries: &[
        ("m", MeasurementUnit::Meters),
        ("metros", MeasurementUnit::Meters),
        ("m3", MeasurementUnit::CubicMeters),
        ("metros cúbicos", MeasurementUnit::CubicMeters),
        ("metros cubicos", MeasurementUnit::CubicMeters),
        ("cm", MeasurementUnit::Centimeters),
        ("centímetros", MeasurementUnit::Centimeters),
        ("centimetros", MeasurementUnit::Centimeters),
        ("mm", MeasurementUnit::Millimeters),
        ("milímetros", MeasurementUnit::Millimeters),
        ("milimetros", MeasurementUnit::Millimeters),
        ("g/cm3", MeasurementUnit::GramsPerCubicCentimeter),
        ("gramos por centímetro cúbico", MeasurementUnit::GramsPerCubicCentimeter),
        ("gramos por centimetro cubico", MeasurementUnit::GramsPerCubicCentimeter),
        ("Otro", MeasurementUnit::Other),
        ("Otra", MeasurementUnit::Other),
        ("No reportado", MeasurementUnit::NotReported),
        ("No reportada", MeasurementUnit::NotReported),
    ],
    default: MeasurementUnit::NotReported,
};

pub static MEASUREMENT_METHOD: MappingTable<MeasurementMethod> = MappingTable {
    field: "measurement_method",
    entries: &[
        ("Estimación óptica", MeasurementMethod::OpticalEstimation),
        ("Estimacion optica", MeasurementMethod::OpticalEstimation),
        ("Cinta diamétrica", MeasurementMethod::DiameterTape),
        ("Cinta diametrica", MeasurementMethod::DiameterTape),
        ("Ecuación de volumen", MeasurementMethod::VolumeEquation),
        ("Ecuacion de volumen", MeasurementMethod::VolumeEquation),
        ("Base de datos de densidad de madera", MeasurementMethod::WoodDensityDatabase),
        ("Otro", MeasurementMethod::Other),
        ("Otra", MeasurementMethod::Other),
        ("No reportado", MeasurementMethod::NotReported),
        ("No reportada", MeasurementMethod::NotReported),
    ],
    default: MeasurementMethod::NotReported,
};

pub static REPRODUCTIVE_CONDITION: MappingTable<ReproductiveCondition> = MappingTable {
    field: "reproductive_condition",
    entries: &[
        ("Floración", ReproductiveCondition::Flowering),
        ("Floracion", ReproductiveCondition::Flowering),
        ("Fructificación", ReproductiveCondition::Fruiting),
        ("Fructificacion", ReproductiveCondition::Fruiting),
        ("Estéril", ReproductiveCondition::Sterile),
        ("Esteril", ReproductiveCondition::Sterile),
        ("No reportado", ReproductiveCondition::NotReported),
        ("No reportada", ReproductiveCondition::NotReported),
    ],
    default: ReproductiveCondition::NotReported,
};

pub static PHYTOSANITARY_STATUS: MappingTable<PhytosanitaryStatus> = MappingTable {
    field: "phytosanitary_status",
    entries: &[
        ("Sano", PhytosanitaryStatus::Healthy),
        ("Enfermo", PhytosanitaryStatus::Sick),
        ("Crítico", PhytosanitaryStatus::Critical),
        ("Critico", PhytosanitaryStatus::Critical),
        ("Muerto", PhytosanitaryStatus::Dead),
        ("No reportado", PhytosanitaryStatus::NotReported),
        ("No reportada", PhytosanitaryStatus::NotReported),
    ],
    default: PhytosanitaryStatus::NotReported,
};

pub static PHYSICAL_CONDITION: MappingTable<PhysicalCondition> = MappingTable {
    field: "physical_condition",
    entries: &[
        ("Bueno", PhysicalCondition::Good),
        ("Buena", PhysicalCondition::Good),
        ("Regular", PhysicalCondition::Fair),
        ("Malo", PhysicalCondition::Poor),
        ("Mala", PhysicalCondition::Poor),
        ("No reportado", PhysicalCondition::NotReported),
        ("No reportada", PhysicalCondition::NotReported),
    ],
    default: PhysicalCondition::NotReported,
};

pub static FOLIAGE_DENSITY: MappingTable<FoliageDensity> = MappingTable {
    field: "foliage_density",
    entries: &[
        ("Denso", FoliageDensity::Dense),
        ("Densa", FoliageDensity::Dense),
        ("Medio", FoliageDensity::Medium),
        ("Media", FoliageDensity::Medium),
        ("Escaso", FoliageDensity::Sparse),
        ("Escasa", FoliageDensity::Sparse),
        ("No reportado", FoliageDensity::NotReported),
        ("No reportada", FoliageDensity::NotReported),
    ],
    default: FoliageDensity::NotReported,
};

pub static AESTHETIC_VALUE: MappingTable<AestheticValue> = MappingTable {
    field: "aesthetic_value",
    entries: &[
        ("Esencial", AestheticValue::Essential),
        ("Emblemático", AestheticValue::Emblematic),
        ("Emblematico", AestheticValue::Emblematic),
        ("Deseable", AestheticValue::Desirable),
        ("Indiferente", AestheticValue::Indifferent),
        ("Inaceptable", AestheticValue::Unacceptable),
        ("No reportado", AestheticValue::NotReported),
        ("No reportada", AestheticValue::NotReported),
    ],
    default: AestheticValue::NotReported,
};

pub static GROWTH_PHASE: MappingTable<GrowthPhase> = MappingTable {
    field: "growth_phase",
    entries: &[
        ("F1", GrowthPhase::Sapling),
        ("F2", GrowthPhase::Juvenile),
        ("F3", GrowthPhase::Adult),
        ("1", GrowthPhase::Sapling),
        ("2", GrowthPhase::Juvenile),
        ("3", GrowthPhase::Adult),
        ("No reportado", GrowthPhase::NotReported),
        ("No reportada", GrowthPhase::NotReported),
    ],
    default: GrowthPhase::NotReported,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_values_take_the_default() {
        assert_eq!(resolve(None, LIFE_FORM.entries, LifeForm::Palm), LifeForm::Palm);
        assert_eq!(
            resolve(None, PHYSICAL_CONDITION.entries, PhysicalCondition::Fair),
            PhysicalCondition::Fair
        );
    }

    #[test]
    fn exact_labels_win() {
        assert_eq!(REPRODUCTIVE_CONDITION.resolve(Some("Floración")), ReproductiveCondition::Flowering);
        assert_eq!(LIFE_FORM.resolve(Some("Árbol")), LifeForm::Tree);
        assert_eq!(PHYTOSANITARY_STATUS.resolve(Some("Sano")), PhytosanitaryStatus::Healthy);
    }

    #[test]
    fn labels_match_case_insensitively_including_accents() {
        assert_eq!(LIFE_FORM.resolve(Some("árbol")), LifeForm::Tree);
        assert_eq!(LIFE_FORM.resolve(Some("ÁRBOL")), LifeForm::Tree);
        assert_eq!(
            IUCN_STATUS.resolve(Some("preocupación MENOR")),
            IucnStatus::LeastConcern
        );
        for label in ["Estimación óptica", "ESTIMACIÓN ÓPTICA", "estimación óptica"] {
            assert_eq!(
                MEASUREMENT_METHOD.resolve(Some(label)),
                MEASUREMENT_METHOD.resolve(Some(&label.to_lowercase()))
            );
        }
    }

    #[test]
    fn unknown_labels_fall_back_to_the_table_default() {
        assert_eq!(FOLIAGE_DENSITY.resolve(Some("frondoso")), FoliageDensity::NotReported);
        assert_eq!(resolve(Some("x"), ORIGIN.entries, Origin::Native), Origin::Native);
    }

    #[test]
    fn canonical_codes_pass_through_normalize() {
        assert_eq!(REPRODUCTIVE_CONDITION.normalize(Some("FL")), ReproductiveCondition::Flowering);
        assert_eq!(CANOPY_SHAPE.normalize(Some(" SP ")), CanopyShape::Spreading);
        assert_eq!(GROWTH_PHASE.normalize(Some("3")), GrowthPhase::Adult);
        assert_eq!(PHYTOSANITARY_STATUS.normalize(Some("Crítico")), PhytosanitaryStatus::Critical);
        assert_eq!(AESTHETIC_VALUE.normalize(Some("HI")), AestheticValue::NotReported);
        assert_eq!(ORIGIN.normalize(Some("")), Origin::NotIdentified);
    }
}
