//! Fixed enumerations stored as short codes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An enumeration persisted as its short code.
pub trait Coded: Sized + Copy + 'static {
    fn code(self) -> &'static str;
    fn from_code(code: &str) -> Option<Self>;
}

macro_rules! coded_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $code)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
        }

        impl Coded for $name {
            fn code(self) -> &'static str {
                match self {
                    $($name::$variant => $code),+
                }
            }

            fn from_code(code: &str) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.code())
            }
        }
    };
}

coded_enum!(Origin {
    Native => "NA",
    Cultivated => "CU",
    NativeCultivated => "NC",
    Naturalized => "NU",
    NaturalizedCultivated => "NL",
    Endemic => "EN",
    Exotic => "EX",
    NotIdentified => "NI",
});

coded_enum!(
    /// IUCN Red List category.
    IucnStatus {
        DataDeficient => "DD",
        LeastConcern => "LC",
        ConservationDependent => "CD",
        NearThreatened => "NT",
        Vulnerable => "VU",
        Endangered => "EN",
        CriticallyEndangered => "CR",
        ExtinctInWild => "EW",
        Extinct => "EX",
        NotEvaluated => "NE",
    }
);

coded_enum!(LifeForm {
    Tree => "TR",
    Palm => "PT",
    Shrub => "SH",
    Other => "OT",
});

coded_enum!(CanopyShape {
    Broad => "BD",
    Conical => "CF",
    Crown => "CR",
    Columnar => "CS",
    Compact => "CO",
    Globular => "GL",
    Irregular => "IR",
    Oval => "OV",
    Pyramidal => "PY",
    Single => "SG",
    Spreading => "SP",
    Other => "OT",
    NotIdentified => "NI",
});

coded_enum!(FlowerColor {
    Brown => "BR",
    Fuchsia => "FU",
    Green => "GR",
    Orange => "OR",
    Pink => "PI",
    Red => "RE",
    Violet => "VI",
    White => "WH",
    Yellow => "YE",
    Other => "OT",
    NotIdentified => "NI",
});

coded_enum!(MeasuredAttribute {
    TrunkHeight => "TH",
    TotalHeight => "HT",
    CrownDiameter => "CD",
    DiameterBreastHeight => "DBH",
    Volume => "VO",
    WoodDensity => "WD",
    Other => "OT",
    NotReported => "NR",
});

coded_enum!(MeasurementUnit {
    Meters => "m",
    CubicMeters => "m3",
    Centimeters => "cm",
    Millimeters => "mm",
    GramsPerCubicCentimeter => "g/cm3",
    Other => "OT",
    NotReported => "NR",
});

coded_enum!(MeasurementMethod {
    OpticalEstimation => "OE",
    DiameterTape => "DT",
    VolumeEquation => "VE",
    WoodDensityDatabase => "WD",
    Other => "OT",
    NotReported => "NR",
});

coded_enum!(ReproductiveCondition {
    Flowering => "FL",
    Fruiting => "FR",
    Sterile => "ST",
    NotReported => "NR",
});

coded_enum!(PhytosanitaryStatus {
    Healthy => "HE",
    Sick => "SI",
    Critical => "CR",
    Dead => "DE",
    NotReported => "NR",
});

coded_enum!(PhysicalCondition {
    Good => "GO",
    Fair => "FA",
    Poor => "PO",
    NotReported => "NR",
});

coded_enum!(FoliageDensity {
    Dense => "DE",
    Medium => "ME",
    Sparse => "SP",
    NotReported => "NR",
});

coded_enum!(AestheticValue {
    Essential => "ES",
    Emblematic => "EM",
    Desirable => "DE",
    Indifferent => "IN",
    Unacceptable => "UN",
    NotReported => "NR",
});

coded_enum!(GrowthPhase {
    Sapling => "F1",
    Juvenile => "F2",
    Adult => "F3",
    NotReported => "NR",
});

coded_enum!(
    /// The four trait families every functional group is described by.
    TraitKind {
        CarbonSequestration => "CARBON",
        ShadeIndex => "SHADE",
        CanopyDiameter => "CANOPY",
        HeightMax => "HEIGHT",
    }
);

impl TraitKind {
    /// Column prefix used by the traits source (`<prefix>_min` / `<prefix>_max`).
    pub fn source_prefix(self) -> &'static str {
        match self {
            TraitKind::CarbonSequestration => "carbon_sequestration",
            TraitKind::ShadeIndex => "shade_index",
            TraitKind::CanopyDiameter => "canopy_diameter",
            TraitKind::HeightMax => "height_max",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_from_code() {
        for unit in MeasurementUnit::ALL {
            assert_eq!(MeasurementUnit::from_code(unit.code()), Some(*unit));
        }
        assert_eq!(MeasurementUnit::from_code("g/cm3"), Some(MeasurementUnit::GramsPerCubicCentimeter));
        assert_eq!(MeasurementUnit::from_code("M"), None);
    }

    #[test]
    fn display_prints_the_short_code() {
        assert_eq!(IucnStatus::NearThreatened.to_string(), "NT");
        assert_eq!(GrowthPhase::Adult.to_string(), "F3");
    }

    #[test]
    fn trait_kinds_cover_four_families() {
        assert_eq!(TraitKind::ALL.len(), 4);
        assert_eq!(TraitKind::HeightMax.source_prefix(), "height_max");
    }
}
