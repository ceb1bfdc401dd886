//! Parcel profile used for every shipment.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Unit for parcel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    In,
    Cm,
}

/// Unit for parcel weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MassUnit {
    Lb,
    Oz,
    Kg,
    G,
}

/// Physical dimensions and weight of one parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parcel {
    pub length: Decimal,
    pub width: Decimal,
    pub height: Decimal,
    pub distance_unit: DistanceUnit,
    pub weight: Decimal,
    pub mass_unit: MassUnit,
}

impl Parcel {
    /// The standard gift box: 10 x 8 x 4 in, 2 lb packed.
    pub const DEFAULT: Self = Self {
        length: Decimal::from_parts(10, 0, 0, false, 0),
        width: Decimal::from_parts(8, 0, 0, false, 0),
        height: Decimal::from_parts(4, 0, 0, false, 0),
        distance_unit: DistanceUnit::In,
        weight: Decimal::from_parts(2, 0, 0, false, 0),
        mass_unit: MassUnit::Lb,
    };
}

impl Default for Parcel {
    fn default() -> Self {
        Self::DEFAULT
    }
}
