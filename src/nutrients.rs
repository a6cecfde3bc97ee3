use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};
use std::str::FromStr;

use crate::error::OptimError;

/// The nutrients tracked for every ingredient and recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nutrient {
    Kcal,
    Water,
    Protein,
    Carbohydrate,
    Fat,
    Sugars,
    FaSaturated,
    Salt,
}

impl Nutrient {
    pub const ALL: [Nutrient; 8] = [
        Nutrient::Kcal,
        Nutrient::Water,
        Nutrient::Protein,
        Nutrient::Carbohydrate,
        Nutrient::Fat,
        Nutrient::Sugars,
        Nutrient::FaSaturated,
        Nutrient::Salt,
    ];

    /// Field name as it appears in `nutritional_info`.
    pub fn field_name(self) -> &'static str {
        match self {
            Nutrient::Kcal => "kcal",
            Nutrient::Water => "water_g",
            Nutrient::Protein => "protein_g",
            Nutrient::Carbohydrate => "carbohydrate_g",
            Nutrient::Fat => "fat_g",
            Nutrient::Sugars => "sugars_g",
            Nutrient::FaSaturated => "fa_saturated_g",
            Nutrient::Salt => "salt_g",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Nutrient::Kcal => "kcal",
            _ => "g",
        }
    }
}

impl fmt::Display for Nutrient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

impl FromStr for Nutrient {
    type Err = OptimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let nutrient = match normalized.as_str() {
            "kcal" | "energy" | "calories" => Nutrient::Kcal,
            "water" | "water_g" => Nutrient::Water,
            "protein" | "proteins" | "protein_g" => Nutrient::Protein,
            "carb" | "carbs" | "carbohydrate" | "carbohydrates" | "carbohydrate_g" => {
                Nutrient::Carbohydrate
            }
            "fat" | "fats" | "fat_g" => Nutrient::Fat,
            "sugar" | "sugars" | "sugars_g" => Nutrient::Sugars,
            "satfat" | "saturated" | "saturated_fat" | "fa_saturated" | "fa_saturated_g" => {
                Nutrient::FaSaturated
            }
            "salt" | "salt_g" => Nutrient::Salt,
            _ => return Err(OptimError::InvalidTarget(format!("unknown nutrient '{}'", s.trim()))),
        };
        Ok(nutrient)
    }
}

/// A nutrient profile. Depending on context the values are absolute grams
/// (kcal for energy) or grams per gram of ingredient.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NutrientVector {
    #[serde(default)]
    pub kcal: f64,
    #[serde(default)]
    pub water_g: f64,
    #[serde(default)]
    pub protein_g: f64,
    #[serde(default)]
    pub carbohydrate_g: f64,
    #[serde(default)]
    pub fat_g: f64,
    #[serde(default)]
    pub sugars_g: f64,
    #[serde(default)]
    pub fa_saturated_g: f64,
    #[serde(default)]
    pub salt_g: f64,
}

macro_rules! zip_fields {
    ($a:expr, $b:expr, $op:tt) => {
        NutrientVector {
            kcal: $a.kcal $op $b.kcal,
            water_g: $a.water_g $op $b.water_g,
            protein_g: $a.protein_g $op $b.protein_g,
            carbohydrate_g: $a.carbohydrate_g $op $b.carbohydrate_g,
            fat_g: $a.fat_g $op $b.fat_g,
            sugars_g: $a.sugars_g $op $b.sugars_g,
            fa_saturated_g: $a.fa_saturated_g $op $b.fa_saturated_g,
            salt_g: $a.salt_g $op $b.salt_g,
        }
    };
}

impl NutrientVector {
    pub fn get(&self, nutrient: Nutrient) -> f64 {
        match nutrient {
            Nutrient::Kcal => self.kcal,
            Nutrient::Water => self.water_g,
            Nutrient::Protein => self.protein_g,
            Nutrient::Carbohydrate => self.carbohydrate_g,
            Nutrient::Fat => self.fat_g,
            Nutrient::Sugars => self.sugars_g,
            Nutrient::FaSaturated => self.fa_saturated_g,
            Nutrient::Salt => self.salt_g,
        }
    }

    pub fn set(&mut self, nutrient: Nutrient, value: f64) {
        let slot = match nutrient {
            Nutrient::Kcal => &mut self.kcal,
            Nutrient::Water => &mut self.water_g,
            Nutrient::Protein => &mut self.protein_g,
            Nutrient::Carbohydrate => &mut self.carbohydrate_g,
            Nutrient::Fat => &mut self.fat_g,
            Nutrient::Sugars => &mut self.sugars_g,
            Nutrient::FaSaturated => &mut self.fa_saturated_g,
            Nutrient::Salt => &mut self.salt_g,
        };
        *slot = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Nutrient, f64)> + '_ {
        Nutrient::ALL.into_iter().map(move |n| (n, self.get(n)))
    }

    pub fn is_finite(&self) -> bool {
        self.iter().all(|(_, v)| v.is_finite())
    }

    /// `self += other * factor`, the inner step of every aggregation.
    pub fn add_scaled(&mut self, other: &NutrientVector, factor: f64) {
        *self += *other * factor;
    }

    /// Domain checks that are reported but never enforced.
    pub fn consistency_warnings(&self) -> Vec<String> {
        // Small slack for values rounded upstream.
        const SLACK: f64 = 1e-6;
        let mut warnings = Vec::new();
        if self.sugars_g > self.carbohydrate_g + SLACK {
            warnings.push(format!(
                "sugars_g ({:.3}) exceeds carbohydrate_g ({:.3})",
                self.sugars_g, self.carbohydrate_g
            ));
        }
        if self.fa_saturated_g > self.fat_g + SLACK {
            warnings.push(format!(
                "fa_saturated_g ({:.3}) exceeds fat_g ({:.3})",
                self.fa_saturated_g, self.fat_g
            ));
        }
        for (nutrient, value) in self.iter() {
            if value < 0.0 {
                warnings.push(format!("{} is negative ({:.3})", nutrient, value));
            }
        }
        warnings
    }
}

impl Add for NutrientVector {
    type Output = NutrientVector;

    fn add(self, rhs: NutrientVector) -> NutrientVector {
        zip_fields!(self, rhs, +)
    }
}

impl AddAssign for NutrientVector {
    fn add_assign(&mut self, rhs: NutrientVector) {
        *self = *self + rhs;
    }
}

impl Sub for NutrientVector {
    type Output = NutrientVector;

    fn sub(self, rhs: NutrientVector) -> NutrientVector {
        zip_fields!(self, rhs, -)
    }
}

impl Mul<f64> for NutrientVector {
    type Output = NutrientVector;

    fn mul(self, factor: f64) -> NutrientVector {
        NutrientVector {
            kcal: self.kcal * factor,
            water_g: self.water_g * factor,
            protein_g: self.protein_g * factor,
            carbohydrate_g: self.carbohydrate_g * factor,
            fat_g: self.fat_g * factor,
            sugars_g: self.sugars_g * factor,
            fa_saturated_g: self.fa_saturated_g * factor,
            salt_g: self.salt_g * factor,
        }
    }
}
