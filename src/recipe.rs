use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{OptimError, OptimResult};
use crate::nutrients::NutrientVector;

// --- Wire format ---

/// Nutrient values for the whole `quantity_grams` of one ingredient.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NutritionalInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ciqual_name: Option<String>,
    pub kcal: Option<f64>,
    pub water_g: Option<f64>,
    pub protein_g: Option<f64>,
    pub carbohydrate_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub sugars_g: Option<f64>,
    pub fa_saturated_g: Option<f64>,
    pub salt_g: Option<f64>,
}

impl NutritionalInfo {
    /// Missing fields count as zero.
    pub fn to_vector(&self) -> NutrientVector {
        NutrientVector {
            kcal: self.kcal.unwrap_or(0.0),
            water_g: self.water_g.unwrap_or(0.0),
            protein_g: self.protein_g.unwrap_or(0.0),
            carbohydrate_g: self.carbohydrate_g.unwrap_or(0.0),
            fat_g: self.fat_g.unwrap_or(0.0),
            sugars_g: self.sugars_g.unwrap_or(0.0),
            fa_saturated_g: self.fa_saturated_g.unwrap_or(0.0),
            salt_g: self.salt_g.unwrap_or(0.0),
        }
    }

    /// Scales present values, keeping absent ones absent.
    pub fn rescaled(&self, factor: f64) -> NutritionalInfo {
        let scale = |v: Option<f64>| v.map(|x| x * factor);
        NutritionalInfo {
            source_ciqual_name: self.source_ciqual_name.clone(),
            kcal: scale(self.kcal),
            water_g: scale(self.water_g),
            protein_g: scale(self.protein_g),
            carbohydrate_g: scale(self.carbohydrate_g),
            fat_g: scale(self.fat_g),
            sugars_g: scale(self.sugars_g),
            fa_saturated_g: scale(self.fa_saturated_g),
            salt_g: scale(self.salt_g),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct IngredientRecord {
    #[serde(default)]
    pub raw_text: String,
    pub ingredient_name: String,
    #[serde(default)]
    pub original_quantity: String,
    #[serde(default)]
    pub original_unit: String,
    #[serde(default)]
    pub preparation_notes: String,
    #[serde(default)]
    pub quantity_grams: Option<f64>,
    #[serde(default)]
    pub nutritional_info: Option<NutritionalInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_grams: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_grams: Option<f64>,
    /// Fields such as `conversion_source` that are carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RecipeDocument {
    #[serde(alias = "title")]
    pub recipe_title: String,
    pub ingredients: Vec<IngredientRecord>,
    #[serde(default)]
    pub instructions: Vec<String>,
    // Derived data from an earlier run is recomputed, never trusted.
    #[serde(default, skip_serializing)]
    pub nutritional_profile: Option<Value>,
    #[serde(default, skip_serializing)]
    pub optimization_report: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// --- Domain types ---

/// How far an ingredient's quantity may move, in grams.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QuantityBounds {
    pub min_g: Option<f64>,
    pub max_g: Option<f64>,
}

impl QuantityBounds {
    pub fn pinned(quantity_g: f64) -> Self {
        Self { min_g: Some(quantity_g), max_g: Some(quantity_g) }
    }

    pub fn lower(&self) -> f64 {
        self.min_g.unwrap_or(0.0).max(0.0)
    }

    pub fn upper(&self) -> f64 {
        self.max_g.unwrap_or(f64::INFINITY)
    }

    /// Never returns a negative quantity.
    pub fn clamp(&self, quantity_g: f64) -> f64 {
        let upper = self.upper().max(self.lower());
        quantity_g.max(self.lower()).min(upper)
    }

    pub fn intersect(&self, other: &QuantityBounds) -> QuantityBounds {
        let min_g = match (self.min_g, other.min_g) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let max_g = match (self.max_g, other.max_g) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        QuantityBounds { min_g, max_g }
    }

    pub fn is_pinned(&self) -> bool {
        self.upper() <= self.lower()
    }
}

#[derive(Debug, Clone)]
pub struct Ingredient {
    pub raw_text: String,
    pub name: String,
    pub preparation_notes: String,
    /// The optimization variable.
    pub quantity_g: f64,
    pub original_quantity_g: f64,
    /// Nutrients per gram.
    pub density: NutrientVector,
    pub bounds: QuantityBounds,
    source: Option<IngredientRecord>,
}

impl Ingredient {
    pub fn new(name: impl Into<String>, quantity_g: f64, density: NutrientVector) -> Self {
        let name = name.into();
        Self {
            raw_text: format!("{} g {}", quantity_g, name),
            name,
            preparation_notes: String::new(),
            quantity_g,
            original_quantity_g: quantity_g,
            density,
            bounds: QuantityBounds::default(),
            source: None,
        }
    }

    pub fn with_bounds(mut self, min_g: Option<f64>, max_g: Option<f64>) -> Self {
        self.bounds = QuantityBounds { min_g, max_g };
        self
    }

    /// Absolute nutrients at the current quantity.
    pub fn nutrients(&self) -> NutrientVector {
        self.density * self.quantity_g
    }

    /// Rows without usable nutrition take no part in the optimization and do
    /// not count toward the recipe's mass.
    fn from_record(record: IngredientRecord) -> OptimResult<LoadedRow> {
        let name = record.ingredient_name.clone();
        validate_record(&record)?;

        let quantity_g = match (record.nutritional_info.is_some(), record.quantity_grams) {
            (true, Some(grams)) if grams > 0.0 => grams,
            (false, _) => {
                tracing::warn!(
                    "Ingredient '{}' has no nutritional_info; it is kept as is and left out of the totals.",
                    name
                );
                return Ok(LoadedRow::PassThrough(record));
            }
            (true, _) => {
                tracing::warn!(
                    "Ingredient '{}' has nutritional_info but no usable quantity_grams; it is kept as is and left out of the totals.",
                    name
                );
                return Ok(LoadedRow::PassThrough(record));
            }
        };

        let totals = record.nutritional_info.as_ref().map(NutritionalInfo::to_vector).unwrap_or_default();
        let density = totals * (1.0 / quantity_g);
        if !density.is_finite() {
            return Err(OptimError::InvalidRecipe(format!(
                "ingredient '{}' has non-finite nutritional_info",
                name
            )));
        }
        for warning in density.consistency_warnings() {
            tracing::warn!("Ingredient '{}': {}", name, warning);
        }

        let bounds = QuantityBounds { min_g: record.min_grams, max_g: record.max_grams };
        if quantity_g < bounds.lower() || quantity_g > bounds.upper() {
            tracing::warn!(
                "Ingredient '{}' starts at {:.1} g, outside its bounds [{:.1}, {:.1}]",
                name,
                quantity_g,
                bounds.lower(),
                bounds.upper()
            );
        }

        Ok(LoadedRow::Ingredient(Self {
            raw_text: record.raw_text.clone(),
            name,
            preparation_notes: record.preparation_notes.clone(),
            quantity_g,
            original_quantity_g: quantity_g,
            density,
            bounds,
            source: Some(record),
        }))
    }

    fn to_record(&self) -> IngredientRecord {
        match &self.source {
            Some(source) => {
                let mut record = source.clone();
                record.quantity_grams = Some(self.quantity_g);
                record.nutritional_info = match (&source.nutritional_info, source.quantity_grams) {
                    (Some(info), Some(old_grams)) if old_grams > 0.0 => {
                        Some(info.rescaled(self.quantity_g / old_grams))
                    }
                    (info, _) => info.clone(),
                };
                record
            }
            None => {
                let totals = self.nutrients();
                IngredientRecord {
                    raw_text: self.raw_text.clone(),
                    ingredient_name: self.name.clone(),
                    original_quantity: format!("{}", self.original_quantity_g),
                    original_unit: "g".to_string(),
                    preparation_notes: self.preparation_notes.clone(),
                    quantity_grams: Some(self.quantity_g),
                    nutritional_info: Some(NutritionalInfo {
                        source_ciqual_name: None,
                        kcal: Some(totals.kcal),
                        water_g: Some(totals.water_g),
                        protein_g: Some(totals.protein_g),
                        carbohydrate_g: Some(totals.carbohydrate_g),
                        fat_g: Some(totals.fat_g),
                        sugars_g: Some(totals.sugars_g),
                        fa_saturated_g: Some(totals.fa_saturated_g),
                        salt_g: Some(totals.salt_g),
                    }),
                    min_grams: self.bounds.min_g,
                    max_grams: self.bounds.max_g,
                    extra: Map::new(),
                }
            }
        }
    }
}

fn validate_record(record: &IngredientRecord) -> OptimResult<()> {
    let name = &record.ingredient_name;
    if let Some(grams) = record.quantity_grams {
        if !grams.is_finite() || grams < 0.0 {
            return Err(OptimError::InvalidRecipe(format!(
                "ingredient '{}' has invalid quantity_grams {}",
                name, grams
            )));
        }
    }
    for bound in [record.min_grams, record.max_grams].into_iter().flatten() {
        if !bound.is_finite() || bound < 0.0 {
            return Err(OptimError::InvalidRecipe(format!(
                "ingredient '{}' has invalid bound {}",
                name, bound
            )));
        }
    }
    if let (Some(min_g), Some(max_g)) = (record.min_grams, record.max_grams) {
        if min_g > max_g {
            return Err(OptimError::InvalidRecipe(format!(
                "ingredient '{}' has min_grams {} above max_grams {}",
                name, min_g, max_g
            )));
        }
    }
    Ok(())
}

enum LoadedRow {
    Ingredient(Ingredient),
    PassThrough(IngredientRecord),
}

/// A document row without usable nutrition, written back where it was read.
#[derive(Debug, Clone)]
struct PassThroughRow {
    position: usize,
    record: IngredientRecord,
}

#[derive(Debug, Clone)]
pub struct Recipe {
    pub title: String,
    /// Only ingredients with both grams and nutrition; these are optimized.
    pub ingredients: Vec<Ingredient>,
    pub instructions: Vec<String>,
    pass_through: Vec<PassThroughRow>,
    extra: Map<String, Value>,
}

impl Recipe {
    pub fn new(title: impl Into<String>, ingredients: Vec<Ingredient>, instructions: Vec<String>) -> Self {
        Self {
            title: title.into(),
            ingredients,
            instructions,
            pass_through: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn from_document(document: RecipeDocument) -> OptimResult<Self> {
        let mut ingredients = Vec::new();
        let mut pass_through = Vec::new();
        for (position, record) in document.ingredients.into_iter().enumerate() {
            match Ingredient::from_record(record)? {
                LoadedRow::Ingredient(ingredient) => ingredients.push(ingredient),
                LoadedRow::PassThrough(record) => pass_through.push(PassThroughRow { position, record }),
            }
        }
        Ok(Self {
            title: document.recipe_title,
            ingredients,
            instructions: document.instructions,
            pass_through,
            extra: document.extra,
        })
    }

    /// Rows kept verbatim because they lack grams or nutrition.
    pub fn pass_through_rows(&self) -> impl Iterator<Item = &IngredientRecord> {
        self.pass_through.iter().map(|row| &row.record)
    }

    /// The document with current quantities; `nutritional_info` is rescaled to match.
    /// Rows follow their original order.
    pub fn to_document(&self) -> RecipeDocument {
        let total = self.ingredients.len() + self.pass_through.len();
        let mut optimized = self.ingredients.iter().map(Ingredient::to_record);
        let mut fixed = self.pass_through.iter().peekable();
        let mut records = Vec::with_capacity(total);
        for position in 0..total {
            match fixed.next_if(|row| row.position == position) {
                Some(row) => records.push(row.record.clone()),
                None => records.extend(optimized.next()),
            }
        }

        RecipeDocument {
            recipe_title: self.title.clone(),
            ingredients: records,
            instructions: self.instructions.clone(),
            nutritional_profile: None,
            optimization_report: None,
            extra: self.extra.clone(),
        }
    }

    pub fn quantities(&self) -> Vec<f64> {
        self.ingredients.iter().map(|i| i.quantity_g).collect()
    }

    pub fn original_quantities(&self) -> Vec<f64> {
        self.ingredients.iter().map(|i| i.original_quantity_g).collect()
    }

    pub fn set_quantities(&mut self, quantities: &[f64]) {
        debug_assert_eq!(quantities.len(), self.ingredients.len());
        for (ingredient, &q) in self.ingredients.iter_mut().zip(quantities) {
            ingredient.quantity_g = q;
        }
    }

    pub fn find_ingredient(&self, name: &str) -> Option<usize> {
        let wanted = name.trim();
        self.ingredients
            .iter()
            .position(|i| i.name == wanted)
            .or_else(|| self.ingredients.iter().position(|i| i.name.eq_ignore_ascii_case(wanted)))
    }
}
