use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date, OffsetDateTime};
use uuid::Uuid;

/// Default health score for entries that arrive without one.
pub const DEFAULT_HEALTH_SCORE: u8 = 50;

/// Meal category label. Anything outside the four fixed tags is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum MealTag {
    Breakfast,
    Lunch,
    Dinner,
    #[default]
    Snack,
    Custom(String),
}

impl From<String> for MealTag {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "breakfast" => MealTag::Breakfast,
            "lunch" => MealTag::Lunch,
            "dinner" => MealTag::Dinner,
            "snack" => MealTag::Snack,
            _ => MealTag::Custom(raw),
        }
    }
}

impl From<MealTag> for String {
    fn from(tag: MealTag) -> Self {
        match tag {
            MealTag::Breakfast => "breakfast".into(),
            MealTag::Lunch => "lunch".into(),
            MealTag::Dinner => "dinner".into(),
            MealTag::Snack => "snack".into(),
            MealTag::Custom(s) => s,
        }
    }
}

/// How an entry reached the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    #[default]
    Manual,
    Description,
    Photo,
    Database,
}

/// Extended nutrients. Units: mg for cholesterol/magnesium/sodium/potassium,
/// g for sugar/fiber, % daily value for the vitamins and minerals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Micronutrients {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cholesterol: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnesium: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sugar: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiber: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sodium: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potassium: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vitamin_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vitamin_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calcium: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iron: Option<f64>,
}

impl Micronutrients {
    /// Overwrite every field that is set in `other`.
    pub fn merge(&mut self, other: Micronutrients) {
        macro_rules! take {
            ($($f:ident),*) => {
                $(if other.$f.is_some() { self.$f = other.$f; })*
            };
        }
        take!(cholesterol, magnesium, sugar, fiber, sodium, potassium, vitamin_a, vitamin_c, calcium, iron);
    }
}

/// A single logged meal or food record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealEntry {
    pub id: Uuid,
    pub food_name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    #[serde(flatten)]
    pub micros: Micronutrients,
    #[serde(default)]
    pub meal_tag: MealTag,
    pub health_score: u8,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub year: i32,
    #[serde(default)]
    pub source: EntrySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
}

/// Entry as supplied by the caller: everything except what the ledger assigns.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntry {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(alias = "description")]
    pub food_name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    #[serde(flatten)]
    pub micros: Micronutrients,
    #[serde(default)]
    pub meal_tag: MealTag,
    #[serde(default)]
    pub health_score: Option<u8>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    #[serde(default)]
    pub source: EntrySource,
}

/// Partial update of an entry; absent fields stay untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPatch {
    #[serde(default, alias = "description")]
    pub food_name: Option<String>,
    #[serde(default)]
    pub calories: Option<f64>,
    #[serde(default)]
    pub protein: Option<f64>,
    #[serde(default)]
    pub carbs: Option<f64>,
    #[serde(default)]
    pub fat: Option<f64>,
    #[serde(flatten)]
    pub micros: Micronutrients,
    #[serde(default)]
    pub meal_tag: Option<MealTag>,
    #[serde(default)]
    pub health_score: Option<u8>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

impl EntryPatch {
    pub(crate) fn apply(self, entry: &mut MealEntry) {
        if let Some(v) = self.food_name {
            entry.food_name = v;
        }
        if let Some(v) = self.calories {
            entry.calories = v;
        }
        if let Some(v) = self.protein {
            entry.protein = v;
        }
        if let Some(v) = self.carbs {
            entry.carbs = v;
        }
        if let Some(v) = self.fat {
            entry.fat = v;
        }
        entry.micros.merge(self.micros);
        if let Some(v) = self.meal_tag {
            entry.meal_tag = v;
        }
        if let Some(v) = self.health_score {
            entry.health_score = v.min(100);
        }
        // the entry stays under its original date key
        if let Some(v) = self.timestamp {
            entry.timestamp = v;
            entry.year = v.year();
        }
    }
}

/// Aggregated macro totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total_calories: f64,
    pub total_protein: f64,
    pub total_carbs: f64,
    pub total_fat: f64,
}

impl Totals {
    pub fn add_entry(&mut self, e: &MealEntry) {
        self.total_calories += e.calories;
        self.total_protein += e.protein;
        self.total_carbs += e.carbs;
        self.total_fat += e.fat;
    }

    pub fn add(&mut self, other: &Totals) {
        self.total_calories += other.total_calories;
        self.total_protein += other.total_protein;
        self.total_carbs += other.total_carbs;
        self.total_fat += other.total_fat;
    }

    pub fn scaled(&self, factor: f64) -> Totals {
        Totals {
            total_calories: self.total_calories * factor,
            total_protein: self.total_protein * factor,
            total_carbs: self.total_carbs * factor,
            total_fat: self.total_fat * factor,
        }
    }
}

/// Entries of one local calendar day plus their cached totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLedger {
    pub date: String,
    pub entries: Vec<MealEntry>,
    #[serde(flatten)]
    pub totals: Totals,
}

impl DailyLedger {
    pub fn empty(date: &str) -> Self {
        Self {
            date: date.to_string(),
            entries: Vec::new(),
            totals: Totals::default(),
        }
    }

    /// Rebuild the cached totals from the entries.
    pub fn recompute(&mut self) {
        let mut totals = Totals::default();
        for e in &self.entries {
            totals.add_entry(e);
        }
        self.totals = totals;
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid date key {0:?}, expected YYYY-MM-DD")]
pub struct DateKeyError(pub String);

/// `YYYY-MM-DD` key for a calendar date.
pub fn date_key(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

pub fn parse_date_key(raw: &str) -> Result<Date, DateKeyError> {
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map_err(|_| DateKeyError(raw.to_string()))
}
