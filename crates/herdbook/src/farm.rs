//! Farm record shapes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::resource::Resource;
use crate::store::ReferenceField;

/// Every resource name defined here, in reconcile order.
pub const RESOURCE_NAMES: [&str; 5] = [
    Cattle::NAME,
    Horse::NAME,
    HealthRecord::NAME,
    ReproductionRecord::NAME,
    Document::NAME,
];

/// Fields holding an animal id. An animal created offline is referenced by
/// its local id until promotion rewrites these to the remote id.
pub fn reference_fields() -> Vec<ReferenceField> {
    vec![
        ReferenceField::new(HealthRecord::NAME, "animal_id"),
        ReferenceField::new(ReproductionRecord::NAME, "animal_id"),
        ReferenceField::new(ReproductionRecord::NAME, "sire_id"),
        ReferenceField::new(Document::NAME, "animal_id"),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Species {
    Cattle,
    Horse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cattle {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    /// Kilograms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Resource for Cattle {
    const NAME: &'static str = "cattle";
    const FIELDS: &'static [&'static str] = &[
        "name",
        "tag_number",
        "breed",
        "sex",
        "birth_date",
        "weight",
        "notes",
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Horse {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Resource for Horse {
    const NAME: &'static str = "horses";
    const FIELDS: &'static [&'static str] = &[
        "name",
        "breed",
        "sex",
        "color",
        "birth_date",
        "registration_number",
        "notes",
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    /// Id of the animal; a local id is relinked when the animal is promoted.
    pub animal_id: String,
    pub species: Species,
    pub date: NaiveDate,
    /// e.g. `vaccination`, `treatment`, `checkup`
    pub record_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub veterinarian: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_due: Option<NaiveDate>,
}

impl Resource for HealthRecord {
    const NAME: &'static str = "health_records";
    const FIELDS: &'static [&'static str] = &[
        "animal_id",
        "species",
        "date",
        "record_type",
        "description",
        "veterinarian",
        "cost",
        "next_due",
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReproductionEvent {
    Heat,
    Breeding,
    PregnancyCheck,
    Birth,
    Weaning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReproductionRecord {
    pub animal_id: String,
    pub species: Species,
    pub event: ReproductionEvent,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sire_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Resource for ReproductionRecord {
    const NAME: &'static str = "reproduction_records";
    const FIELDS: &'static [&'static str] = &[
        "animal_id",
        "species",
        "event",
        "date",
        "sire_id",
        "expected_due_date",
        "notes",
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Resource for Document {
    const NAME: &'static str = "documents";
    const FIELDS: &'static [&'static str] =
        &["title", "category", "file_url", "animal_id", "notes"];
}
