//! Record models shared by every pawtrack backend.
//!
//! Every stored record is a [`Record<T>`]: bookkeeping fields ([`RecordMeta`])
//! flattened together with the entity's own fields (`T: Entity`). References
//! between entities (event → pet, contact → pet, event → care item) are plain
//! identifiers and are not enforced by the store.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A named record collection in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Pets,
    Events,
    Contacts,
    CareItems,
    EventTypes,
    Stamps,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Pets,
        Collection::Events,
        Collection::Contacts,
        Collection::CareItems,
        Collection::EventTypes,
        Collection::Stamps,
    ];

    /// Stable name, also used as the SQLite table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Pets => "pets",
            Collection::Events => "events",
            Collection::Contacts => "contacts",
            Collection::CareItems => "care_items",
            Collection::EventTypes => "event_types",
            Collection::Stamps => "stamps",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Unknown collection: '{}'", s))
    }
}

/// Generate a fresh, opaque local identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Bookkeeping carried by every stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every local mutation. A queued snapshot only marks the
    /// record synced while its revision is still current.
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub synced: bool,
    /// Assigned by the remote service on the first successful create.
    #[serde(default)]
    pub remote_id: Option<String>,
}

impl RecordMeta {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            created_at: now,
            updated_at: now,
            revision: 1,
            synced: false,
            remote_id: None,
        }
    }

    /// Mark a local mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.revision += 1;
        self.synced = false;
    }
}

impl Default for RecordMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Fields that belong to the sync layer rather than to the entity.
pub const BOOKKEEPING_FIELDS: [&str; 4] = ["id", "synced", "remote_id", "revision"];

/// An entity type that can be stored in a [`Collection`].
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    /// Check required fields. Returns a human-readable reason on failure.
    fn validate(&self) -> Result<(), String>;
}

/// A stored record: bookkeeping plus entity fields, flattened on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
pub struct Record<T> {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Entity> Record<T> {
    pub fn new(data: T) -> Self {
        Self {
            meta: RecordMeta::new(),
            data,
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn is_synced(&self) -> bool {
        self.meta.synced
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.meta.remote_id.as_deref()
    }

    pub fn to_json(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: serde_json::Value) -> anyhow::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

impl<T> Deref for Record<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for Record<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}

fn require(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is required", field));
    }
    Ok(())
}

// ============ Entities ============

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pet {
    pub name: String,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub breed: Option<String>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Entity for Pet {
    const COLLECTION: Collection = Collection::Pets;

    fn validate(&self) -> Result<(), String> {
        require("name", &self.name)
    }
}

/// A user-defined category for events (e.g. "Vet visit").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventType {
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl Entity for EventType {
    const COLLECTION: Collection = Collection::EventTypes;

    fn validate(&self) -> Result<(), String> {
        require("name", &self.name)
    }
}

/// Something done repeatedly for one or more pets (feeding, medication…).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CareItem {
    pub name: String,
    #[serde(default)]
    pub pet_ids: Vec<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Entity for CareItem {
    const COLLECTION: Collection = Collection::CareItems;

    fn validate(&self) -> Result<(), String> {
        require("name", &self.name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Scheduled,
    Completed,
    Cancelled,
}

impl FromStr for EventStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(EventStatus::Scheduled),
            "completed" => Ok(EventStatus::Completed),
            "cancelled" => Ok(EventStatus::Cancelled),
            other => anyhow::bail!(
                "Unknown event status: '{}'. Must be scheduled, completed, or cancelled.",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub title: String,
    #[serde(default)]
    pub pet_ids: Vec<String>,
    #[serde(default)]
    pub event_type_id: Option<String>,
    #[serde(default)]
    pub care_item_id: Option<String>,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Entity for Event {
    const COLLECTION: Collection = Collection::Events;

    fn validate(&self) -> Result<(), String> {
        require("title", &self.title)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub pet_ids: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Entity for Contact {
    const COLLECTION: Collection = Collection::Contacts;

    fn validate(&self) -> Result<(), String> {
        require("name", &self.name)?;
        if let Some(email) = &self.email {
            if !email.contains('@') {
                return Err(format!("email '{}' is not a valid address", email));
            }
        }
        Ok(())
    }
}

/// A day-based mark: "care item X was done for pet Y on date D".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingStamp {
    pub pet_id: String,
    pub care_item_id: String,
    pub date: NaiveDate,
}

impl TrackingStamp {
    pub fn matches(&self, pet_id: &str, care_item_id: &str, date: NaiveDate) -> bool {
        self.pet_id == pet_id && self.care_item_id == care_item_id && self.date == date
    }
}

impl Entity for TrackingStamp {
    const COLLECTION: Collection = Collection::Stamps;

    fn validate(&self) -> Result<(), String> {
        require("pet_id", &self.pet_id)?;
        require("care_item_id", &self.care_item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_flattens_meta_and_fields() {
        let pet = Record::new(Pet {
            name: "Fido".to_string(),
            species: Some("dog".to_string()),
            ..Default::default()
        });
        let json = pet.to_json().unwrap();
        assert_eq!(json["name"], "Fido");
        assert_eq!(json["id"], pet.id());
        assert_eq!(json["synced"], false);
        assert!(json["remote_id"].is_null());

        let back: Record<Pet> = Record::from_json(json).unwrap();
        assert_eq!(back, pet);
    }

    #[test]
    fn test_new_ids_are_unique() {
        let a = RecordMeta::new();
        let b = RecordMeta::new();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_touch_bumps_revision_and_clears_synced() {
        let mut meta = RecordMeta::new();
        meta.synced = true;
        let before = meta.revision;
        meta.touch();
        assert_eq!(meta.revision, before + 1);
        assert!(!meta.synced);
    }

    #[test]
    fn test_validation_requires_names() {
        assert!(Pet::default().validate().is_err());
        assert!(Event::default().validate().is_err());
        let contact = Contact {
            name: "Dr. Vet".to_string(),
            email: Some("not-an-email".to_string()),
            ..Default::default()
        };
        assert!(contact.validate().unwrap_err().contains("email"));
    }

    #[test]
    fn test_collection_from_str() {
        assert_eq!("care_items".parse::<Collection>().unwrap(), Collection::CareItems);
        assert!("widgets".parse::<Collection>().is_err());
    }

    #[test]
    fn test_stamp_matches() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let stamp = TrackingStamp {
            pet_id: "p1".to_string(),
            care_item_id: "c1".to_string(),
            date,
        };
        assert!(stamp.matches("p1", "c1", date));
        assert!(!stamp.matches("p1", "c2", date));
    }
}
