use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};
use ulid::Ulid;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DomainError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("wire format error: {0}")]
    Wire(String),
}

/// Opaque record identifier, assigned once at creation and stable for the
/// record's lifetime. ULIDs replace the original wall-clock-millisecond ids,
/// which could collide under rapid creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordId(pub Ulid);

impl RecordId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(value)
            .map(Self)
            .map_err(|err| DomainError::Validation(format!("invalid record id `{value}`: {err}")))
    }
}

/// Calendar-day bucket key, written on the wire as `YYYY-MM-DD`.
/// Ordering is chronological.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DayKey(pub Date);

impl Display for DayKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.0.year(), u8::from(self.0.month()), self.0.day())
    }
}

impl FromStr for DayKey {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let format = format_description!("[year]-[month]-[day]");
        Date::parse(value, &format)
            .map(Self)
            .map_err(|err| DomainError::Validation(format!("invalid day key `{value}`: {err}")))
    }
}

impl Serialize for DayKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DayKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Minute-resolution time of day, written on the wire as `HH:MM`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TimeOfDay(pub Time);

impl Display for TimeOfDay {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.0.hour(), self.0.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let format = format_description!("[hour]:[minute]");
        Time::parse(value, &format)
            .map(Self)
            .map_err(|err| DomainError::Validation(format!("invalid time of day `{value}`: {err}")))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Bookmark,
    Journal,
}

/// Whether a kind stores its records under per-day buckets or in one
/// implicit global bucket.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Bucketing {
    Daily,
    Global,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Bookmark => "bookmark",
            Self::Journal => "journal",
        }
    }

    /// Collection name used for endpoint paths, store files, and cache keys.
    #[must_use]
    pub fn collection_name(self) -> &'static str {
        match self {
            Self::Task => "tasks",
            Self::Bookmark => "bookmarks",
            Self::Journal => "daily-records",
        }
    }

    #[must_use]
    pub fn from_collection_name(value: &str) -> Option<Self> {
        match value {
            "tasks" => Some(Self::Task),
            "bookmarks" => Some(Self::Bookmark),
            "daily-records" => Some(Self::Journal),
            _ => None,
        }
    }

    #[must_use]
    pub fn bucketing(self) -> Bucketing {
        match self {
            Self::Task | Self::Journal => Bucketing::Daily,
            Self::Bookmark => Bucketing::Global,
        }
    }

    /// The wire shape of an empty collection: an object for day-bucketed
    /// kinds, an array for the global kind.
    #[must_use]
    pub fn empty_wire(self) -> serde_json::Value {
        match self.bucketing() {
            Bucketing::Daily => serde_json::Value::Object(serde_json::Map::new()),
            Bucketing::Global => serde_json::Value::Array(Vec::new()),
        }
    }
}

/// Active category/tag filter: `all`, or one specific value.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Selector {
    All,
    Category(String),
}

impl Selector {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "all" {
            Self::All
        } else {
            Self::Category(value.to_string())
        }
    }
}

/// Outcome of an update/toggle/delete against a record reference that may be
/// stale. `NotFound` is an ordinary, observable outcome rather than an error:
/// the system must never fail hard on a double-delete or an edit of a record
/// that disappeared underneath the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
#[must_use]
pub enum MutationOutcome {
    Applied,
    NotFound,
}

impl MutationOutcome {
    #[must_use]
    pub fn applied(self) -> bool {
        self == Self::Applied
    }
}

/// Entity-specific payload behavior: validation, partial updates, and how the
/// record participates in filtering and bucket ordering.
pub trait EntityPayload: Clone + Serialize + DeserializeOwned {
    type Patch;

    const KIND: EntityKind;

    /// Reject payloads a form submit would have blocked (missing required
    /// fields).
    ///
    /// # Errors
    /// Returns [`DomainError::Validation`] with a user-facing message.
    fn validate(&self) -> Result<(), DomainError>;

    /// Merge the given fields into the payload, leaving absent fields
    /// untouched.
    fn apply(&mut self, patch: Self::Patch);

    fn matches_selector(&self, selector: &Selector) -> bool;

    /// `query` is non-empty and already lowercased.
    fn matches_query(&self, query: &str) -> bool;

    /// Re-establish the kind's within-bucket order after a mutation. The
    /// default keeps insertion order.
    fn sort_bucket(_records: &mut [Record<Self>]) {}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record<P> {
    pub id: RecordId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(flatten)]
    pub payload: P,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TaskPayload {
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TaskPatch {
    pub text: Option<String>,
    pub completed: Option<bool>,
}

impl EntityPayload for TaskPayload {
    type Patch = TaskPatch;

    const KIND: EntityKind = EntityKind::Task;

    fn validate(&self) -> Result<(), DomainError> {
        if self.text.trim().is_empty() {
            return Err(DomainError::Validation("task text must not be empty".to_string()));
        }
        Ok(())
    }

    fn apply(&mut self, patch: TaskPatch) {
        if let Some(text) = patch.text {
            self.text = text;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
    }

    fn matches_selector(&self, _selector: &Selector) -> bool {
        true
    }

    fn matches_query(&self, query: &str) -> bool {
        self.text.to_lowercase().contains(query)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct BookmarkPayload {
    pub title: String,
    pub url: String,
    pub category: String,
    #[serde(default)]
    pub desc: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct BookmarkPatch {
    pub title: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub desc: Option<String>,
}

impl EntityPayload for BookmarkPayload {
    type Patch = BookmarkPatch;

    const KIND: EntityKind = EntityKind::Bookmark;

    fn validate(&self) -> Result<(), DomainError> {
        for (field, value) in
            [("title", &self.title), ("url", &self.url), ("category", &self.category)]
        {
            if value.trim().is_empty() {
                return Err(DomainError::Validation(format!(
                    "bookmark {field} must not be empty"
                )));
            }
        }
        Ok(())
    }

    fn apply(&mut self, patch: BookmarkPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(url) = patch.url {
            self.url = url;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(desc) = patch.desc {
            self.desc = desc;
        }
    }

    fn matches_selector(&self, selector: &Selector) -> bool {
        match selector {
            Selector::All => true,
            Selector::Category(category) => self.category == *category,
        }
    }

    fn matches_query(&self, query: &str) -> bool {
        self.title.to_lowercase().contains(query)
            || self.desc.to_lowercase().contains(query)
            || self.url.to_lowercase().contains(query)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct JournalPayload {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub time: Option<TimeOfDay>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct JournalPatch {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` clears the time of day.
    pub time: Option<Option<TimeOfDay>>,
}

impl JournalPayload {
    /// Entries without an explicit time compare as midnight.
    #[must_use]
    pub fn time_or_midnight(&self) -> Time {
        self.time.map_or(Time::MIDNIGHT, |time| time.0)
    }
}

impl EntityPayload for JournalPayload {
    type Patch = JournalPatch;

    const KIND: EntityKind = EntityKind::Journal;

    fn validate(&self) -> Result<(), DomainError> {
        if self.content.trim().is_empty() {
            return Err(DomainError::Validation("journal content must not be empty".to_string()));
        }
        Ok(())
    }

    fn apply(&mut self, patch: JournalPatch) {
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(time) = patch.time {
            self.time = time;
        }
    }

    fn matches_selector(&self, selector: &Selector) -> bool {
        match selector {
            Selector::All => true,
            Selector::Category(tag) => self.tags.iter().any(|candidate| candidate == tag),
        }
    }

    fn matches_query(&self, query: &str) -> bool {
        self.content.to_lowercase().contains(query)
            || self.tags.iter().any(|tag| tag.to_lowercase().contains(query))
    }

    fn sort_bucket(records: &mut [Record<Self>]) {
        // Most recent time of day first; the sort is stable so equal times
        // keep insertion order.
        records.sort_by(|lhs, rhs| {
            rhs.payload.time_or_midnight().cmp(&lhs.payload.time_or_midnight())
        });
    }
}

/// One day's slice of a filtered projection. `day` is `None` for the global
/// bucket of unbucketed kinds.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DayView<P> {
    pub day: Option<DayKey>,
    pub records: Vec<Record<P>>,
}

/// Derived, never persisted: the subset and ordering of records to present
/// for the current selector and search query. Buckets are sorted ascending by
/// day key; empty buckets are omitted entirely.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FilteredView<P> {
    pub buckets: Vec<DayView<P>>,
}

impl<P> FilteredView<P> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    #[must_use]
    pub fn total_records(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.records.len()).sum()
    }
}

impl<P> Default for FilteredView<P> {
    fn default() -> Self {
        Self { buckets: Vec::new() }
    }
}

/// The full in-memory set of records for one entity kind, bucketed by day for
/// daily kinds and held in one global bucket otherwise.
///
/// Invariants: no two records in a bucket share an id, and a bucket that
/// becomes empty is removed rather than kept as an empty entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<P: EntityPayload> {
    buckets: BTreeMap<Option<DayKey>, Vec<Record<P>>>,
}

impl<P: EntityPayload> Default for Collection<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: EntityPayload> Collection<P> {
    #[must_use]
    pub fn new() -> Self {
        Self { buckets: BTreeMap::new() }
    }

    fn resolve_bucket(day: Option<DayKey>) -> Result<Option<DayKey>, DomainError> {
        match (P::KIND.bucketing(), day) {
            (Bucketing::Daily, Some(day)) => Ok(Some(day)),
            (Bucketing::Daily, None) => Err(DomainError::Validation(format!(
                "a day key is required for {} records",
                P::KIND.as_str()
            ))),
            (Bucketing::Global, None) => Ok(None),
            (Bucketing::Global, Some(_)) => Err(DomainError::Validation(format!(
                "{} records do not take a day key",
                P::KIND.as_str()
            ))),
        }
    }

    /// Create a record with a fresh id and the given creation timestamp.
    ///
    /// # Errors
    /// Returns [`DomainError::Validation`] when the payload is invalid or the
    /// day key does not fit the kind's bucketing.
    pub fn create_at(
        &mut self,
        day: Option<DayKey>,
        payload: P,
        created_at: OffsetDateTime,
    ) -> Result<Record<P>, DomainError> {
        payload.validate()?;
        let bucket = Self::resolve_bucket(day)?;
        let record = Record { id: RecordId::new(), created_at, payload };
        let records = self.buckets.entry(bucket).or_default();
        records.push(record.clone());
        P::sort_bucket(records);
        Ok(record)
    }

    /// Create a record stamped with the current time.
    ///
    /// # Errors
    /// Same conditions as [`Collection::create_at`].
    pub fn create(&mut self, day: Option<DayKey>, payload: P) -> Result<Record<P>, DomainError> {
        self.create_at(day, payload, OffsetDateTime::now_utc())
    }

    /// Merge `patch` into the record identified by `day` + `id`. The merged
    /// payload is validated before anything is stored, so a patch can never
    /// leave a record in a state a form submit would have rejected.
    ///
    /// # Errors
    /// Returns [`DomainError::Validation`] when the merged payload is invalid
    /// or the day key does not fit the kind's bucketing.
    pub fn update(
        &mut self,
        day: Option<DayKey>,
        id: RecordId,
        patch: P::Patch,
    ) -> Result<MutationOutcome, DomainError> {
        let bucket = Self::resolve_bucket(day)?;
        let Some(records) = self.buckets.get_mut(&bucket) else {
            return Ok(MutationOutcome::NotFound);
        };
        let Some(index) = records.iter().position(|record| record.id == id) else {
            return Ok(MutationOutcome::NotFound);
        };

        let mut merged = records[index].payload.clone();
        merged.apply(patch);
        merged.validate()?;
        records[index].payload = merged;
        P::sort_bucket(records);
        Ok(MutationOutcome::Applied)
    }

    /// Remove the record; the bucket itself is dropped when it empties.
    ///
    /// # Errors
    /// Returns [`DomainError::Validation`] when the day key does not fit the
    /// kind's bucketing.
    pub fn delete(
        &mut self,
        day: Option<DayKey>,
        id: RecordId,
    ) -> Result<MutationOutcome, DomainError> {
        let bucket = Self::resolve_bucket(day)?;
        let Some(records) = self.buckets.get_mut(&bucket) else {
            return Ok(MutationOutcome::NotFound);
        };
        let before = records.len();
        records.retain(|record| record.id != id);
        let outcome = if records.len() == before {
            MutationOutcome::NotFound
        } else {
            MutationOutcome::Applied
        };
        if records.is_empty() {
            self.buckets.remove(&bucket);
        }
        Ok(outcome)
    }

    /// Move a record between day buckets by deleting it and creating a
    /// replacement from `payload`. The replacement gets a new id; consumers
    /// holding the old id see it as deleted. (Carried over from the original
    /// edit-across-days flow.)
    ///
    /// # Errors
    /// Returns [`DomainError::Validation`] when the payload is invalid or the
    /// kind is not day-bucketed.
    pub fn move_day(
        &mut self,
        old_day: DayKey,
        new_day: DayKey,
        id: RecordId,
        payload: P,
    ) -> Result<Record<P>, DomainError> {
        let _ = self.delete(Some(old_day), id)?;
        self.create(Some(new_day), payload)
    }

    #[must_use]
    pub fn get(&self, day: Option<DayKey>, id: RecordId) -> Option<&Record<P>> {
        self.buckets.get(&day)?.iter().find(|record| record.id == id)
    }

    #[must_use]
    pub fn bucket(&self, day: Option<DayKey>) -> &[Record<P>] {
        self.buckets.get(&day).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn contains_day(&self, day: DayKey) -> bool {
        self.buckets.contains_key(&Some(day))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    #[must_use]
    pub fn total_records(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Find which day bucket holds `id`, for edits that may move a record
    /// across days.
    #[must_use]
    pub fn day_of(&self, id: RecordId) -> Option<DayKey> {
        self.buckets.iter().find_map(|(day, records)| {
            if records.iter().any(|record| record.id == id) {
                *day
            } else {
                None
            }
        })
    }

    /// Project the collection through the selector and search query. A record
    /// is kept iff it matches the selector and, when `query` is non-empty,
    /// the query is a case-insensitive substring of one of the kind's
    /// searchable fields. Buckets that end up empty are omitted.
    #[must_use]
    pub fn filtered(&self, selector: &Selector, query: &str) -> FilteredView<P> {
        let needle = query.trim().to_lowercase();
        let mut view = FilteredView::default();
        for (day, records) in &self.buckets {
            let kept: Vec<Record<P>> = records
                .iter()
                .filter(|record| {
                    record.payload.matches_selector(selector)
                        && (needle.is_empty() || record.payload.matches_query(&needle))
                })
                .cloned()
                .collect();
            if !kept.is_empty() {
                view.buckets.push(DayView { day: *day, records: kept });
            }
        }
        view
    }

    /// Serialize to the wire shape: an object keyed by day for bucketed
    /// kinds, a bare array for the global kind.
    ///
    /// # Errors
    /// Returns [`DomainError::Wire`] when serialization fails.
    pub fn to_wire_value(&self) -> Result<serde_json::Value, DomainError> {
        match P::KIND.bucketing() {
            Bucketing::Daily => {
                let mut map = serde_json::Map::new();
                for (day, records) in &self.buckets {
                    let Some(day) = day else {
                        return Err(DomainError::Wire(format!(
                            "{} collection holds records outside a day bucket",
                            P::KIND.as_str()
                        )));
                    };
                    let value = serde_json::to_value(records)
                        .map_err(|err| DomainError::Wire(err.to_string()))?;
                    map.insert(day.to_string(), value);
                }
                Ok(serde_json::Value::Object(map))
            }
            Bucketing::Global => {
                let records = self.bucket(None);
                serde_json::to_value(records).map_err(|err| DomainError::Wire(err.to_string()))
            }
        }
    }

    /// Rebuild a collection from its wire shape. Empty buckets in the input
    /// are dropped to restore the no-empty-bucket invariant.
    ///
    /// # Errors
    /// Returns [`DomainError::Wire`] when the value does not have the
    /// expected shape for the kind.
    pub fn from_wire_value(value: serde_json::Value) -> Result<Self, DomainError> {
        let mut collection = Self::new();
        match (P::KIND.bucketing(), value) {
            (Bucketing::Daily, serde_json::Value::Object(map)) => {
                for (key, bucket_value) in map {
                    let day: DayKey = key
                        .parse()
                        .map_err(|err: DomainError| DomainError::Wire(err.to_string()))?;
                    let records: Vec<Record<P>> = serde_json::from_value(bucket_value)
                        .map_err(|err| DomainError::Wire(err.to_string()))?;
                    if !records.is_empty() {
                        collection.buckets.insert(Some(day), records);
                    }
                }
                Ok(collection)
            }
            (Bucketing::Global, value @ serde_json::Value::Array(_)) => {
                let records: Vec<Record<P>> = serde_json::from_value(value)
                    .map_err(|err| DomainError::Wire(err.to_string()))?;
                if !records.is_empty() {
                    collection.buckets.insert(None, records);
                }
                Ok(collection)
            }
            (Bucketing::Daily, other) => Err(DomainError::Wire(format!(
                "expected a day-keyed object for {}, got {other}",
                P::KIND.collection_name()
            ))),
            (Bucketing::Global, other) => Err(DomainError::Wire(format!(
                "expected an array for {}, got {other}",
                P::KIND.collection_name()
            ))),
        }
    }
}

impl Collection<TaskPayload> {
    /// Flip a task's completion flag.
    ///
    /// # Errors
    /// Returns [`DomainError::Validation`] only for a malformed day key
    /// (never for a missing record).
    pub fn toggle(&mut self, day: DayKey, id: RecordId) -> Result<MutationOutcome, DomainError> {
        let Some(records) = self.buckets.get_mut(&Some(day)) else {
            return Ok(MutationOutcome::NotFound);
        };
        match records.iter_mut().find(|record| record.id == id) {
            Some(record) => {
                record.payload.completed = !record.payload.completed;
                Ok(MutationOutcome::Applied)
            }
            None => Ok(MutationOutcome::NotFound),
        }
    }
}
