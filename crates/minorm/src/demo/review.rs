use std::fmt;

use minorm_core::{
    ChangeSet, Error, FieldInfo, Lazy, Model, RelationshipInfo, RelationshipKind, Result, Row,
    SessionBinding, Shared, SqlEnum, SqlType, ToOne, Value,
};
use strum::{Display, EnumString, IntoStaticStr, VariantNames};

use super::course::Course;

/// Star rating of a review, stored by name (`"ONE"` .. `"FIVE"`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, VariantNames,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewRating {
    One,
    Two,
    Three,
    Four,
    Five,
}

impl SqlEnum for ReviewRating {
    const VARIANTS: &'static [&'static str] = <Self as VariantNames>::VARIANTS;

    fn sql_name(&self) -> &'static str {
        (*self).into()
    }

    fn from_sql_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }
}

static FIELDS: [FieldInfo; 4] = [
    FieldInfo::id(),
    FieldInfo::new("rating", "rating", SqlType::Text),
    FieldInfo::new("description", "description", SqlType::Text).nullable(true),
    FieldInfo::new("course_id", "course_id", SqlType::BigInt)
        .nullable(true)
        .foreign_key("course", "id"),
];

const RATING: usize = 1;
const DESCRIPTION: usize = 2;
const COURSE_ID: usize = 3;

const COURSE_REL: RelationshipInfo =
    RelationshipInfo::new("course", "course", RelationshipKind::ManyToOne)
        .local_key("course_id")
        .back_populates("reviews");

static RELATIONSHIPS: [RelationshipInfo; 1] = [COURSE_REL];

fn course_field(review: &mut Review) -> &mut Lazy<Course> {
    &mut review.course
}

/// A review of a course.
pub struct Review {
    id: Option<i64>,
    rating: ReviewRating,
    description: Option<String>,
    course: Lazy<Course>,
    changes: ChangeSet,
}

impl Review {
    /// The reviewed course.
    pub const COURSE: ToOne<Review, Course> = ToOne::new(COURSE_REL, course_field);

    /// A transient review, not yet attached to a course.
    pub fn new(rating: ReviewRating, description: impl Into<String>) -> Self {
        Self {
            id: None,
            rating,
            description: Some(description.into()),
            course: Lazy::empty(),
            changes: ChangeSet::empty(FIELDS.len()),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn rating(&self) -> ReviewRating {
        self.rating
    }

    pub fn set_rating(&mut self, rating: ReviewRating) {
        self.rating = rating;
        self.changes.mark(RATING);
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
        self.changes.mark(DESCRIPTION);
    }

    pub fn course(&self) -> &Lazy<Course> {
        &self.course
    }

    /// Point the review at `course`. Prefer [`Course::add_review`], which
    /// also updates the course's collection.
    pub fn set_course(&mut self, course: Option<&Shared<Course>>) {
        self.course.set(course);
        self.changes.mark(COURSE_ID);
    }
}

impl Model for Review {
    const TABLE_NAME: &'static str = "review";

    fn fields() -> &'static [FieldInfo] {
        &FIELDS
    }

    fn relationships() -> &'static [RelationshipInfo] {
        &RELATIONSHIPS
    }

    fn primary_key(&self) -> Option<i64> {
        self.id
    }

    fn assign_primary_key(&mut self, id: Option<i64>) {
        self.id = id;
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("rating", self.rating.to_value()),
            ("description", self.description.clone().into()),
            ("course_id", self.course.foreign_key().into()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        let rating = row
            .get_named("rating")
            .ok_or_else(|| Error::ColumnNotFound("rating".to_string()))?;
        Ok(Self {
            id: row.get_as("id")?,
            rating: ReviewRating::from_column("rating", rating)?,
            description: row.get_as("description")?,
            course: Lazy::unloaded(row.get_as("course_id")?),
            changes: ChangeSet::empty(FIELDS.len()),
        })
    }

    fn unsaved_reference(&self) -> Option<&'static str> {
        self.course.targets_transient().then_some(COURSE_REL.name)
    }

    fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    fn changes_mut(&mut self) -> &mut ChangeSet {
        &mut self.changes
    }

    fn bind_session(&mut self, binding: &SessionBinding) {
        self.course.bind(binding);
    }
}

impl fmt::Debug for Review {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Review")
            .field("id", &self.id)
            .field("rating", &self.rating)
            .field("description", &self.description)
            .field("course", &self.course)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Review {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Review[{} {}]",
            self.rating,
            self.description.as_deref().unwrap_or("")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_persists_by_name() {
        assert_eq!(ReviewRating::Five.sql_name(), "FIVE");
        assert_eq!(
            ReviewRating::Four.to_value(),
            Value::Text("FOUR".to_string())
        );
        assert_eq!(
            <ReviewRating as SqlEnum>::VARIANTS,
            &["ONE", "TWO", "THREE", "FOUR", "FIVE"]
        );
        assert_eq!(ReviewRating::from_sql_name("THREE"), Some(ReviewRating::Three));
        assert_eq!(ReviewRating::from_sql_name("3"), None);
    }

    #[test]
    fn test_from_row_rejects_unknown_rating() {
        let row = Row::new(
            vec![
                "id".into(),
                "rating".into(),
                "description".into(),
                "course_id".into(),
            ],
            vec![
                Value::BigInt(50001),
                Value::Text("SIX".into()),
                Value::Null,
                Value::BigInt(10001),
            ],
        );
        assert!(Review::from_row(&row).is_err());
    }

    #[test]
    fn test_from_row_keeps_foreign_key() {
        let row = Row::new(
            vec![
                "id".into(),
                "rating".into(),
                "description".into(),
                "course_id".into(),
            ],
            vec![
                Value::BigInt(50001),
                Value::Text("FIVE".into()),
                Value::Text("Great Course".into()),
                Value::BigInt(10001),
            ],
        );
        let review = Review::from_row(&row).unwrap();
        assert_eq!(review.rating(), ReviewRating::Five);
        assert_eq!(review.description(), Some("Great Course"));
        assert!(!review.course().is_loaded());
        assert_eq!(review.course().foreign_key(), Some(10001));
        assert_eq!(review.to_string(), "Review[FIVE Great Course]");
    }
}
