use std::fmt;

use minorm_core::{
    ChangeSet, FieldInfo, LazyMany, LinkTableInfo, Model, RelationshipInfo, RelationshipKind,
    Result, Row, SessionBinding, Shared, SqlType, ToMany, Value, WritePhase,
};

use super::review::Review;
use super::student::Student;

static FIELDS: [FieldInfo; 2] = [
    FieldInfo::id(),
    FieldInfo::new("name", "name", SqlType::Text),
];

const NAME: usize = 1;

const STUDENTS_REL: RelationshipInfo =
    RelationshipInfo::new("students", "student", RelationshipKind::ManyToMany)
        .link_table(LinkTableInfo::new("student_course", "course_id", "student_id"))
        .back_populates("courses")
        .inverse();

const REVIEWS_REL: RelationshipInfo =
    RelationshipInfo::new("reviews", "review", RelationshipKind::OneToMany)
        .remote_key("course_id")
        .back_populates("course")
        .inverse();

static RELATIONSHIPS: [RelationshipInfo; 2] = [STUDENTS_REL, REVIEWS_REL];

fn students_field(course: &mut Course) -> &mut LazyMany<Student> {
    &mut course.students
}

fn reviews_field(course: &mut Course) -> &mut LazyMany<Review> {
    &mut course.reviews
}

/// A course in the catalogue.
pub struct Course {
    id: Option<i64>,
    name: String,
    students: LazyMany<Student>,
    reviews: LazyMany<Review>,
    changes: ChangeSet,
}

impl Course {
    /// Students attending the course.
    pub const STUDENTS: ToMany<Course, Student> = ToMany::new(STUDENTS_REL, students_field);

    /// Reviews written for the course.
    pub const REVIEWS: ToMany<Course, Review> = ToMany::new(REVIEWS_REL, reviews_field);

    /// A transient course.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            students: LazyMany::empty(),
            reviews: LazyMany::empty(),
            changes: ChangeSet::empty(FIELDS.len()),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.changes.mark(NAME);
    }

    pub fn students(&self) -> &LazyMany<Student> {
        &self.students
    }

    pub fn reviews(&self) -> &LazyMany<Review> {
        &self.reviews
    }

    /// Attach `review` to `course` on both sides. The review's `course_id`
    /// is what gets written.
    pub fn add_review(course: &Shared<Course>, review: &Shared<Review>) {
        course.write().reviews.add(review);
        review.write().set_course(Some(course));
    }

    /// Detach `review` from `course` on both sides.
    pub fn remove_review(course: &Shared<Course>, review: &Shared<Review>) {
        course.write().reviews.remove(review);
        review.write().set_course(None);
    }

    pub(crate) fn students_mut(&mut self) -> &mut LazyMany<Student> {
        &mut self.students
    }
}

impl Model for Course {
    const TABLE_NAME: &'static str = "course";

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
        vec![("id", self.id.into()), ("name", self.name.clone().into())]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_as("id")?,
            name: row.get_as("name")?,
            students: LazyMany::unloaded(),
            reviews: LazyMany::unloaded(),
            changes: ChangeSet::empty(FIELDS.len()),
        })
    }

    fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    fn changes_mut(&mut self) -> &mut ChangeSet {
        &mut self.changes
    }

    fn bind_session(&mut self, binding: &SessionBinding) {
        self.students.bind(binding);
        self.reviews.bind(binding);
    }

    // Inverse sides owe no link rows; queued members still end with the
    // transaction.
    fn settle_links(&mut self, phase: WritePhase) {
        self.students.settle(phase);
        self.reviews.settle(phase);
    }
}

impl fmt::Debug for Course {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Course")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Course {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Course[{}]", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::ReviewRating;
    use minorm_core::shared;

    #[test]
    fn test_set_name_records_change() {
        let mut course = Course::new("JPA Demo");
        assert!(!course.changes().any());
        course.set_name("JPA in 50 Steps");
        assert_eq!(course.changes().iter().collect::<Vec<_>>(), vec![NAME]);
        assert_eq!(course.to_string(), "Course[JPA in 50 Steps]");
    }

    #[test]
    fn test_add_review_links_both_sides() {
        let course = shared(Course::new("JPA Demo"));
        let review = shared(Review::new(ReviewRating::Five, "Great Course"));

        Course::add_review(&course, &review);
        assert!(course.read().reviews().contains(&review));
        assert!(review.read().course().get().flatten().is_some());

        Course::remove_review(&course, &review);
        assert!(!course.read().reviews().contains(&review));
        assert_eq!(review.read().course().get().map(|target| target.is_none()), Some(true));
    }

    #[test]
    fn test_committed_enrolment_is_not_merged_again() {
        let row = Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::BigInt(10002), "Spring in 50 Steps".into()],
        );
        let course = shared(Course::from_row(&row).unwrap());
        let student = shared(Student::new("Mike"));

        Student::enroll(&student, &course);
        assert!(course.read().pending_links().is_empty());

        course.write().settle_links(WritePhase::Flushed);
        course.write().settle_links(WritePhase::Committed);

        // A later fetch that no longer finds the link row is taken as is
        course.write().students_mut().fill(Vec::new());
        assert!(course.read().students().get().unwrap().is_empty());
    }
}
