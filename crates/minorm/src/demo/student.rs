use std::fmt;

use minorm_core::{
    ChangeSet, FieldInfo, Lazy, LazyMany, LinkTableInfo, Model, PendingLink, RelationshipInfo,
    RelationshipKind, Result, Row, SessionBinding, Shared, SqlType, ToMany, ToOne, Value, WritePhase,
};

use super::course::Course;
use super::passport::Passport;

static FIELDS: [FieldInfo; 3] = [
    FieldInfo::id(),
    FieldInfo::new("name", "name", SqlType::Text),
    FieldInfo::new("passport_id", "passport_id", SqlType::BigInt)
        .nullable(true)
        .unique(true)
        .foreign_key("passport", "id"),
];

const NAME: usize = 1;
const PASSPORT_ID: usize = 2;

const PASSPORT_REL: RelationshipInfo =
    RelationshipInfo::new("passport", "passport", RelationshipKind::OneToOne)
        .local_key("passport_id")
        .back_populates("student");

const COURSES_REL: RelationshipInfo =
    RelationshipInfo::new("courses", "course", RelationshipKind::ManyToMany)
        .link_table(LinkTableInfo::new("student_course", "student_id", "course_id"))
        .back_populates("students");

static RELATIONSHIPS: [RelationshipInfo; 2] = [PASSPORT_REL, COURSES_REL];

fn passport_field(student: &mut Student) -> &mut Lazy<Passport> {
    &mut student.passport
}

fn courses_field(student: &mut Student) -> &mut LazyMany<Course> {
    &mut student.courses
}

/// A student. Owns both the passport link and the course enrolments.
pub struct Student {
    id: Option<i64>,
    name: String,
    passport: Lazy<Passport>,
    courses: LazyMany<Course>,
    changes: ChangeSet,
}

impl Student {
    /// The student's passport.
    pub const PASSPORT: ToOne<Student, Passport> = ToOne::new(PASSPORT_REL, passport_field);

    /// Courses the student attends.
    pub const COURSES: ToMany<Student, Course> = ToMany::new(COURSES_REL, courses_field);

    /// A transient student.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            passport: Lazy::empty(),
            courses: LazyMany::empty(),
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

    pub fn passport(&self) -> &Lazy<Passport> {
        &self.passport
    }

    /// Point the student at `passport`. Prefer [`Student::assign_passport`],
    /// which also updates the passport's side.
    pub fn set_passport(&mut self, passport: Option<&Shared<Passport>>) {
        self.passport.set(passport);
        self.changes.mark(PASSPORT_ID);
    }

    pub fn courses(&self) -> &LazyMany<Course> {
        &self.courses
    }

    /// Give `student` the passport `passport` on both sides.
    ///
    /// A new passport may be persisted after the student; the student's key
    /// is then written once the passport has its identity.
    pub fn assign_passport(student: &Shared<Student>, passport: &Shared<Passport>) {
        student.write().set_passport(Some(passport));
        passport.write().student_mut().set(Some(student));
    }

    /// Enrol `student` in `course` on both sides. The link row is written
    /// from the student's side on the next flush.
    pub fn enroll(student: &Shared<Student>, course: &Shared<Course>) {
        student.write().courses.add(course);
        course.write().students_mut().add(student);
    }

    /// Remove `student` from `course` on both sides.
    pub fn withdraw(student: &Shared<Student>, course: &Shared<Course>) {
        student.write().courses.remove(course);
        course.write().students_mut().remove(student);
    }
}

impl Model for Student {
    const TABLE_NAME: &'static str = "student";

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
            ("name", self.name.clone().into()),
            ("passport_id", self.passport.foreign_key().into()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_as("id")?,
            name: row.get_as("name")?,
            passport: Lazy::unloaded(row.get_as("passport_id")?),
            courses: LazyMany::unloaded(),
            changes: ChangeSet::empty(FIELDS.len()),
        })
    }

    fn unsaved_reference(&self) -> Option<&'static str> {
        self.passport.targets_transient().then_some(PASSPORT_REL.name)
    }

    fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    fn changes_mut(&mut self) -> &mut ChangeSet {
        &mut self.changes
    }

    fn bind_session(&mut self, binding: &SessionBinding) {
        self.passport.bind(binding);
        self.courses.bind(binding);
    }

    fn pending_links(&self) -> Vec<PendingLink> {
        self.courses.pending_links(&COURSES_REL)
    }

    fn settle_links(&mut self, phase: WritePhase) {
        self.courses.settle(phase);
    }
}

impl fmt::Debug for Student {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Student")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("passport", &self.passport)
            .field("courses", &self.courses)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Student {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Student[{}]", self.name)
    }
}
