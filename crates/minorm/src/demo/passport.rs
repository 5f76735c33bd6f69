use std::fmt;

use minorm_core::{
    ChangeSet, FieldInfo, Lazy, Model, RelationshipInfo, RelationshipKind, Result, Row,
    SessionBinding, SqlType, ToOne, Value,
};

use super::student::Student;

static FIELDS: [FieldInfo; 2] = [
    FieldInfo::id(),
    FieldInfo::new("number", "number", SqlType::Text),
];

const NUMBER: usize = 1;

// Mapped by `Student.passport`; no column on this side.
const STUDENT_REL: RelationshipInfo =
    RelationshipInfo::new("student", "student", RelationshipKind::OneToOne)
        .remote_key("passport_id")
        .back_populates("passport")
        .inverse();

static RELATIONSHIPS: [RelationshipInfo; 1] = [STUDENT_REL];

fn student_field(passport: &mut Passport) -> &mut Lazy<Student> {
    &mut passport.student
}

/// A passport, held by at most one student.
pub struct Passport {
    id: Option<i64>,
    number: String,
    student: Lazy<Student>,
    changes: ChangeSet,
}

impl Passport {
    /// The student holding the passport.
    pub const STUDENT: ToOne<Passport, Student> = ToOne::new(STUDENT_REL, student_field);

    pub fn new(number: impl Into<String>) -> Self {
        Self {
            id: None,
            number: number.into(),
            student: Lazy::empty(),
            changes: ChangeSet::empty(FIELDS.len()),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn set_number(&mut self, number: impl Into<String>) {
        self.number = number.into();
        self.changes.mark(NUMBER);
    }

    pub fn student(&self) -> &Lazy<Student> {
        &self.student
    }

    pub(crate) fn student_mut(&mut self) -> &mut Lazy<Student> {
        &mut self.student
    }
}

impl Model for Passport {
    const TABLE_NAME: &'static str = "passport";

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
        vec![("id", self.id.into()), ("number", self.number.clone().into())]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_as("id")?,
            number: row.get_as("number")?,
            student: Lazy::unloaded(None),
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
        self.student.bind(binding);
    }
}

impl fmt::Debug for Passport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Passport")
            .field("id", &self.id)
            .field("number", &self.number)
            .field("student", &self.student)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Passport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passport[{}]", self.number)
    }
}
