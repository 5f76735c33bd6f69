//! Course catalogue demo domain.
//!
//! Four entities exercise every relationship kind:
//!
//! | entity     | relationship | kind         | owning side |
//! |------------|--------------|--------------|-------------|
//! | `Course`   | `students`   | many-to-many | no (`Student.courses`) |
//! | `Course`   | `reviews`    | one-to-many  | no (`Review.course`) |
//! | `Student`  | `passport`   | one-to-one   | yes, `passport_id` column |
//! | `Student`  | `courses`    | many-to-many | yes, `student_course` link table |
//! | `Passport` | `student`    | one-to-one   | no (`Student.passport`) |
//! | `Review`   | `course`     | many-to-one  | yes, `course_id` column |
//!
//! Two-sided relationships are kept symmetric in memory by helpers such as
//! [`Student::enroll`] and [`Course::add_review`]; only the owning side is
//! written to storage.

mod course;
mod fixtures;
mod passport;
mod repository;
mod review;
mod student;

pub use course::Course;
pub use fixtures::{schema, seed};
pub use passport::Passport;
pub use repository::CourseRepository;
pub use review::{Review, ReviewRating};
pub use student::Student;
