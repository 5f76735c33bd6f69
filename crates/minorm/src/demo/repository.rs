//! Data access for courses.

use minorm_core::{Connection, Cx, Error, Outcome, Shared, try_outcome};
use minorm_session::Session;

use super::{Course, Review, Student};

/// Course data access over one session.
///
/// Every write method commits before returning, so each call is its own
/// unit of work. Reads go through the session's identity map; repeated
/// lookups of one course return the same instance until the repository is
/// closed.
pub struct CourseRepository<C: Connection> {
    session: Session<C>,
}

impl<C: Connection> CourseRepository<C> {
    pub fn new(session: Session<C>) -> Self {
        Self { session }
    }

    /// The underlying session.
    pub fn session(&mut self) -> &mut Session<C> {
        &mut self.session
    }

    /// End the repository's session and hand back the connection.
    pub async fn close(self, cx: &Cx) -> Outcome<C, Error> {
        self.session.close(cx).await
    }

    /// The course with identity `id`, if any.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn find_by_id(&mut self, cx: &Cx, id: i64) -> Outcome<Option<Shared<Course>>, Error> {
        self.session.get::<Course>(cx, id).await
    }

    /// Write `course`: an INSERT when it has no identity, otherwise an
    /// UPDATE of the fields changed since it was loaded.
    #[tracing::instrument(level = "debug", skip(self, cx, course))]
    pub async fn save(&mut self, cx: &Cx, course: &Shared<Course>) -> Outcome<(), Error> {
        if let Err(e) = self.session.save(course) {
            return Outcome::Err(e);
        }
        self.session.commit(cx).await
    }

    /// Delete the course with identity `id`. Unknown identities are ignored.
    ///
    /// Enrolments of the course are removed with it. A course that still has
    /// reviews cannot be deleted: the commit fails with a constraint
    /// violation and the transaction is rolled back.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn delete_by_id(&mut self, cx: &Cx, id: i64) -> Outcome<(), Error> {
        let Some(course) = try_outcome!(self.find_by_id(cx, id).await) else {
            tracing::debug!(id, "No course to delete");
            return Outcome::Ok(());
        };
        self.session.delete(&course);
        self.session.commit(cx).await
    }

    /// Walk through the managed, flushed and detached states of two new
    /// courses and return them.
    ///
    /// - the first course is persisted, flushed and renamed; the rename is
    ///   written on commit.
    /// - the second course is persisted and flushed, then expunged; a later
    ///   rename stays in memory only.
    /// - the first course is renamed again and refreshed, which discards the
    ///   second rename.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn play_with_entity_manager(
        &mut self,
        cx: &Cx,
    ) -> Outcome<(Shared<Course>, Shared<Course>), Error> {
        let web = self.session.persist(Course::new("Web Services in 100 Steps"));
        try_outcome!(self.session.flush(cx).await);
        web.write().set_name("Web Services in 100 Steps - Updated");

        let angular = self.session.persist(Course::new("AngularJS in 100 Steps"));
        try_outcome!(self.session.flush(cx).await);

        self.session.expunge(&angular);
        angular.write().set_name("AngularJS in 100 Steps - Updated");

        try_outcome!(self.session.flush(cx).await);
        web.write().set_name("Web Services in 100 Steps - Refreshed");
        try_outcome!(self.session.refresh(cx, &web).await);

        tracing::info!(
            web = web.read().name(),
            angular = angular.read().name(),
            "Entity manager walk-through done"
        );
        try_outcome!(self.session.commit(cx).await);
        Outcome::Ok((web, angular))
    }

    /// Attach `reviews` to the course with identity `course_id` and store
    /// them. Returns the stored reviews; `None` when the course does not
    /// exist.
    #[tracing::instrument(level = "debug", skip(self, cx, reviews))]
    pub async fn add_reviews_for_course(
        &mut self,
        cx: &Cx,
        course_id: i64,
        reviews: Vec<Review>,
    ) -> Outcome<Option<Vec<Shared<Review>>>, Error> {
        let Some(course) = try_outcome!(self.find_by_id(cx, course_id).await) else {
            return Outcome::Ok(None);
        };

        let existing = try_outcome!(self.session.fetch_many(cx, &course, &Course::REVIEWS).await);
        tracing::debug!(course_id, existing = existing.len(), "Adding reviews");

        let stored: Vec<_> = reviews
            .into_iter()
            .map(|review| {
                let review = self.session.persist(review);
                Course::add_review(&course, &review);
                review
            })
            .collect();

        try_outcome!(self.session.commit(cx).await);
        Outcome::Ok(Some(stored))
    }

    /// Store a new student enrolled in a new course.
    #[tracing::instrument(level = "debug", skip(self, cx, student, course))]
    pub async fn insert_student_and_course(
        &mut self,
        cx: &Cx,
        student: Student,
        course: Course,
    ) -> Outcome<(Shared<Student>, Shared<Course>), Error> {
        let student = self.session.persist(student);
        let course = self.session.persist(course);
        Student::enroll(&student, &course);
        try_outcome!(self.session.commit(cx).await);
        Outcome::Ok((student, course))
    }
}
