//! Criteria queries against the seeded demo database.

mod common;

use std::sync::Arc;

use asupersync::runtime::RuntimeBuilder;
use common::{expect_err, init_tracing, seeded, unwrap_outcome};
use minorm::demo::{Course, Review, ReviewRating, Student};
use minorm::prelude::*;

fn ids(courses: &[Shared<Course>]) -> Vec<i64> {
    courses.iter().filter_map(|c| c.read().id()).collect()
}

#[test]
fn all_courses() {
    init_tracing();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let mut session = Session::new(seeded(&cx).await);
        let query = CriteriaQuery::<Course>::from();
        let root = query.root();
        let query = query.order_by(root.get("id").asc());

        let courses = unwrap_outcome(session.list(&cx, &query).await);
        assert_eq!(ids(&courses), vec![10001, 10002, 10003]);

        // Query results land in the identity map
        let cached = unwrap_outcome(session.get::<Course>(&cx, 10002).await).unwrap();
        assert!(Arc::ptr_eq(&courses[1], &cached));
    });
}

#[test]
fn all_courses_having_100_steps() {
    init_tracing();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let mut session = Session::new(seeded(&cx).await);
        let query = CriteriaQuery::<Course>::from();
        let name = query.root().get("name");
        let query = query.filter(name.like("%100 Steps"));

        let courses = unwrap_outcome(session.list(&cx, &query).await);
        assert_eq!(ids(&courses), vec![10003]);
        assert_eq!(courses[0].read().name(), "Spring Boot in 100 Steps");

        let query = CriteriaQuery::<Course>::from();
        let root = query.root();
        let query = query
            .filter(root.get("name").not_like("%Steps"))
            .filter(root.get("id").lt(10002_i64));
        let courses = unwrap_outcome(session.list(&cx, &query).await);
        assert_eq!(ids(&courses), vec![10001]);
    });
}

#[test]
fn all_courses_without_students() {
    init_tracing();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let mut session = Session::new(seeded(&cx).await);
        let query = CriteriaQuery::<Course>::from();
        let students = query.root().get("students");
        let query = query.filter(students.is_empty());

        let courses = unwrap_outcome(session.list(&cx, &query).await);
        assert_eq!(ids(&courses), vec![10002]);

        let student = unwrap_outcome(session.get::<Student>(&cx, 20002).await).unwrap();
        Student::enroll(&student, &courses[0]);

        // Pending enrolments are not visible to queries before commit
        let unflushed = unwrap_outcome(session.list(&cx, &query).await);
        assert_eq!(ids(&unflushed), vec![10002]);

        unwrap_outcome(session.commit(&cx).await);
        let after = unwrap_outcome(session.list(&cx, &query).await);
        assert!(after.is_empty());
    });
}

#[test]
fn courses_with_reviews() {
    init_tracing();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let mut session = Session::new(seeded(&cx).await);
        let query = CriteriaQuery::<Course>::from();
        let root = query.root();
        let query = query
            .filter(root.get("reviews").is_not_empty())
            .order_by(root.get("id").desc());

        let courses = unwrap_outcome(session.list(&cx, &query).await);
        assert_eq!(ids(&courses), vec![10003, 10001]);
    });
}

#[test]
fn join() {
    init_tracing();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let mut session = Session::new(seeded(&cx).await);
        let mut query = CriteriaQuery::<Course>::from();
        let students = query.join::<Student>("students", JoinKind::Inner);
        let root = query.root();
        let query = query
            .order_by(root.get("id").asc())
            .order_by(students.get("id").asc());

        let pairs = unwrap_outcome(session.tuples(&cx, &query, &students).await);
        let keys: Vec<_> = pairs
            .iter()
            .map(|(c, s)| (c.read().id(), s.as_ref().and_then(|s| s.read().id())))
            .collect();
        assert_eq!(
            keys,
            vec![
                (Some(10001), Some(20001)),
                (Some(10001), Some(20002)),
                (Some(10001), Some(20003)),
                (Some(10003), Some(20001)),
            ]
        );

        // Repeated roots and joined entities are the same instances
        assert!(Arc::ptr_eq(&pairs[0].0, &pairs[2].0));
        let first = pairs[0].1.as_ref().unwrap();
        let last = pairs[3].1.as_ref().unwrap();
        assert!(Arc::ptr_eq(first, last));
    });
}

#[test]
fn left_join() {
    init_tracing();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let mut session = Session::new(seeded(&cx).await);
        let mut query = CriteriaQuery::<Course>::from();
        let students = query.join::<Student>("students", JoinKind::LeftOuter);
        let root = query.root();
        let query = query
            .order_by(root.get("id").asc())
            .order_by(students.get("id").asc());

        let pairs = unwrap_outcome(session.tuples(&cx, &query, &students).await);
        assert_eq!(pairs.len(), 5);

        let lonely: Vec<_> = pairs
            .iter()
            .filter(|(c, _)| c.read().id() == Some(10002))
            .collect();
        assert_eq!(lonely.len(), 1);
        assert!(lonely[0].1.is_none());
    });
}

#[test]
fn join_with_predicate_on_joined_side() {
    init_tracing();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let mut session = Session::new(seeded(&cx).await);
        let mut query = CriteriaQuery::<Course>::from();
        let students = query.join::<Student>("students", JoinKind::Inner);
        let query = query.filter(students.get("name").eq("Adam"));

        let pairs = unwrap_outcome(session.tuples(&cx, &query, &students).await);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.read().id(), Some(10001));
        assert_eq!(
            pairs[0].1.as_ref().map(|s| s.read().name().to_string()),
            Some("Adam".to_string())
        );
    });
}

#[test]
fn reviews_by_course_and_rating() {
    init_tracing();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let mut session = Session::new(seeded(&cx).await);

        // A many-to-one path compares the foreign key
        let query = CriteriaQuery::<Review>::from();
        let root = query.root();
        let query = query
            .filter(root.get("course").eq(10001_i64))
            .filter(root.get("rating").eq(ReviewRating::Five.sql_name()));
        let reviews = unwrap_outcome(session.list(&cx, &query).await);
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].read().id(), Some(50001));

        let mut query = CriteriaQuery::<Review>::from();
        let course = query.join::<Course>("course", JoinKind::Inner);
        let root = query.root();
        let query = query
            .filter(course.get("name").like("Spring%"))
            .order_by(root.get("id").asc())
            .limit(1);
        let pairs = unwrap_outcome(session.tuples(&cx, &query, &course).await);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.read().description(), Some("Awesome Course"));
        assert_eq!(
            pairs[0].1.as_ref().and_then(|c| c.read().id()),
            Some(10003)
        );
    });
}

#[test]
fn query_keeps_unflushed_changes_of_cached_instances() {
    init_tracing();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let mut session = Session::new(seeded(&cx).await);
        let course = unwrap_outcome(session.get::<Course>(&cx, 10001).await).unwrap();
        course.write().set_name("JPA Demo - Draft");

        let query = CriteriaQuery::<Course>::from();
        let name = query.root().get("name");
        let query = query.filter(name.eq("JPA Demo"));
        let courses = unwrap_outcome(session.list(&cx, &query).await);

        // Matched on the stored name, returned as the cached instance
        assert_eq!(courses.len(), 1);
        assert!(Arc::ptr_eq(&courses[0], &course));
        assert_eq!(courses[0].read().name(), "JPA Demo - Draft");
    });
}

#[test]
fn unknown_attribute_is_rejected() {
    init_tracing();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let mut session = Session::new(seeded(&cx).await);
        let query = CriteriaQuery::<Course>::from();
        let title = query.root().get("title");
        let query = query.filter(title.eq("JPA Demo"));

        match expect_err(session.list(&cx, &query).await) {
            Error::UnknownAttribute { model, attribute } => {
                assert_eq!(model, "course");
                assert_eq!(attribute, "title");
            }
            e => panic!("unexpected error: {e}"),
        }
    });
}
