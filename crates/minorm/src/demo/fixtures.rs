//! Schema and seed rows of the demo catalogue.

use minorm_core::{Connection, Cx, Error, Outcome};
use minorm_schema::SchemaBuilder;

use super::{Course, Passport, Review, Student};

const SEED: &[&str] = &[
    r#"INSERT INTO "course" ("id", "name") VALUES
        (10001, 'JPA Demo'),
        (10002, 'Spring in 50 Steps'),
        (10003, 'Spring Boot in 100 Steps')"#,
    r#"INSERT INTO "passport" ("id", "number") VALUES
        (40001, 'E123456'),
        (40002, 'N123457'),
        (40003, 'L123890')"#,
    r#"INSERT INTO "student" ("id", "name", "passport_id") VALUES
        (20001, 'Ranga', 40001),
        (20002, 'Adam', 40002),
        (20003, 'Jane', 40003)"#,
    r#"INSERT INTO "review" ("id", "rating", "description", "course_id") VALUES
        (50001, 'FIVE', 'Great Course', 10001),
        (50002, 'FOUR', 'Wonderful Course', 10001),
        (50003, 'FIVE', 'Awesome Course', 10003)"#,
    r#"INSERT INTO "student_course" ("student_id", "course_id") VALUES
        (20001, 10001),
        (20002, 10001),
        (20003, 10001),
        (20001, 10003)"#,
];

/// Tables of the demo domain, referenced tables first.
pub fn schema() -> SchemaBuilder {
    SchemaBuilder::new()
        .create_table::<Course>()
        .create_table::<Passport>()
        .create_table::<Student>()
        .create_link_tables::<Student>()
        .create_table::<Review>()
}

/// Create the demo tables on `conn` and insert the fixture rows.
#[tracing::instrument(level = "debug", skip(cx, conn))]
pub async fn seed<C: Connection>(cx: &Cx, conn: &C) -> Outcome<(), Error> {
    let builder = SEED.iter().fold(schema(), |builder, sql| builder.raw(*sql));
    builder.apply(cx, conn).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creates_link_table_after_both_sides() {
        let statements = schema().build();
        let position = |needle: &str| {
            statements
                .iter()
                .position(|s| s.contains(needle))
                .unwrap_or_else(|| panic!("no statement for {needle}"))
        };
        let course = position(r#"EXISTS "course""#);
        let student = position(r#"EXISTS "student" "#);
        let link = position(r#"EXISTS "student_course""#);
        assert!(course < link);
        assert!(student < link);
        assert_eq!(statements.len(), 5);
        assert!(statements[position(r#"EXISTS "review""#)].contains(
            r#"FOREIGN KEY ("course_id") REFERENCES "course"("id")"#
        ));
    }
}
