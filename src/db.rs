use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let users = vec![
        (
            Uuid::parse_str("7f9c3a51-4c2e-4c8a-9f0b-6a1d2e3f4a5b")?,
            "dean.okafor@stateu.edu",
            "Dean Okafor",
            "admin",
            None,
        ),
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "avery.lee@stateu.edu",
            "Avery Lee",
            "teacher",
            Some("Computer Science"),
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "jules.moreno@stateu.edu",
            "Jules Moreno",
            "teacher",
            Some("Mathematics"),
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "kiara.patel@stateu.edu",
            "Kiara Patel",
            "student",
            Some("Computer Science"),
        ),
        (
            Uuid::parse_str("b1b2c3d4-e5f6-4a1b-8c2d-9e0f1a2b3c4d")?,
            "sam.iversen@stateu.edu",
            "Sam Iversen",
            "student",
            Some("Computer Science"),
        ),
        (
            Uuid::parse_str("9a8b7c6d-5e4f-4d3c-8b2a-1f0e9d8c7b6a")?,
            "noor.haddad@stateu.edu",
            "Noor Haddad",
            "student",
            Some("Mathematics"),
        ),
    ];

    for (id, email, full_name, role, department) in users {
        sqlx::query(
            r#"
            INSERT INTO activity_ledger.users (id, email, full_name, role, status, department)
            VALUES ($1, $2, $3, $4, 'approved', $5)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, department = EXCLUDED.department
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(full_name)
        .bind(role)
        .bind(department)
        .execute(pool)
        .await?;
    }

    // Avery reviews Kiara and Sam, Jules reviews Noor.
    let allocations = vec![
        (
            "3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2",
            "d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2",
        ),
        (
            "3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2",
            "b1b2c3d4-e5f6-4a1b-8c2d-9e0f1a2b3c4d",
        ),
        (
            "0c22f1f1-9184-4fd4-9b21-28c68a6a89dc",
            "9a8b7c6d-5e4f-4d3c-8b2a-1f0e9d8c7b6a",
        ),
    ];

    let admin_id = Uuid::parse_str("7f9c3a51-4c2e-4c8a-9f0b-6a1d2e3f4a5b")?;
    for (teacher_id, student_id) in allocations {
        sqlx::query(
            r#"
            INSERT INTO activity_ledger.teacher_student_allocations
            (id, teacher_id, student_id, allocated_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (teacher_id, student_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(Uuid::parse_str(teacher_id)?)
        .bind(Uuid::parse_str(student_id)?)
        .bind(admin_id)
        .execute(pool)
        .await?;
    }

    Ok(())
}
