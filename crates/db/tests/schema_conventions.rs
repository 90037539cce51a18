//! Schema convention checks. Need a live database (`DATABASE_URL`).

use sqlx::PgPool;

/// All `id` columns must be bigint (entity tables) or smallint (lookup tables).
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_all_pks_are_correct_type(pool: PgPool) {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT table_name, data_type
         FROM information_schema.columns
         WHERE column_name = 'id'
           AND table_schema = 'public'
           AND table_name != '_sqlx_migrations'
         ORDER BY table_name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    assert!(!rows.is_empty());
    for (table, data_type) in &rows {
        assert!(
            data_type == "bigint" || data_type == "smallint",
            "Table {table}.id should be bigint or smallint, got {data_type}"
        );
    }
}

/// Every table (except _sqlx_migrations) has created_at and updated_at as timestamptz.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_all_tables_have_timestamps(pool: PgPool) {
    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT table_name
         FROM information_schema.tables
         WHERE table_schema = 'public'
           AND table_type = 'BASE TABLE'
           AND table_name != '_sqlx_migrations'
         ORDER BY table_name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    for (table,) in &tables {
        for col in ["created_at", "updated_at"] {
            let result: Option<(String,)> = sqlx::query_as(
                "SELECT data_type
                 FROM information_schema.columns
                 WHERE table_schema = 'public'
                   AND table_name = $1
                   AND column_name = $2",
            )
            .bind(table)
            .bind(col)
            .fetch_optional(&pool)
            .await
            .unwrap();

            let (data_type,) =
                result.unwrap_or_else(|| panic!("Table {table} is missing column {col}"));
            assert_eq!(
                data_type, "timestamp with time zone",
                "Table {table}.{col} should be timestamptz, got {data_type}"
            );
        }
    }
}

/// Status lookup seed rows line up with `ProvisioningJobStatus`.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_job_status_seed_matches_enum(pool: PgPool) {
    use provisioner_db::models::status::ProvisioningJobStatus;

    let rows: Vec<(i16, String)> =
        sqlx::query_as("SELECT id, name FROM provisioning_job_statuses ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();

    assert_eq!(rows.len(), 4);
    for (id, name) in rows {
        let status = ProvisioningJobStatus::from_id(id).unwrap();
        assert_eq!(status.name(), name);
    }
}
