//! Schema bootstrap
//!
//! Creates every catalog table from its SeaORM entity definition. Tables are
//! created in foreign-key order and only when missing, so running this on an
//! already provisioned database is a no-op.

use crate::db::models::*;
use crate::errors::Result;
use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, EntityTrait, Schema};
use tracing::{debug, info};

/// Create all tables (and entity-declared indexes) that do not exist yet
pub async fn create_schema<C>(conn: &C) -> Result<()>
where
    C: ConnectionTrait,
{
    create_table(conn, PersonEntity).await?;
    create_table(conn, UserEntity).await?;
    create_table(conn, SessionEntity).await?;
    create_table(conn, ArtifactEntity).await?;
    create_table(conn, ArtifactRatingEntity).await?;
    create_rating_owner_index(conn).await?;
    create_table(conn, ArtifactReviewEntity).await?;
    create_table(conn, ArtifactFavoriteEntity).await?;
    create_table(conn, AffiliationEntity).await?;
    create_table(conn, ArtifactAffiliationEntity).await?;

    info!("Database schema ready");
    Ok(())
}

async fn create_table<C, E>(conn: &C, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);

    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    conn.execute(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        conn.execute(backend.build(&index)).await?;
    }

    debug!(table = entity.table_name(), "Table ensured");
    Ok(())
}

/// One rating per user and artifact
async fn create_rating_owner_index<C>(conn: &C) -> Result<()>
where
    C: ConnectionTrait,
{
    let mut index = Index::create();
    index
        .name("idx_artifact_ratings_user_artifact")
        .table(ArtifactRatingEntity)
        .col(ArtifactRatingColumn::UserId)
        .col(ArtifactRatingColumn::ArtifactId)
        .unique()
        .if_not_exists();

    let backend = conn.get_database_backend();
    conn.execute(backend.build(&index)).await?;
    Ok(())
}
