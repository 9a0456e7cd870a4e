//! Artifact entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "artifacts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// dataset, software, publication, ...
    #[sea_orm(column_type = "Text")]
    #[serde(rename = "type")]
    pub artifact_type: String,

    /// DOI or canonical URL
    #[sea_orm(column_type = "Text")]
    pub url: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::artifact_rating::Entity")]
    Ratings,

    #[sea_orm(has_many = "super::artifact_review::Entity")]
    Reviews,

    #[sea_orm(has_many = "super::artifact_favorite::Entity")]
    Favorites,

    #[sea_orm(has_many = "super::artifact_affiliation::Entity")]
    Affiliations,
}

impl Related<super::artifact_rating::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ratings.def()
    }
}

impl Related<super::artifact_review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reviews.def()
    }
}

impl Related<super::artifact_favorite::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Favorites.def()
    }
}

impl Related<super::affiliation::Entity> for Entity {
    fn to() -> RelationDef {
        super::artifact_affiliation::Relation::Affiliation.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::artifact_affiliation::Relation::Artifact.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Searchable text: title followed by description
    pub fn document(&self) -> String {
        match &self.description {
            Some(description) => format!("{} {}", self.title, description),
            None => self.title.clone(),
        }
    }
}
