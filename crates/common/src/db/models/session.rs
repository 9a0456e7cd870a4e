//! Login session entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    /// Opaque SSO token presented at login. At most one row per value.
    #[sea_orm(column_type = "Text", unique)]
    #[serde(skip_serializing)]
    pub sso_token: String,

    pub expires_on: DateTimeWithTimeZone,

    pub is_admin: bool,
}

impl Model {
    /// Check if session is expired
    pub fn is_expired(&self) -> bool {
        use chrono::Utc;
        self.expires_on <= Utc::now().fixed_offset()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
