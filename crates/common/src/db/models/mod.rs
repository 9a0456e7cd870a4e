//! SeaORM entity models
//!
//! Database entities for the SEARCCH catalog

mod affiliation;
mod artifact;
mod artifact_affiliation;
mod artifact_favorite;
mod artifact_rating;
mod artifact_review;
mod person;
mod session;
mod user;

pub use person::{
    Entity as PersonEntity,
    Model as Person,
    ActiveModel as PersonActiveModel,
    Column as PersonColumn,
};

pub use user::{
    Entity as UserEntity,
    Model as User,
    ActiveModel as UserActiveModel,
    Column as UserColumn,
};

pub use session::{
    Entity as SessionEntity,
    Model as Session,
    ActiveModel as SessionActiveModel,
    Column as SessionColumn,
};

pub use artifact::{
    Entity as ArtifactEntity,
    Model as Artifact,
    ActiveModel as ArtifactActiveModel,
    Column as ArtifactColumn,
};

pub use artifact_rating::{
    Entity as ArtifactRatingEntity,
    Model as ArtifactRating,
    ActiveModel as ArtifactRatingActiveModel,
    Column as ArtifactRatingColumn,
};

pub use artifact_review::{
    Entity as ArtifactReviewEntity,
    Model as ArtifactReview,
    ActiveModel as ArtifactReviewActiveModel,
    Column as ArtifactReviewColumn,
};

pub use artifact_favorite::{
    Entity as ArtifactFavoriteEntity,
    Model as ArtifactFavorite,
    ActiveModel as ArtifactFavoriteActiveModel,
    Column as ArtifactFavoriteColumn,
};

pub use affiliation::{
    Entity as AffiliationEntity,
    Model as Affiliation,
    ActiveModel as AffiliationActiveModel,
    Column as AffiliationColumn,
};

pub use artifact_affiliation::{
    Entity as ArtifactAffiliationEntity,
    Model as ArtifactAffiliation,
    ActiveModel as ArtifactAffiliationActiveModel,
    Column as ArtifactAffiliationColumn,
};
