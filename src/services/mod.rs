//! Typed backend endpoints built on [`Client`](crate::Client).
//!
//! Services borrow the client, so every call inherits bearer-token attach and
//! refresh/replay.

mod auth;
mod species;

pub use auth::{AdminUser, AuthService, SignInResponse, UserRole};
pub use species::{
    CommonName, Coordinate, ImageFile, NewSpecies, Pagination, Reference, SortOrder, Species,
    SpeciesPage, SpeciesQuery, SpeciesService, SpeciesUpload, Thumbnail, UploadedImages,
};
