//! Identity and role lookup for the auth pipeline.

pub mod resolver;
pub mod roles;

pub use resolver::IdentityResolver;
pub use roles::RoleCatalog;
