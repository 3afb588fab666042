//! Master data: the organization, its locations, and its suppliers.

pub mod location;
pub mod organization;
pub mod supplier;

pub use location::{Location, LocationRepository, LocationType, Ownership};
pub use organization::{Organization, OrganizationRepository};
pub use supplier::{Supplier, SupplierRepository};
