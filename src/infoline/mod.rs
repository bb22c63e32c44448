//! InfoLine data access: typed listings over the resilient query layer.

mod client;
mod types;

pub use client::{InfoLineClient, DEFAULT_PAGE_SIZE, PROFILES, REGIONS, SCHOOLS, SECTORS};
pub use types::{Region, School, Sector, UserProfile, UserRole};
