use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Administrative region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  pub status: Option<String>,
}

/// Sector within a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sector {
  pub id: String,
  pub name: String,
  pub region_id: String,
  pub status: Option<String>,
}

/// School within a sector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct School {
  pub id: String,
  pub name: String,
  pub sector_id: String,
  pub region_id: String,
  #[serde(rename = "type")]
  pub school_type: Option<String>,
  pub student_count: Option<i64>,
  pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
  SuperAdmin,
  RegionAdmin,
  SectorAdmin,
  SchoolAdmin,
}

impl UserRole {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::SuperAdmin => "superadmin",
      Self::RegionAdmin => "regionadmin",
      Self::SectorAdmin => "sectoradmin",
      Self::SchoolAdmin => "schooladmin",
    }
  }
}

impl FromStr for UserRole {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "superadmin" => Ok(Self::SuperAdmin),
      "regionadmin" => Ok(Self::RegionAdmin),
      "sectoradmin" => Ok(Self::SectorAdmin),
      "schooladmin" => Ok(Self::SchoolAdmin),
      other => Err(format!("unknown role: {}", other)),
    }
  }
}

/// User profile with its role assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
  pub id: String,
  pub full_name: String,
  pub email: Option<String>,
  pub role: Option<UserRole>,
  pub region_id: Option<String>,
  pub sector_id: Option<String>,
  pub school_id: Option<String>,
}

impl fmt::Display for Region {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}  {}", self.id, self.name)
  }
}

impl fmt::Display for Sector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}  {}  (region {})", self.id, self.name, self.region_id)
  }
}

impl fmt::Display for School {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}  {}", self.id, self.name)?;
    if let Some(count) = self.student_count {
      write!(f, "  [{} students]", count)?;
    }
    Ok(())
  }
}

impl fmt::Display for UserProfile {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let role = self.role.map(|r| r.as_str()).unwrap_or("-");
    write!(f, "{}  {}  {}", self.id, self.full_name, role)
  }
}
