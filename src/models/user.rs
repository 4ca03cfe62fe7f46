use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Builds a point from GeoJSON ordering: `[longitude, latitude]`.
    pub fn from_coordinates(coordinates: [f64; 2]) -> Self {
        Self {
            lat: coordinates[1],
            lng: coordinates[0],
        }
    }

    pub fn coordinates(&self) -> [f64; 2] {
        [self.lng, self.lat]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Driver,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Driver => "driver",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "driver" => Ok(Role::Driver),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::BadRequest(format!(
                "unknown role: {other}, expected customer/driver/admin"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub mobile: Option<String>,
    pub role: Role,
    /// Last persisted position; only drivers with a location take part in dispatch.
    pub location: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_driver(&self) -> bool {
        self.role == Role::Driver
    }
}

/// Driver entry returned alongside a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSummary {
    pub id: Uuid,
    pub name: String,
    pub mobile: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
}

#[derive(Debug, Clone)]
pub struct NearbyDriver {
    pub driver: User,
    pub location: GeoPoint,
    pub distance_km: f64,
}

impl NearbyDriver {
    pub fn summary(&self) -> DriverSummary {
        DriverSummary {
            id: self.driver.id,
            name: self.driver.name.clone(),
            mobile: self.driver.mobile.clone(),
            latitude: self.location.lat,
            longitude: self.location.lng,
            distance_km: self.distance_km,
        }
    }
}
