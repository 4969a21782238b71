//! Planetary reference ellipsoids and geodetic conversions.
//!
//! Angles are in degrees, heights in meters above the ellipsoid, body-fixed
//! coordinates in meters.
//!
//! # Algorithm
//!
//! Geodetic to body-fixed uses the prime-vertical radius
//! `N = a / sqrt(1 - e² sin² φ)`. The inverse uses Bowring's closed form,
//! which is accurate to well below a millimeter for surface points.
//!
//! # References
//!
//! B. R. Bowring, "Transformation from spatial to geographical coordinates",
//! Survey Review 23 (181), 1976.

use serde::{Deserialize, Serialize};

use crate::error::{LmkError, Result};
use crate::math::{Mat3, Real, Vec3};

/// Celestial body a landmark lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Planet {
    #[default]
    Earth,
    Moon,
    Mars,
}

/// Reference ellipsoid parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis.
    pub a: Real,
    /// Semi-minor axis.
    pub b: Real,
    /// First eccentricity squared.
    pub e2: Real,
    /// Second eccentricity squared.
    pub ep2: Real,
}

impl Planet {
    pub fn code(self) -> u32 {
        match self {
            Planet::Earth => 0,
            Planet::Moon => 1,
            Planet::Mars => 2,
        }
    }

    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(Planet::Earth),
            1 => Ok(Planet::Moon),
            2 => Ok(Planet::Mars),
            other => Err(LmkError::Format(format!("unknown planet code {other}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Planet::Earth => "Earth",
            Planet::Moon => "Moon",
            Planet::Mars => "Mars",
        }
    }

    pub fn ellipsoid(self) -> Ellipsoid {
        match self {
            Planet::Earth => Ellipsoid {
                a: 6_378_137.0,
                b: 6_356_752.3141,
                e2: 0.006_694_379_990_13,
                ep2: 0.006_739_496_788_26,
            },
            Planet::Moon => Ellipsoid {
                a: 1_737_400.0,
                b: 1_737_400.0,
                e2: 0.0,
                ep2: 0.0,
            },
            Planet::Mars => Ellipsoid {
                a: 3_396_190.0,
                b: 3_376_200.0,
                e2: 0.011_737_370_0,
                ep2: 0.011_876_772_094,
            },
        }
    }
}

impl std::str::FromStr for Planet {
    type Err = LmkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "earth" => Ok(Planet::Earth),
            "moon" => Ok(Planet::Moon),
            "mars" => Ok(Planet::Mars),
            _ => Err(LmkError::InvalidParameter(format!("unknown planet '{s}'"))),
        }
    }
}

impl std::fmt::Display for Planet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Ellipsoid {
    /// Geodetic (lat, long, height) to body-fixed XYZ.
    pub fn geodetic_to_body(&self, lat_deg: Real, long_deg: Real, height: Real) -> Vec3 {
        let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
        let (sin_lon, cos_lon) = long_deg.to_radians().sin_cos();
        let n = self.a / (1.0 - self.e2 * sin_lat * sin_lat).sqrt();
        Vec3::new(
            (n + height) * cos_lat * cos_lon,
            (n + height) * cos_lat * sin_lon,
            (n * (1.0 - self.e2) + height) * sin_lat,
        )
    }

    /// Body-fixed XYZ to geodetic `(lat, long, height)`.
    pub fn body_to_geodetic(&self, p: &Vec3) -> (Real, Real, Real) {
        let d = (p.x * p.x + p.y * p.y).sqrt();
        let long = p.y.atan2(p.x);
        if d < 1e-9 {
            let lat = if p.z >= 0.0 { 90.0 } else { -90.0 };
            return (lat, long.to_degrees(), p.z.abs() - self.b);
        }
        let theta = (p.z * self.a / (d * self.b)).atan();
        let (st, ct) = theta.sin_cos();
        let lat = ((p.z + self.ep2 * self.b * st * st * st)
            / (d - self.e2 * self.a * ct * ct * ct))
            .atan();
        let sin_lat = lat.sin();
        let n = self.a / (1.0 - self.e2 * sin_lat * sin_lat).sqrt();
        let height = d / lat.cos() - n;
        (lat.to_degrees(), long.to_degrees(), height)
    }

    /// Rotation whose rows are the local east, north and up axes at a
    /// geodetic position, i.e. the body-to-map rotation.
    pub fn local_frame(&self, lat_deg: Real, long_deg: Real, height: Real) -> Mat3 {
        const STEP: Real = 0.001;
        let (dx, dy, dz) = if (lat_deg.abs() - 90.0).abs() < Real::EPSILON {
            let dx = Vec3::new(0.0, 1.0, 0.0);
            let dz = Vec3::new(0.0, 0.0, lat_deg.signum());
            (dx, dz.cross(&dx), dz)
        } else {
            let east = self.geodetic_to_body(lat_deg, long_deg + STEP, height)
                - self.geodetic_to_body(lat_deg, long_deg - STEP, height);
            let north = self.geodetic_to_body(lat_deg + STEP, long_deg, height)
                - self.geodetic_to_body(lat_deg - STEP, long_deg, height);
            let dx = east.normalize();
            let dy = north.normalize();
            (dx, dy, dx.cross(&dy))
        };
        Mat3::from_rows(&[dx.transpose(), dy.transpose(), dz.transpose()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geodetic_round_trip_on_every_body() {
        for planet in [Planet::Earth, Planet::Moon, Planet::Mars] {
            let e = planet.ellipsoid();
            for &(lat, lon, h) in &[(12.5, -47.25, 130.0), (-63.0, 170.0, -20.0), (0.0, 0.0, 0.0)] {
                let p = e.geodetic_to_body(lat, lon, h);
                let (lat2, lon2, h2) = e.body_to_geodetic(&p);
                assert!((lat - lat2).abs() < 1e-6, "{planet}: {lat} vs {lat2}");
                assert!((lon - lon2).abs() < 1e-9);
                assert!((h - h2).abs() < 1e-2);
            }
        }
    }

    #[test]
    fn local_frame_is_a_rotation() {
        let e = Planet::Mars.ellipsoid();
        let r = e.local_frame(-4.5, 137.4, -4500.0);
        assert!((r * r.transpose() - Mat3::identity()).norm() < 1e-6);
        assert!((r.determinant() - 1.0).abs() < 1e-6);
        // up axis points away from the body center
        let p = e.geodetic_to_body(-4.5, 137.4, -4500.0);
        assert!(r.row(2).transpose().dot(&p.normalize()) > 0.99);
    }

    #[test]
    fn pole_frame_is_fixed() {
        let r = Planet::Moon.ellipsoid().local_frame(-90.0, 0.0, 0.0);
        assert_eq!(r.row(2).transpose(), Vec3::new(0.0, 0.0, -1.0));
        assert!((r.determinant() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn planet_codes() {
        assert_eq!(Planet::from_code(2).unwrap(), Planet::Mars);
        assert!(Planet::from_code(9).is_err());
        assert_eq!("moon".parse::<Planet>().unwrap(), Planet::Moon);
    }
}
