//! Chief registry repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use chrono::Utc;
use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::geo::GeoPoint;
use crate::models::{new_storage_id, Chief, NewChief};
use crate::util::{from_storage_micros, normalize_text_option, to_storage_micros};

const CHIEF_COLUMNS: &str = "id, chief_name, title, province, district, chiefdom, \
     palace_latitude, palace_longitude, is_active, created_at";

/// Trait for chief storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ChiefRepository {
    /// Register a chief
    async fn create(&self, chief: NewChief) -> Result<Chief>;

    /// List chiefs by name, optionally narrowed to a province and district
    async fn list(
        &self,
        province: Option<&str>,
        district: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Chief>>;

    /// Nearest active chief whose palace lies within `radius_km` of `point`
    async fn nearest(&self, point: GeoPoint, radius_km: f64) -> Result<Option<(Chief, f64)>>;
}

/// libSQL implementation of `ChiefRepository`
pub struct LibSqlChiefRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlChiefRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_chief(row: &Row) -> Result<Chief> {
        Ok(Chief {
            id: row.get(0)?,
            chief_name: row.get(1)?,
            title: row.get(2)?,
            province: row.get(3)?,
            district: row.get(4)?,
            chiefdom: row.get(5)?,
            palace_latitude: row.get(6)?,
            palace_longitude: row.get(7)?,
            is_active: row.get::<i64>(8)? != 0,
            created_at: from_storage_micros(row.get(9)?),
        })
    }
}

impl ChiefRepository for LibSqlChiefRepository<'_> {
    async fn create(&self, chief: NewChief) -> Result<Chief> {
        let chief_name = required(chief.chief_name, "chief_name")?;
        let province = required(chief.province, "province")?;
        let district = required(chief.district, "district")?;
        let chiefdom = required(chief.chiefdom, "chiefdom")?;
        if chief.palace_latitude.is_some() != chief.palace_longitude.is_some() {
            return Err(Error::InvalidInput(
                "palace latitude and longitude must be given together".into(),
            ));
        }

        let created = Chief {
            id: new_storage_id(),
            chief_name,
            title: normalize_text_option(chief.title),
            province,
            district,
            chiefdom,
            palace_latitude: chief.palace_latitude,
            palace_longitude: chief.palace_longitude,
            is_active: chief.is_active,
            created_at: from_storage_micros(to_storage_micros(Utc::now())),
        };

        self.conn
            .execute(
                &format!(
                    "INSERT INTO chiefs ({CHIEF_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    created.id.as_str(),
                    created.chief_name.as_str(),
                    created.title.clone(),
                    created.province.as_str(),
                    created.district.as_str(),
                    created.chiefdom.as_str(),
                    created.palace_latitude,
                    created.palace_longitude,
                    i64::from(created.is_active),
                    to_storage_micros(created.created_at),
                ],
            )
            .await?;

        Ok(created)
    }

    async fn list(
        &self,
        province: Option<&str>,
        district: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Chief>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {CHIEF_COLUMNS} FROM chiefs
                     WHERE (?1 IS NULL OR province = ?1 COLLATE NOCASE)
                       AND (?2 IS NULL OR district = ?2 COLLATE NOCASE)
                     ORDER BY chief_name COLLATE NOCASE ASC
                     LIMIT ?3 OFFSET ?4"
                ),
                params![
                    province.map(str::to_string),
                    district.map(str::to_string),
                    limit as i64,
                    offset as i64,
                ],
            )
            .await?;

        let mut chiefs = Vec::new();
        while let Some(row) = rows.next().await? {
            chiefs.push(Self::parse_chief(&row)?);
        }
        Ok(chiefs)
    }

    async fn nearest(&self, point: GeoPoint, radius_km: f64) -> Result<Option<(Chief, f64)>> {
        let bbox = point.bounding_box(radius_km);
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {CHIEF_COLUMNS} FROM chiefs
                     WHERE is_active = 1
                       AND palace_latitude BETWEEN ? AND ?
                       AND palace_longitude BETWEEN ? AND ?"
                ),
                params![
                    bbox.min_latitude,
                    bbox.max_latitude,
                    bbox.min_longitude,
                    bbox.max_longitude,
                ],
            )
            .await?;

        let mut best: Option<(Chief, f64)> = None;
        while let Some(row) = rows.next().await? {
            let chief = Self::parse_chief(&row)?;
            let (Some(latitude), Some(longitude)) = (chief.palace_latitude, chief.palace_longitude)
            else {
                continue;
            };
            let distance = point.distance_km(GeoPoint::new(latitude, longitude));
            if distance > radius_km {
                continue;
            }
            if best.as_ref().is_none_or(|(_, d)| distance < *d) {
                best = Some((chief, distance));
            }
        }
        Ok(best)
    }
}

fn required(value: String, field: &str) -> Result<String> {
    normalize_text_option(Some(value))
        .ok_or_else(|| Error::InvalidInput(format!("{field} is required")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn chief(name: &str, district: &str, palace: Option<(f64, f64)>) -> NewChief {
        NewChief {
            chief_name: name.to_string(),
            title: Some("Chief".to_string()),
            province: "Central".to_string(),
            district: district.to_string(),
            chiefdom: format!("{name} chiefdom"),
            palace_latitude: palace.map(|p| p.0),
            palace_longitude: palace.map(|p| p.1),
            is_active: true,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_and_list() {
        let db = setup().await;
        let repo = LibSqlChiefRepository::new(db.connection());

        repo.create(chief("Mungule", "Chibombo", Some((-15.10, 28.10))))
            .await
            .unwrap();
        repo.create(chief("Chitanda", "Chibombo", None)).await.unwrap();
        repo.create(chief("Mukuni", "Kazungula", None)).await.unwrap();

        let all = repo.list(None, None, 10, 0).await.unwrap();
        let names: Vec<_> = all.iter().map(|c| c.chief_name.as_str()).collect();
        assert_eq!(names, vec!["Chitanda", "Mukuni", "Mungule"]);

        let chibombo = repo
            .list(Some("central"), Some("chibombo"), 10, 0)
            .await
            .unwrap();
        assert_eq!(chibombo.len(), 2);

        let page = repo.list(None, None, 1, 1).await.unwrap();
        assert_eq!(page[0].chief_name, "Mukuni");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_rejects_blank_name_and_half_location() {
        let db = setup().await;
        let repo = LibSqlChiefRepository::new(db.connection());

        assert!(repo.create(chief("  ", "Chibombo", None)).await.is_err());

        let mut half = chief("Mungule", "Chibombo", None);
        half.palace_latitude = Some(-15.0);
        assert!(repo.create(half).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nearest_picks_closest_active_chief_in_radius() {
        let db = setup().await;
        let repo = LibSqlChiefRepository::new(db.connection());

        repo.create(chief("Far", "Kabwe", Some((-14.40, 28.45))))
            .await
            .unwrap();
        repo.create(chief("Near", "Chibombo", Some((-15.02, 28.02))))
            .await
            .unwrap();
        let mut retired = chief("Retired", "Chibombo", Some((-15.001, 28.001)));
        retired.is_active = false;
        repo.create(retired).await.unwrap();

        let (found, distance) = repo
            .nearest(GeoPoint::new(-15.0, 28.0), 50.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.chief_name, "Near");
        assert!(distance < 5.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nearest_outside_radius_is_none() {
        let db = setup().await;
        let repo = LibSqlChiefRepository::new(db.connection());

        // About 67 km north of the query point.
        repo.create(chief("Far", "Kabwe", Some((-14.40, 28.0))))
            .await
            .unwrap();

        let found = repo.nearest(GeoPoint::new(-15.0, 28.0), 50.0).await.unwrap();
        assert!(found.is_none());
    }
}
