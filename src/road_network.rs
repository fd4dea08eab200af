use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use log::{debug, trace};
use sea_orm::sea_query::ArrayType;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, DbErr, Statement, Value};

use crate::error::GatewayError;
use crate::geodesy;
use crate::segment::{Node, NodeId, Way, WayId};

/// Highway classes that are never drivable and are filtered out at the
/// source, matching what the importer keeps in `planet_osm_line`.
const EXCLUDED_HIGHWAYS: &str = "'cycleway','footway','bridleway','steps','path'";

/// Read-only gateway to the OSM road network.
///
/// Implementations are expected to batch (`ways`, `nodes` take id lists)
/// and may be queried concurrently; the engine never mutates through this
/// trait and reassembles fan-out results by id.
#[async_trait]
pub trait RoadNetwork: Send + Sync {
    /// Ids of all ways whose geometry comes within `radius_m` of the point.
    /// Ordering is unspecified.
    async fn ways_near(&self, lon: f64, lat: f64, radius_m: f64)
    -> Result<Vec<WayId>, GatewayError>;

    /// Full records for the given way ids. Unknown ids are silently absent.
    async fn ways(&self, ids: &[WayId]) -> Result<Vec<Way>, GatewayError>;

    /// Full records for the given node ids. Unknown ids are silently absent.
    async fn nodes(&self, ids: &[NodeId]) -> Result<Vec<Node>, GatewayError>;

    /// Ids of all ways whose node list contains the given node.
    async fn ways_at_node(&self, id: NodeId) -> Result<Vec<WayId>, GatewayError>;

    /// One `ways_near` per probe point with at most `parallelism` lookups
    /// in flight, results in probe order.
    async fn ways_near_batch(
        &self,
        probes: &[(f64, f64)],
        radius_m: f64,
        parallelism: usize,
    ) -> Result<Vec<Vec<WayId>>, GatewayError> {
        stream::iter(probes.iter().copied())
            .map(|(lon, lat)| self.ways_near(lon, lat, radius_m))
            .buffered(parallelism.max(1))
            .try_collect()
            .await
    }

    /// Single-node convenience over [`RoadNetwork::nodes`].
    async fn node(&self, id: NodeId) -> Result<Option<Node>, GatewayError> {
        Ok(self.nodes(&[id]).await?.into_iter().next())
    }
}

/// Gateway over the tables osm2pgsql produces (`planet_osm_line`,
/// `planet_osm_ways`, `planet_osm_nodes`).
///
/// Input coordinates are WGS84; the line geometries live in the projected
/// 900913 frame, so spatial queries project the probe point locally before
/// hitting the index.
pub struct PgRoadNetwork {
    db: DatabaseConnection,
    query_timeout: Duration,
}

impl PgRoadNetwork {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            query_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    async fn query(&self, stmt: Statement) -> Result<Vec<sea_orm::QueryResult>, GatewayError> {
        trace!("gateway query: {}", stmt.sql);
        let fut = self.db.query_all(stmt);
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(rows) => Ok(rows.map_err(GatewayError::Query)?),
            Err(_) => Err(GatewayError::Timeout(self.query_timeout)),
        }
    }
}

#[async_trait]
impl RoadNetwork for PgRoadNetwork {
    async fn ways_near(
        &self,
        lon: f64,
        lat: f64,
        radius_m: f64,
    ) -> Result<Vec<WayId>, GatewayError> {
        let (x, y) = geodesy::mercator(lon, lat);
        let rows = self
            .query(Statement::from_sql_and_values(
                DbBackend::Postgres,
                format!(
                    "SELECT DISTINCT osm_id FROM planet_osm_line \
                     WHERE osm_id > 0 AND highway IS NOT NULL \
                     AND highway NOT IN ({EXCLUDED_HIGHWAYS}) \
                     AND ST_DWithin(way, ST_SetSRID(ST_MakePoint($1, $2), 900913), $3)"
                ),
                [x.into(), y.into(), radius_m.into()],
            ))
            .await?;
        rows.iter()
            .map(|row| row.try_get::<i64>("", "osm_id").map_err(into_gateway))
            .collect()
    }

    async fn ways(&self, ids: &[WayId]) -> Result<Vec<Way>, GatewayError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .query(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT id, nodes, tags FROM planet_osm_ways WHERE id = ANY($1)",
                [id_array(ids)],
            ))
            .await?;
        debug!("gateway: fetched {} of {} ways", rows.len(), ids.len());
        rows.iter()
            .map(|row| {
                Ok(Way {
                    id: row.try_get("", "id").map_err(into_gateway)?,
                    nodes: row.try_get("", "nodes").map_err(into_gateway)?,
                    tags: parse_tags(row.try_get("", "tags").map_err(into_gateway)?),
                })
            })
            .collect()
    }

    async fn nodes(&self, ids: &[NodeId]) -> Result<Vec<Node>, GatewayError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .query(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT id, lon, lat, tags FROM planet_osm_nodes WHERE id = ANY($1)",
                [id_array(ids)],
            ))
            .await?;
        debug!("gateway: fetched {} of {} nodes", rows.len(), ids.len());
        rows.iter()
            .map(|row| {
                // lat/lon are 1e7-scaled WGS84 integers
                let lon: i64 = row.try_get("", "lon").map_err(into_gateway)?;
                let lat: i64 = row.try_get("", "lat").map_err(into_gateway)?;
                Ok(Node {
                    id: row.try_get("", "id").map_err(into_gateway)?,
                    lon: lon as f64 / 1e7,
                    lat: lat as f64 / 1e7,
                    tags: parse_tags(row.try_get("", "tags").map_err(into_gateway)?),
                })
            })
            .collect()
    }

    async fn ways_at_node(&self, id: NodeId) -> Result<Vec<WayId>, GatewayError> {
        let rows = self
            .query(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT id FROM planet_osm_ways WHERE nodes @> ARRAY[$1]::bigint[]",
                [id.into()],
            ))
            .await?;
        rows.iter()
            .map(|row| row.try_get::<i64>("", "id").map_err(into_gateway))
            .collect()
    }
}

/// Closest way per probe point, or None when nothing lies within `radius_m`.
pub async fn nearest_road<G: RoadNetwork + ?Sized>(
    gateway: &G,
    radius_m: f64,
    probes: &[(f64, f64)],
) -> Result<Vec<Option<Way>>, GatewayError> {
    let mut out = Vec::with_capacity(probes.len());
    for &(lon, lat) in probes {
        let ids = gateway.ways_near(lon, lat, radius_m).await?;
        match ids.first() {
            Some(&id) => out.push(gateway.ways(&[id]).await?.into_iter().next()),
            None => out.push(None),
        }
    }
    Ok(out)
}

/// Bind an id list as a single `bigint[]` parameter for `= ANY($n)`.
fn id_array(ids: &[i64]) -> Value {
    Value::Array(
        ArrayType::BigInt,
        Some(Box::new(
            ids.iter().map(|&id| Value::BigInt(Some(id))).collect(),
        )),
    )
}

/// `planet_osm_ways.tags` / `planet_osm_nodes.tags` store alternating
/// key/value entries in a flat text array.
fn parse_tags(flat: Option<Vec<String>>) -> BTreeMap<String, String> {
    let Some(flat) = flat else {
        return BTreeMap::new();
    };
    flat.chunks_exact(2)
        .map(|kv| (kv[0].clone(), kv[1].clone()))
        .collect()
}

fn into_gateway(err: impl Into<DbErr>) -> GatewayError {
    GatewayError::Query(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_alternating_pairs() {
        let tags = parse_tags(Some(vec![
            "highway".into(),
            "residential".into(),
            "name".into(),
            "Main Street".into(),
        ]));
        assert_eq!(tags.get("highway").unwrap(), "residential");
        assert_eq!(tags.get("name").unwrap(), "Main Street");
        assert!(parse_tags(None).is_empty());
        // a dangling key without value is dropped
        assert_eq!(parse_tags(Some(vec!["highway".into()])).len(), 0);
    }

    #[test]
    fn id_list_binds_as_bigint_array() {
        let Value::Array(ArrayType::BigInt, Some(items)) = id_array(&[1, -2, 30]) else {
            panic!("expected a bigint array value");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Value::BigInt(Some(1)));
        assert_eq!(items[1], Value::BigInt(Some(-2)));
    }
}
