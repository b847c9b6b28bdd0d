//! Geospatial command implementations.

use super::ParsedCommand;
use crate::Result;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use crate::types::geo::GeoResult;
use crate::types::{GeoIndex, GeoUnit, Key, ValueType};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

fn parse_unit(cmd: &ParsedCommand, index: usize) -> Result<GeoUnit> {
    match cmd.args.get(index) {
        None => Ok(GeoUnit::Kilometers),
        Some(_) => {
            GeoUnit::parse(cmd.get_str(index)?).ok_or_else(|| CommandError::SyntaxError.into())
        }
    }
}

fn format_coord(v: f64) -> String {
    format!("{v:.6}")
}

/// Build the reply for a radius-style query, honoring WITHCOORD/WITHDIST.
fn radius_reply(results: Vec<GeoResult>, with_coord: bool, with_dist: bool) -> Frame {
    let frames = results
        .into_iter()
        .map(|hit| {
            if !with_coord && !with_dist {
                return Frame::Bulk(hit.point.member);
            }
            let mut parts = vec![Frame::Bulk(hit.point.member)];
            if with_dist {
                parts.push(Frame::bulk(format!("{:.4}", hit.distance)));
            }
            if with_coord {
                parts.push(Frame::Array(vec![
                    Frame::bulk(format_coord(hit.point.longitude)),
                    Frame::bulk(format_coord(hit.point.latitude)),
                ]));
            }
            Frame::Array(parts)
        })
        .collect();
    Frame::Array(frames)
}

fn parse_radius_flags(cmd: &ParsedCommand, from: usize) -> Result<(bool, bool)> {
    let mut with_coord = false;
    let mut with_dist = false;
    for arg in &cmd.args[from..] {
        if arg.eq_ignore_ascii_case(b"WITHCOORD") {
            with_coord = true;
        } else if arg.eq_ignore_ascii_case(b"WITHDIST") {
            with_dist = true;
        } else {
            return Err(CommandError::SyntaxError.into());
        }
    }
    Ok((with_coord, with_dist))
}

/// GEOADD key longitude latitude member [longitude latitude member ...]
pub fn cmd_geoadd(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        if (cmd.args.len() - 1) % 3 != 0 {
            return Err(CommandError::WrongArity {
                command: cmd.name.clone(),
            }
            .into());
        }

        // Validate every triple before mutating
        let mut triples = Vec::with_capacity((cmd.args.len() - 1) / 3);
        let mut i = 1;
        while i < cmd.args.len() {
            let lon = cmd.get_f64(i)?;
            let lat = cmd.get_f64(i + 1)?;
            if !GeoIndex::valid_coordinates(lon, lat) {
                return Err(CommandError::InvalidCoordinates { lon, lat }.into());
            }
            triples.push((lon, lat, cmd.args[i + 2].clone()));
            i += 3;
        }

        let key = Key::from_bytes(cmd.args[0].clone());
        let value = db.get_or_create(&key, ValueType::Geo)?;
        let geo = value.as_geo().expect("created as geo");

        let mut added = 0i64;
        let mut guard = geo.write();
        for (lon, lat, member) in triples {
            if guard.add(member, lon, lat) {
                added += 1;
            }
        }
        Ok(Frame::Integer(added))
    })
}

/// GEOREM key member [member ...]
pub fn cmd_georem(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let Some(value) = db.get_typed(&key, ValueType::Geo)? else {
            return Ok(Frame::Integer(0));
        };
        let geo = value.as_geo().expect("checked type");

        let mut removed = 0i64;
        let mut guard = geo.write();
        for member in &cmd.args[1..] {
            if guard.remove(member) {
                removed += 1;
            }
        }
        Ok(Frame::Integer(removed))
    })
}

/// GEOPOS key member [member ...]
pub fn cmd_geopos(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let value = db.get_typed(&key, ValueType::Geo)?;
        let geo = value.as_ref().and_then(|v| v.as_geo());

        let frames = cmd.args[1..]
            .iter()
            .map(|member| {
                let pos = geo.and_then(|g| g.read().position(member));
                match pos {
                    Some((lon, lat)) => Frame::Array(vec![
                        Frame::bulk(format_coord(lon)),
                        Frame::bulk(format_coord(lat)),
                    ]),
                    None => Frame::Null,
                }
            })
            .collect();
        Ok(Frame::Array(frames))
    })
}

/// GEODIST key member1 member2 [unit]
pub fn cmd_geodist(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let unit = parse_unit(&cmd, 3)?;

        let Some(value) = db.get_typed(&key, ValueType::Geo)? else {
            return Ok(Frame::Null);
        };
        let geo = value.as_geo().expect("checked type");

        let result = Ok(match geo.read().distance(&cmd.args[1], &cmd.args[2], unit) {
            Some(d) => Frame::bulk(format!("{d:.4}")),
            None => Frame::Null,
        });
        result
    })
}

/// GEORADIUS key longitude latitude radius unit [WITHCOORD] [WITHDIST]
pub fn cmd_georadius(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let lon = cmd.get_f64(1)?;
        let lat = cmd.get_f64(2)?;
        if !GeoIndex::valid_coordinates(lon, lat) {
            return Err(CommandError::InvalidCoordinates { lon, lat }.into());
        }
        let radius = cmd.get_f64(3)?;
        let unit = parse_unit(&cmd, 4)?;
        let (with_coord, with_dist) = parse_radius_flags(&cmd, 5)?;

        let Some(value) = db.get_typed(&key, ValueType::Geo)? else {
            return Ok(Frame::empty_array());
        };
        let geo = value.as_geo().expect("checked type");

        let results = geo.read().radius(lon, lat, radius, unit);
        Ok(radius_reply(results, with_coord, with_dist))
    })
}

/// GEORADIUSBYMEMBER key member radius unit [WITHCOORD] [WITHDIST]
pub fn cmd_georadiusbymember(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let radius = cmd.get_f64(2)?;
        let unit = parse_unit(&cmd, 3)?;
        let (with_coord, with_dist) = parse_radius_flags(&cmd, 4)?;

        let Some(value) = db.get_typed(&key, ValueType::Geo)? else {
            return Err(CommandError::NoSuchMember(
                String::from_utf8_lossy(&cmd.args[1]).into_owned(),
            )
            .into());
        };
        let geo = value.as_geo().expect("checked type");

        let results = geo
            .read()
            .radius_by_member(&cmd.args[1], radius, unit)
            .ok_or_else(|| {
                CommandError::NoSuchMember(String::from_utf8_lossy(&cmd.args[1]).into_owned())
            })?;
        Ok(radius_reply(results, with_coord, with_dist))
    })
}

/// GEOSEARCH key longitude latitude width height
///
/// Box search; width and height are degrees of longitude and latitude.
pub fn cmd_geosearch(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let lon = cmd.get_f64(1)?;
        let lat = cmd.get_f64(2)?;
        if !GeoIndex::valid_coordinates(lon, lat) {
            return Err(CommandError::InvalidCoordinates { lon, lat }.into());
        }
        let width = cmd.get_f64(3)?;
        let height = cmd.get_f64(4)?;

        let Some(value) = db.get_typed(&key, ValueType::Geo)? else {
            return Ok(Frame::empty_array());
        };
        let geo = value.as_geo().expect("checked type");

        let results = geo.read().search_box(lon, lat, width, height);
        Ok(radius_reply(results, false, false))
    })
}

/// GEOHASH key member [member ...]
pub fn cmd_geohash(
    cmd: ParsedCommand,
    db: Arc<Db>,
    _client: Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from_bytes(cmd.args[0].clone());
        let value = db.get_typed(&key, ValueType::Geo)?;
        let geo = value.as_ref().and_then(|v| v.as_geo());

        let frames = cmd.args[1..]
            .iter()
            .map(|member| {
                let hash = geo.and_then(|g| g.read().geohash(member));
                match hash {
                    Some(h) => Frame::bulk(h),
                    None => Frame::Null,
                }
            })
            .collect();
        Ok(Frame::Array(frames))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::cluster::ClusterManager;
    use crate::server::pubsub::PubSubHub;
    use crate::storage::MemoryManager;
    use bytes::Bytes;

    fn test_db() -> Arc<Db> {
        Arc::new(Db::new(
            Arc::new(PubSubHub::new()),
            Arc::new(ClusterManager::standalone()),
            Arc::new(MemoryManager::default()),
        ))
    }

    fn client() -> Arc<ClientState> {
        Arc::new(ClientState::new(1))
    }

    fn cmd(name: &str, args: &[&str]) -> ParsedCommand {
        ParsedCommand {
            name: name.to_string(),
            args: args
                .iter()
                .map(|s| Bytes::copy_from_slice(s.as_bytes()))
                .collect(),
        }
    }

    async fn seed_sf(db: &Arc<Db>) {
        cmd_geoadd(
            cmd("GEOADD", &["g", "-122.4194", "37.7749", "a"]),
            db.clone(),
            client(),
        )
        .await
        .unwrap();
        cmd_geoadd(
            cmd("GEOADD", &["g", "-122.4313", "37.7739", "b"]),
            db.clone(),
            client(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_geoadd_and_pos() {
        let db = test_db();
        seed_sf(&db).await;

        let reply = cmd_geopos(cmd("GEOPOS", &["g", "a", "missing"]), db, client())
            .await
            .unwrap();
        let arr = reply.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert!(matches!(arr[0], Frame::Array(_)));
        assert_eq!(arr[1], Frame::Null);
    }

    #[tokio::test]
    async fn test_geoadd_rejects_out_of_range() {
        let db = test_db();
        let err = cmd_geoadd(
            cmd("GEOADD", &["g", "181.0", "0.0", "x"]),
            db.clone(),
            client(),
        )
        .await;
        assert!(err.is_err());

        let err = cmd_geoadd(cmd("GEOADD", &["g", "0.0", "-91.0", "x"]), db, client()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_geodist_scenario() {
        let db = test_db();
        seed_sf(&db).await;

        let reply = cmd_geodist(cmd("GEODIST", &["g", "a", "b", "km"]), db, client())
            .await
            .unwrap();
        let d: f64 = reply.as_str().unwrap().parse().unwrap();
        assert!((1.0..=1.5).contains(&d), "expected ~1.05 km, got {d}");
    }

    #[tokio::test]
    async fn test_geodist_missing_member_is_null() {
        let db = test_db();
        seed_sf(&db).await;

        let reply = cmd_geodist(cmd("GEODIST", &["g", "a", "nope", "km"]), db, client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Null);
    }

    #[tokio::test]
    async fn test_georadius_with_flags() {
        let db = test_db();
        seed_sf(&db).await;

        let reply = cmd_georadius(
            cmd(
                "GEORADIUS",
                &["g", "-122.4194", "37.7749", "5", "km", "WITHDIST", "WITHCOORD"],
            ),
            db,
            client(),
        )
        .await
        .unwrap();
        let hits = reply.as_array().unwrap();
        assert_eq!(hits.len(), 2);

        // Closest first; each hit is [member, dist, [lon, lat]]
        let first = hits[0].as_array().unwrap();
        assert_eq!(first[0], Frame::bulk("a"));
        let dist: f64 = first[1].as_str().unwrap().parse().unwrap();
        assert!(dist < 0.01);
        assert!(matches!(first[2], Frame::Array(_)));
    }

    #[tokio::test]
    async fn test_georadiusbymember() {
        let db = test_db();
        seed_sf(&db).await;

        let reply = cmd_georadiusbymember(
            cmd("GEORADIUSBYMEMBER", &["g", "a", "2", "km"]),
            db.clone(),
            client(),
        )
        .await
        .unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 2);

        let err = cmd_georadiusbymember(
            cmd("GEORADIUSBYMEMBER", &["g", "ghost", "2", "km"]),
            db,
            client(),
        )
        .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_geosearch_box() {
        let db = test_db();
        seed_sf(&db).await;

        let reply = cmd_geosearch(
            cmd("GEOSEARCH", &["g", "-122.42", "37.77", "0.1", "0.1"]),
            db,
            client(),
        )
        .await
        .unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_geohash() {
        let db = test_db();
        seed_sf(&db).await;

        let reply = cmd_geohash(cmd("GEOHASH", &["g", "a"]), db, client())
            .await
            .unwrap();
        let arr = reply.as_array().unwrap();
        let hash = arr[0].as_str().unwrap();
        assert_eq!(hash.len(), 12);
        // SF geohashes start with 9q8y
        assert!(hash.starts_with("9q8y"), "got {hash}");
    }

    #[tokio::test]
    async fn test_georem() {
        let db = test_db();
        seed_sf(&db).await;

        let reply = cmd_georem(cmd("GEOREM", &["g", "a", "ghost"]), db, client())
            .await
            .unwrap();
        assert_eq!(reply, Frame::Integer(1));
    }
}
