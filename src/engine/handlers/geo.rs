use std::sync::Arc;

use crate::data::geo::unit_to_meters;
use crate::engine::command::Command;
use crate::engine::handlers::{not_enough_args, parse_float, parse_str, reject_sub_mode};
use crate::engine::Engine;
use crate::error::ServerError;
use crate::resp::Value;

impl Engine {
    /// GEOADD key (lon lat member)+ — validates Mercator bounds, replies
    /// with the number of newly added members.
    pub(crate) fn cmd_geoadd(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() < 4 || (args.len() - 1) % 3 != 0 {
            return Err(not_enough_args());
        }
        self.check_replica_write(cmd)?;

        let key = parse_str(&args[0])?.to_string();
        let mut entries = Vec::with_capacity((args.len() - 1) / 3);
        for chunk in args[1..].chunks(3) {
            let lon = parse_float(&chunk[0])?;
            let lat = parse_float(&chunk[1])?;
            let member = parse_str(&chunk[2])?.to_string();
            entries.push((lon, lat, member));
        }

        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let index = self.db_mut(cmd.db()).get_or_create_geo(&key);
        let mut added = 0;
        for (lon, lat, member) in entries {
            if index.add(&member, lat, lon)? {
                added += 1;
            }
        }

        if self.should_write_output(cmd) {
            cmd.write_value(&Value::Integer(added));
        }
        cmd.set_done();
        Ok(())
    }

    /// GEOPOS key member... — one `[lon, lat]` array per member, null
    /// array for members (or keys) that do not exist.
    pub(crate) fn cmd_geopos(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() < 2 {
            return Err(not_enough_args());
        }
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let key = parse_str(&args[0])?.to_string();
        let mut members = Vec::with_capacity(args.len() - 1);
        for arg in &args[1..] {
            members.push(parse_str(arg)?.to_string());
        }

        let index = self.db_mut(cmd.db()).get_geo(&key);
        let items: Vec<Value> = members
            .iter()
            .map(|member| {
                match index.and_then(|index| index.position(member)) {
                    Some((lat, lon)) => Value::Array(vec![
                        Value::Bulk(format!("{lon:.6}")),
                        Value::Bulk(format!("{lat:.6}")),
                    ]),
                    None => Value::NullArray,
                }
            })
            .collect();

        cmd.write_value(&Value::Array(items));
        cmd.set_done();
        Ok(())
    }

    /// GEODIST key m1 m2 [unit] — Haversine distance, metres by default.
    pub(crate) fn cmd_geodist(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() < 3 {
            return Err(not_enough_args());
        }
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let key = parse_str(&args[0])?.to_string();
        let member1 = parse_str(&args[1])?.to_string();
        let member2 = parse_str(&args[2])?.to_string();
        let factor = match args.get(3) {
            Some(arg) => {
                let unit = parse_str(arg)?;
                unit_to_meters(unit).ok_or_else(|| {
                    ServerError::InvalidArguments(format!("unsupported unit: {unit}"))
                })?
            }
            None => 1.0,
        };

        let Some(index) = self.db_mut(cmd.db()).get_geo(&key) else {
            return Err(ServerError::InvalidArguments(format!(
                "member '{member1}' missing in set"
            )));
        };
        let distance = index.distance(&member1, &member2)? / factor;

        if self.should_write_output(cmd) {
            cmd.write_value(&Value::Bulk(format!("{distance:.4}")));
        }
        cmd.set_done();
        Ok(())
    }

    /// GEOSEARCH key FROMLONLAT lon lat BYRADIUS radius unit — members
    /// within the radius, closest first.
    pub(crate) fn cmd_geosearch(&mut self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        reject_sub_mode(cmd)?;
        let args = &cmd.frame.args;
        if args.len() < 7 {
            return Err(not_enough_args());
        }
        if self.check_in_tx(cmd) {
            cmd.set_done();
            return Ok(());
        }

        let key = parse_str(&args[0])?.to_string();
        if !parse_str(&args[1])?.eq_ignore_ascii_case("FROMLONLAT") {
            return Err(ServerError::InvalidArguments(
                "expected FROMLONLAT".to_string(),
            ));
        }
        let lon = parse_float(&args[2])?;
        let lat = parse_float(&args[3])?;
        if !parse_str(&args[4])?.eq_ignore_ascii_case("BYRADIUS") {
            return Err(ServerError::InvalidArguments(
                "expected BYRADIUS".to_string(),
            ));
        }
        let radius = parse_float(&args[5])?;
        let unit = parse_str(&args[6])?;
        let factor = unit_to_meters(unit).ok_or_else(|| {
            ServerError::InvalidArguments(format!("unsupported unit: {unit}"))
        })?;

        let hits = match self.db_mut(cmd.db()).get_geo(&key) {
            Some(index) => index.search_radius(lat, lon, radius * factor),
            None => Vec::new(),
        };
        let members: Vec<Value> = hits
            .into_iter()
            .map(|hit| Value::Bulk(hit.member))
            .collect();

        cmd.write_value(&Value::Array(members));
        cmd.set_done();
        Ok(())
    }
}
