use std::sync::RwLock;

use crate::error::ServerError;
use crate::resp::Value;

const VERSION: &str = "7.2.0-rudis";

/// Server statistics backing the INFO command.
///
/// Counters are mutated from reactor tasks and the replication machinery
/// while the core renders them, so each section guards its fields with a
/// read/write lock. Rendering walks a static field table per section
/// instead of reflecting over the structs.
#[derive(Debug)]
pub struct Info {
    replication: RwLock<ReplicationFields>,
    clients: RwLock<ClientsFields>,
    server: RwLock<ServerFields>,
}

#[derive(Debug, Default)]
struct ReplicationFields {
    role: String,
    connected_slaves: u64,
    master_replid: String,
    master_repl_offset: u64,
    second_repl_offset: i64,
    repl_backlog_active: u64,
    repl_backlog_size: u64,
    repl_backlog_first_byte_offset: u64,
    repl_backlog_histlen: u64,
}

#[derive(Debug, Default)]
struct ClientsFields {
    connected_clients: u64,
}

#[derive(Debug, Default)]
struct ServerFields {
    redis_version: String,
}

type FieldTable<T> = &'static [(&'static str, fn(&T) -> String)];

const REPLICATION_FIELDS: FieldTable<ReplicationFields> = &[
    ("role", |f| f.role.clone()),
    ("connected_slaves", |f| f.connected_slaves.to_string()),
    ("master_replid", |f| f.master_replid.clone()),
    ("master_repl_offset", |f| f.master_repl_offset.to_string()),
    ("second_repl_offset", |f| f.second_repl_offset.to_string()),
    ("repl_backlog_active", |f| f.repl_backlog_active.to_string()),
    ("repl_backlog_size", |f| f.repl_backlog_size.to_string()),
    ("repl_backlog_first_byte_offset", |f| {
        f.repl_backlog_first_byte_offset.to_string()
    }),
    ("repl_backlog_histlen", |f| f.repl_backlog_histlen.to_string()),
];

const CLIENTS_FIELDS: FieldTable<ClientsFields> = &[("connected_clients", |f| {
    f.connected_clients.to_string()
})];

const SERVER_FIELDS: FieldTable<ServerFields> = &[("redis_version", |f| f.redis_version.clone())];

impl Info {
    pub fn new(role: &str, repl_id: &str) -> Self {
        Info {
            replication: RwLock::new(ReplicationFields {
                role: role.to_string(),
                master_replid: repl_id.to_string(),
                second_repl_offset: -1,
                ..ReplicationFields::default()
            }),
            clients: RwLock::new(ClientsFields::default()),
            server: RwLock::new(ServerFields {
                redis_version: VERSION.to_string(),
            }),
        }
    }

    pub fn incr_connected_clients(&self) {
        self.clients.write().expect("info lock poisoned").connected_clients += 1;
    }

    pub fn decr_connected_clients(&self) {
        let mut clients = self.clients.write().expect("info lock poisoned");
        clients.connected_clients = clients.connected_clients.saturating_sub(1);
    }

    pub fn set_connected_slaves(&self, count: u64) {
        self.replication
            .write()
            .expect("info lock poisoned")
            .connected_slaves = count;
    }

    pub fn set_master_repl_offset(&self, offset: u64) {
        self.replication
            .write()
            .expect("info lock poisoned")
            .master_repl_offset = offset;
    }

    pub fn role(&self) -> String {
        self.replication.read().expect("info lock poisoned").role.clone()
    }

    /// Full INFO text: every section in fixed order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.render_replication());
        out.push_str(&self.render_clients());
        out.push_str(&self.render_server());
        out
    }

    /// One section by case-insensitive name.
    pub fn render_section(&self, section: &str) -> Result<String, ServerError> {
        match section.to_lowercase().as_str() {
            "replication" => Ok(self.render_replication()),
            "clients" => Ok(self.render_clients()),
            "server" => Ok(self.render_server()),
            other => Err(ServerError::UnknownSection(other.to_string())),
        }
    }

    /// The INFO reply is a bulk string of the rendered text.
    pub fn to_value(&self, section: Option<&str>) -> Result<Value, ServerError> {
        let text = match section {
            Some(section) => self.render_section(section)?,
            None => self.render(),
        };
        Ok(Value::Bulk(text))
    }

    fn render_replication(&self) -> String {
        let fields = self.replication.read().expect("info lock poisoned");
        render_section("Replication", REPLICATION_FIELDS, &fields)
    }

    fn render_clients(&self) -> String {
        let fields = self.clients.read().expect("info lock poisoned");
        render_section("Clients", CLIENTS_FIELDS, &fields)
    }

    fn render_server(&self) -> String {
        let fields = self.server.read().expect("info lock poisoned");
        render_section("Server", SERVER_FIELDS, &fields)
    }
}

fn render_section<T>(name: &str, table: FieldTable<T>, fields: &T) -> String {
    let mut out = format!("# {name}\n");
    for (key, get) in table {
        out.push_str(key);
        out.push(':');
        out.push_str(&get(fields));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_required_fields() {
        let info = Info::new("master", "abc123");
        info.incr_connected_clients();
        info.set_master_repl_offset(42);

        let text = info.render();
        let required = vec![
            "# Replication",
            "role:master",
            "connected_slaves:0",
            "master_replid:abc123",
            "master_repl_offset:42",
            "second_repl_offset:-1",
            "repl_backlog_active:0",
            "repl_backlog_size:0",
            "repl_backlog_first_byte_offset:0",
            "repl_backlog_histlen:0",
            "# Clients",
            "connected_clients:1",
            "# Server",
            "redis_version:",
        ];
        for needle in required {
            assert!(text.contains(needle), "missing {needle:?} in {text:?}");
        }
    }

    #[test]
    fn test_section_lookup_is_case_insensitive() {
        let info = Info::new("slave", "id");
        let section = info.render_section("REPLICATION").expect("section exists");
        assert!(section.starts_with("# Replication\n"));
        assert!(section.contains("role:slave"));
        assert!(info.render_section("keyspace").is_err());
    }

    #[test]
    fn test_client_counter_saturates() {
        let info = Info::new("master", "id");
        info.decr_connected_clients();
        assert!(info.render().contains("connected_clients:0"));
    }
}
