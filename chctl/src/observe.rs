//! Observed-state reads.
//!
//! Everything here queries the `system.*` tables over the transport and folds
//! the answers into plain observed records, canonicalized with the same rules
//! as the declared side so the diff layer can compare them directly.
//!
//! Two rules hold throughout:
//! - only objects with `storage = 'local directory'` are visible. Users and
//!   roles from XML configs or LDAP are externally managed and must never be
//!   diffed, altered or dropped;
//! - observation failures degrade to an empty result with a warning. An
//!   unreadable server looks like an empty one, which at worst re-issues
//!   idempotent statements and never triggers a drop (drops require an
//!   explicit absent declaration).

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Error;
use crate::privileges::{canonicalize_privileges, AllPrivileges};
use crate::statement::quote;
use crate::transport::{ResultFormat, Transport};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedUser {
    pub name: String,
    /// Internal object id; non-empty means the object exists.
    pub id: String,
    pub auth_type: String,
    pub profile: Option<String>,
    pub host_ip: Vec<String>,
    pub host_names: Vec<String>,
    pub host_like: Vec<String>,
    pub host_regexp: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedRole {
    pub name: String,
    pub id: String,
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedProfile {
    pub name: String,
    pub id: String,
    pub settings: BTreeMap<String, String>,
}

/// One grantee/table pairing with its canonical privilege set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedGrant {
    pub user: String,
    pub table: String,
    pub privileges: Vec<String>,
    pub grant_option: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedRoleGrant {
    pub role: String,
    pub users: Vec<String>,
}

/// One row of the quota/limits join, i.e. one interval of one quota.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedQuotaInterval {
    pub duration: u64,
    pub randomized: bool,
    pub limits: Vec<(&'static str, u64)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedQuota {
    pub name: String,
    pub id: String,
    pub keyed_by: Vec<String>,
    pub intervals: Vec<ObservedQuotaInterval>,
    pub users: Vec<String>,
}

/// Reads observed state through a transport.
pub struct Observer<'a> {
    transport: &'a dyn Transport,
    all: &'a AllPrivileges,
}

impl<'a> Observer<'a> {
    pub fn new(transport: &'a dyn Transport, all: &'a AllPrivileges) -> Self {
        Self { transport, all }
    }

    async fn rows(&self, entity: &'static str, sql: &str) -> Vec<serde_json::Map<String, Value>> {
        match self.transport.execute(sql, ResultFormat::Json).await {
            Ok(result) => result.into_rows(),
            Err(source) => {
                warn!("{}, treating as empty", Error::Observation { entity, source });
                vec![]
            }
        }
    }

    async fn lines(&self, entity: &'static str, sql: &str) -> Vec<String> {
        match self.transport.execute(sql, ResultFormat::Raw).await {
            Ok(result) => result.into_lines(),
            Err(source) => {
                warn!("{}, treating as empty", Error::Observation { entity, source });
                vec![]
            }
        }
    }

    pub async fn users(&self) -> Vec<ObservedUser> {
        let sql = "SELECT u.name AS name, toString(u.id) AS id, toString(u.auth_type) AS auth_type, \
                   u.host_ip AS host_ip, u.host_names AS host_names, \
                   u.host_names_like AS host_like, u.host_names_regexp AS host_regexp, \
                   s.inherit_profile AS profile \
                   FROM system.users u \
                   LEFT JOIN system.settings_profile_elements s ON u.name = s.user_name \
                   WHERE u.storage = 'local directory'";
        self.rows("users", sql)
            .await
            .iter()
            .map(|row| ObservedUser {
                name: str_field(row, "name"),
                id: str_field(row, "id"),
                auth_type: str_field(row, "auth_type"),
                profile: opt_str_field(row, "profile"),
                host_ip: list_field(row, "host_ip"),
                host_names: list_field(row, "host_names"),
                host_like: list_field(row, "host_like"),
                host_regexp: list_field(row, "host_regexp"),
            })
            .collect()
    }

    pub async fn roles(&self) -> Vec<ObservedRole> {
        let sql = "SELECT r.name AS name, toString(r.id) AS id, s.inherit_profile AS profile \
                   FROM system.roles r \
                   LEFT JOIN system.settings_profile_elements s ON r.name = s.role_name \
                   WHERE r.storage = 'local directory'";
        self.rows("roles", sql)
            .await
            .iter()
            .map(|row| ObservedRole {
                name: str_field(row, "name"),
                id: str_field(row, "id"),
                profile: opt_str_field(row, "profile"),
            })
            .collect()
    }

    pub async fn profiles(&self) -> Vec<ObservedProfile> {
        let sql = "SELECT name, toString(id) AS id FROM system.settings_profiles \
                   WHERE storage = 'local directory'";
        let mut profiles = vec![];
        for row in self.rows("settings profiles", sql).await {
            let name = str_field(&row, "name");
            let settings = self.profile_settings(&name).await;
            profiles.push(ObservedProfile {
                id: str_field(&row, "id"),
                name,
                settings,
            });
        }
        profiles
    }

    /// The concrete settings of one profile. Inheritance rows (no setting
    /// name) are skipped; they surface through the `inherit_profile` joins.
    async fn profile_settings(&self, name: &str) -> BTreeMap<String, String> {
        let sql = format!(
            "SELECT setting_name, toString(value) AS value \
             FROM system.settings_profile_elements WHERE profile_name = {}",
            quote(name)
        );
        self.rows("profile settings", &sql)
            .await
            .iter()
            .filter_map(|row| {
                let key = opt_str_field(row, "setting_name")?;
                Some((key, str_field(row, "value")))
            })
            .collect()
    }

    /// Every locally-stored user and role name, for the grant walk.
    async fn grantee_names(&self) -> Vec<String> {
        let sql = "SELECT name FROM system.users WHERE storage = 'local directory' \
                   UNION ALL \
                   SELECT name FROM system.roles WHERE storage = 'local directory'";
        let mut names = self.lines("users and roles", sql).await;
        names.sort();
        names.dedup();
        names
    }

    /// Table grants of every locally-stored user and role, one record per
    /// grantee/table pairing, privileges canonicalized.
    ///
    /// A grantee whose grants cannot be listed is skipped with a warning;
    /// the rest of the walk continues.
    pub async fn grants(&self) -> Vec<ObservedGrant> {
        let mut grants = vec![];
        for name in self.grantee_names().await {
            let sql = format!("SHOW GRANTS FOR {}", quote(&name));
            let lines = match self.transport.execute(&sql, ResultFormat::Raw).await {
                Ok(result) => result.into_lines(),
                Err(source) => {
                    warn!(grantee = %name, "{}, skipping", Error::Observation { entity: "grants", source });
                    continue;
                }
            };

            // Merge per table first, canonicalize once per pairing.
            let mut by_table: BTreeMap<String, (Vec<String>, bool)> = BTreeMap::new();
            for line in lines {
                match parse_grant_line(&line) {
                    Some(parsed) => {
                        let entry = by_table.entry(parsed.table).or_default();
                        entry.0.extend(parsed.privileges);
                        entry.1 |= parsed.grant_option;
                    }
                    None => debug!(grantee = %name, line = %line, "skipping non-table grant line"),
                }
            }
            for (table, (privileges, grant_option)) in by_table {
                grants.push(ObservedGrant {
                    user: name.clone(),
                    table,
                    privileges: canonicalize_privileges(&privileges, self.all),
                    grant_option,
                });
            }
        }
        grants
    }

    /// Membership of every locally-stored role, sorted per role.
    pub async fn role_grants(&self) -> Vec<ObservedRoleGrant> {
        let sql = "SELECT g.user_name AS user_name, g.granted_role_name AS role \
                   FROM system.role_grants g \
                   INNER JOIN system.roles r ON r.name = g.granted_role_name \
                   WHERE r.storage = 'local directory'";
        let mut by_role: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in self.rows("role grants", sql).await {
            let user = opt_str_field(&row, "user_name");
            let role = str_field(&row, "role");
            if let Some(user) = user {
                by_role.entry(role).or_default().push(user);
            }
        }
        by_role
            .into_iter()
            .map(|(role, mut users)| {
                users.sort();
                users.dedup();
                ObservedRoleGrant { role, users }
            })
            .collect()
    }

    /// Locally-stored quotas joined with their per-interval limits.
    pub async fn quotas(&self) -> Vec<ObservedQuota> {
        let sql = "SELECT q.name AS name, toString(q.id) AS id, q.keys AS keys, \
                   q.apply_to_list AS apply_to_list, \
                   l.duration AS duration, l.is_randomized_interval AS is_randomized_interval, \
                   l.max_queries AS max_queries, l.max_errors AS max_errors, \
                   l.max_result_rows AS max_result_rows, l.max_result_bytes AS max_result_bytes, \
                   l.max_read_rows AS max_read_rows, l.max_read_bytes AS max_read_bytes, \
                   l.max_execution_time AS max_execution_time \
                   FROM system.quotas q \
                   LEFT JOIN system.quota_limits l ON q.name = l.quota_name \
                   WHERE q.storage = 'local directory'";
        let mut quotas: BTreeMap<String, ObservedQuota> = BTreeMap::new();
        for row in self.rows("quotas", sql).await {
            let name = str_field(&row, "name");
            let quota = quotas.entry(name.clone()).or_insert_with(|| {
                let mut users = list_field(&row, "apply_to_list");
                users.sort();
                users.dedup();
                ObservedQuota {
                    name,
                    id: str_field(&row, "id"),
                    keyed_by: list_field(&row, "keys"),
                    intervals: vec![],
                    users,
                }
            });
            if let Some(duration) = u64_field(&row, "duration") {
                let limits = [
                    "max_queries",
                    "max_errors",
                    "max_result_rows",
                    "max_result_bytes",
                    "max_read_rows",
                    "max_read_bytes",
                    "max_execution_time",
                ]
                .iter()
                .filter_map(|key| u64_field(&row, key).map(|v| (limit_clause_name(key), v)))
                .collect();
                quota.intervals.push(ObservedQuotaInterval {
                    duration,
                    randomized: bool_field(&row, "is_randomized_interval"),
                    limits,
                });
            }
        }
        quotas.into_values().collect()
    }
}

fn limit_clause_name(column: &str) -> &'static str {
    match column {
        "max_queries" => "QUERIES",
        "max_errors" => "ERRORS",
        "max_result_rows" => "RESULT ROWS",
        "max_result_bytes" => "RESULT BYTES",
        "max_read_rows" => "READ ROWS",
        "max_read_bytes" => "READ BYTES",
        _ => "EXECUTION TIME",
    }
}

fn str_field(row: &serde_json::Map<String, Value>, key: &str) -> String {
    match row.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn opt_str_field(row: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn list_field(row: &serde_json::Map<String, Value>, key: &str) -> Vec<String> {
    row.get(key)
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Numeric field tolerant of the JSON output format quoting 64-bit integers
/// as strings. Nulls and zeros both mean "no limit".
fn u64_field(row: &serde_json::Map<String, Value>, key: &str) -> Option<u64> {
    let value = match row.get(key)? {
        Value::Number(n) => n.as_f64().map(|f| f as u64),
        Value::String(s) => s.parse::<f64>().ok().map(|f| f as u64),
        _ => None,
    }?;
    if value == 0 {
        None
    } else {
        Some(value)
    }
}

fn bool_field(row: &serde_json::Map<String, Value>, key: &str) -> bool {
    match row.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        Some(Value::String(s)) => s == "1" || s == "true",
        _ => false,
    }
}

#[derive(Debug, PartialEq)]
struct ParsedGrant {
    privileges: Vec<String>,
    table: String,
    grant_option: bool,
}

/// Parse one `SHOW GRANTS` line into its privilege list and table target.
///
/// Lines that are not table grants (role memberships, revokes, default-role
/// assignments) have no ` ON ` segment and are skipped.
fn parse_grant_line(line: &str) -> Option<ParsedGrant> {
    let line = line.trim();
    let rest = line.strip_prefix("GRANT ")?;
    let on_idx = rest.find(" ON ")?;
    let privileges = split_privilege_list(&rest[..on_idx]);
    let after_on = &rest[on_idx + 4..];
    let to_idx = after_on.rfind(" TO ")?;
    let table = after_on[..to_idx].trim().to_string();
    let tail = &after_on[to_idx + 4..];
    let grant_option = tail.trim_end().ends_with("WITH GRANT OPTION");
    Some(ParsedGrant {
        privileges,
        table,
        grant_option,
    })
}

/// Split a privilege list on top-level commas only; commas inside a column
/// segment stay with their privilege.
fn split_privilege_list(text: &str) -> Vec<String> {
    let mut out = vec![];
    let mut depth = 0u32;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                out.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}
