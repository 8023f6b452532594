//! Declared (desired) state records.
//!
//! One explicit struct per entity kind, deserialized from the declarations
//! YAML file and validated at this boundary. The reconcilers downstream
//! assume well-formed records and never coerce types at runtime.
//!
//! ```yaml
//! profiles:
//!   - name: restricted
//!     settings:
//!       readonly: 1
//! users:
//!   - name: alice
//!     profile: restricted
//!     host_ip: ["10.0.0.0/8"]
//! grants:
//!   - user: alice
//!     table: db.events
//!     privileges: [SELECT, "INSERT(ts, value)"]
//! role_grants:
//!   - role: ingest
//!     users: [alice, bob]
//! quotas:
//!   - name: per-user
//!     interval: 1 hour
//!     max_queries: 1000
//!     users: [alice]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Desired existence of a declared object.
///
/// Absence of a declaration never implies deletion; only an explicit
/// `ensure: absent` does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

/// A profile setting value as written in YAML. The backend setting system is
/// untyped text, so every value is coerced to a string here and compared as a
/// string everywhere downstream.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(v) => write!(f, "{v}"),
            SettingValue::Int(v) => write!(f, "{v}"),
            SettingValue::Float(v) => write!(f, "{v}"),
            SettingValue::Text(v) => write!(f, "{v}"),
        }
    }
}

/// Quota interval: raw seconds or a `"<n> <unit>"` convenience form.
///
/// Units convert once, at declaration time, with fixed multipliers. The
/// engine only ever works in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Interval {
    Seconds(u64),
    Text(String),
}

impl Default for Interval {
    fn default() -> Self {
        Interval::Seconds(3600)
    }
}

impl Interval {
    /// Normalize to seconds. `"1 day"` -> 86400, plural units accepted.
    pub fn as_seconds(&self) -> std::result::Result<u64, String> {
        match self {
            Interval::Seconds(s) => Ok(*s),
            Interval::Text(text) => {
                let mut parts = text.split_whitespace();
                let amount: u64 = parts
                    .next()
                    .ok_or_else(|| format!("empty interval '{text}'"))?
                    .parse()
                    .map_err(|_| format!("invalid interval amount in '{text}'"))?;
                let unit = parts.next().ok_or_else(|| format!("missing interval unit in '{text}'"))?;
                if parts.next().is_some() {
                    return Err(format!("invalid interval '{text}'"));
                }
                let multiplier = match unit.to_lowercase().trim_end_matches('s') {
                    "second" => 1,
                    "minute" => 60,
                    "hour" => 3600,
                    "day" => 86_400,
                    "week" => 604_800,
                    "month" => 2_628_000,
                    "quarter" => 7_884_000,
                    "year" => 31_536_000,
                    other => return Err(format!("unknown interval unit '{other}'")),
                };
                Ok(amount * multiplier)
            }
        }
    }
}

fn default_host_ip() -> Vec<String> {
    vec!["::/0".to_string()]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UserSpec {
    pub name: String,
    #[serde(default)]
    pub ensure: Ensure,
    /// Execute statements with the cluster-wide directive.
    #[serde(default)]
    pub distributed: bool,
    /// SHA-256 password hash; empty means the explicit no-password sentinel.
    #[serde(default)]
    pub password_hash: String,
    /// Settings profile inherited by the user.
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default = "default_host_ip")]
    pub host_ip: Vec<String>,
    #[serde(default)]
    pub host_names: Vec<String>,
    #[serde(default)]
    pub host_like: Vec<String>,
    #[serde(default)]
    pub host_regexp: Vec<String>,
}

impl UserSpec {
    fn validate(&self) -> Result<()> {
        let hash = &self.password_hash;
        let valid = hash.is_empty() || (hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()));
        if !valid {
            return Err(Error::Validation {
                entity: "user",
                name: self.name.clone(),
                message: "password_hash must be a SHA-256 hex digest or empty".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RoleSpec {
    pub name: String,
    #[serde(default)]
    pub ensure: Ensure,
    #[serde(default)]
    pub distributed: bool,
    #[serde(default)]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileSpec {
    pub name: String,
    #[serde(default)]
    pub ensure: Ensure,
    #[serde(default = "default_true")]
    pub distributed: bool,
    #[serde(default)]
    pub settings: BTreeMap<String, SettingValue>,
}

impl ProfileSpec {
    /// Settings coerced to the canonical string-to-string map.
    pub fn settings_as_strings(&self) -> BTreeMap<String, String> {
        self.settings.iter().map(|(k, v)| (k.clone(), v.to_string())).collect()
    }

    fn validate(&self) -> Result<()> {
        if self.ensure == Ensure::Present && self.settings.is_empty() {
            return Err(Error::Validation {
                entity: "profile",
                name: self.name.clone(),
                message: "settings map cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GrantSpec {
    /// User or role the privileges apply to.
    pub user: String,
    /// Table target, `db.table`, `db.*` or `*.*`.
    pub table: String,
    #[serde(default)]
    pub privileges: Vec<String>,
    /// Tri-state grant option: omitted preserves whatever the server holds,
    /// `true` asserts it, `false` explicitly revokes it.
    #[serde(default)]
    pub grant_option: Option<bool>,
    #[serde(default)]
    pub ensure: Ensure,
    #[serde(default)]
    pub distributed: bool,
}

impl GrantSpec {
    /// Identity key, `user/table`.
    pub fn identity(&self) -> String {
        format!("{}/{}", self.user, self.table)
    }

    fn wildcard_table(&self) -> bool {
        self.table == "*.*" || self.table.ends_with(".*")
    }

    fn validate(&self) -> Result<()> {
        let invalid = |message: String| Error::Validation {
            entity: "grant",
            name: self.identity(),
            message,
        };
        if self.user.trim().is_empty() {
            return Err(invalid("user is required".to_string()));
        }
        if self.table.trim().is_empty() {
            return Err(invalid("table is required".to_string()));
        }
        if self.ensure == Ensure::Present && self.privileges.is_empty() {
            return Err(invalid("privileges cannot be empty".to_string()));
        }
        for token in &self.privileges {
            let token = token.trim();
            if token.is_empty() {
                return Err(invalid("privilege tokens cannot be empty".to_string()));
            }
            if let Some(idx) = token.find('(') {
                let well_formed = idx > 0
                    && token.ends_with(')')
                    && token[idx + 1..token.len() - 1]
                        .split(',')
                        .all(|col| !col.trim().is_empty());
                if !well_formed {
                    return Err(invalid(format!("malformed column segment in privilege '{token}'")));
                }
                if self.wildcard_table() {
                    return Err(invalid("columns cannot be specified when the table target is a wildcard".to_string()));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RoleGrantSpec {
    /// Role whose membership is being managed.
    pub role: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub ensure: Ensure,
    #[serde(default)]
    pub distributed: bool,
}

impl RoleGrantSpec {
    /// Membership compared and reported sorted.
    pub fn sorted_users(&self) -> Vec<String> {
        let mut users = self.users.clone();
        users.sort();
        users.dedup();
        users
    }

    fn validate(&self) -> Result<()> {
        if self.ensure == Ensure::Present && self.users.is_empty() {
            return Err(Error::Validation {
                entity: "role_grant",
                name: self.role.clone(),
                message: "users cannot be empty".to_string(),
            });
        }
        if self.users.iter().any(|u| u.trim().is_empty()) {
            return Err(Error::Validation {
                entity: "role_grant",
                name: self.role.clone(),
                message: "users cannot contain empty names".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaSpec {
    pub name: String,
    #[serde(default)]
    pub ensure: Ensure,
    #[serde(default = "default_true")]
    pub distributed: bool,
    #[serde(default)]
    pub interval: Interval,
    #[serde(default)]
    pub randomized_interval: bool,
    /// Sharing keys (`user_name`, `ip_address`, ...). Empty means not keyed.
    #[serde(default)]
    pub keyed_by: Vec<String>,
    #[serde(default)]
    pub max_queries: Option<u64>,
    #[serde(default)]
    pub max_errors: Option<u64>,
    #[serde(default)]
    pub max_read_rows: Option<u64>,
    #[serde(default)]
    pub max_read_bytes: Option<u64>,
    #[serde(default)]
    pub max_result_rows: Option<u64>,
    #[serde(default)]
    pub max_result_bytes: Option<u64>,
    #[serde(default)]
    pub max_execution_time: Option<u64>,
    #[serde(default)]
    pub users: Vec<String>,
}

impl QuotaSpec {
    /// Declared limits in statement order, as `(clause name, value)` pairs.
    pub fn limits(&self) -> Vec<(&'static str, u64)> {
        [
            ("QUERIES", self.max_queries),
            ("ERRORS", self.max_errors),
            ("RESULT ROWS", self.max_result_rows),
            ("RESULT BYTES", self.max_result_bytes),
            ("READ ROWS", self.max_read_rows),
            ("READ BYTES", self.max_read_bytes),
            ("EXECUTION TIME", self.max_execution_time),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }

    /// Interval duration in seconds, collapsed to zero when no limit is set
    /// (an unlimited, always-reset quota is meaningless otherwise).
    pub fn effective_interval(&self) -> u64 {
        if self.limits().is_empty() {
            0
        } else {
            // Validated at the boundary; a stored spec always parses.
            self.interval.as_seconds().unwrap_or(0)
        }
    }

    pub fn sorted_users(&self) -> Vec<String> {
        let mut users = self.users.clone();
        users.sort();
        users.dedup();
        users
    }

    fn validate(&self) -> Result<()> {
        let invalid = |message: String| Error::Validation {
            entity: "quota",
            name: self.name.clone(),
            message,
        };
        if let Err(message) = self.interval.as_seconds() {
            return Err(invalid(message));
        }
        if self.ensure == Ensure::Present && self.users.is_empty() {
            return Err(invalid("users cannot be empty".to_string()));
        }
        if self.users.iter().any(|u| u.trim().is_empty()) {
            return Err(invalid("users cannot contain empty names".to_string()));
        }
        Ok(())
    }
}

/// The full declared state for one reconciliation pass.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Declarations {
    pub profiles: Vec<ProfileSpec>,
    pub users: Vec<UserSpec>,
    pub roles: Vec<RoleSpec>,
    pub grants: Vec<GrantSpec>,
    pub role_grants: Vec<RoleGrantSpec>,
    pub quotas: Vec<QuotaSpec>,
}

impl Declarations {
    /// Load a declarations file (YAML).
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let declarations: Declarations = Figment::new().merge(Yaml::file(path.as_ref())).extract()?;
        declarations.validate()?;
        Ok(declarations)
    }

    /// Validate every record, failing on the first malformed declaration.
    pub fn validate(&self) -> Result<()> {
        for profile in &self.profiles {
            profile.validate()?;
        }
        for user in &self.users {
            user.validate()?;
        }
        for grant in &self.grants {
            grant.validate()?;
        }
        for role_grant in &self.role_grants {
            role_grant.validate()?;
        }
        for quota in &self.quotas {
            quota.validate()?;
        }
        Ok(())
    }
}
