//! Statement rendering.
//!
//! Every mutating statement chctl issues is built here, from typed fragments,
//! with a single quoting function for names and literal values. Nothing else
//! in the crate concatenates SQL.
//!
//! Statements are rendered to be idempotent where the backend allows it:
//! CREATE/ALTER forms carry the full desired state of the object, quotas are
//! always `CREATE QUOTA OR REPLACE` (altering only the interval of an
//! existing quota leaves orphaned rows in `system.quota_limits`, so in-place
//! alteration is avoided entirely), and GRANT/REVOKE pairs are derived from
//! set diffs so re-running a converged plan is a no-op.

use crate::spec::{ProfileSpec, QuotaSpec, RoleSpec, UserSpec};

/// Whether an object is being brought into existence or updated in place.
///
/// Chosen from observation: a non-empty internal id means the object exists
/// and takes the ALTER form, otherwise CREATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Alter,
}

impl Action {
    fn verb(self) -> &'static str {
        match self {
            Action::Create => "CREATE",
            Action::Alter => "ALTER",
        }
    }
}

/// Quote a name or literal value for inclusion in a statement.
///
/// Single-quoted, with backslash and quote escaping. This is the only place
/// user-controlled values enter statement text.
pub fn quote(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('\'');
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            _ => escaped.push(c),
        }
    }
    escaped.push('\'');
    escaped
}

/// Quote a list of names and join with commas: `'a', 'b', 'c'`.
pub fn quote_list<S: AsRef<str>>(values: &[S]) -> String {
    values.iter().map(|v| quote(v.as_ref())).collect::<Vec<_>>().join(", ")
}

/// A statement under construction: an ordered list of non-empty fragments,
/// joined by single spaces on render.
#[derive(Debug, Default)]
pub struct Statement {
    fragments: Vec<String>,
}

impl Statement {
    pub fn new(head: impl Into<String>) -> Self {
        Self {
            fragments: vec![head.into()],
        }
    }

    /// Append a fragment. Empty fragments are dropped so optional clauses can
    /// be passed through unconditionally.
    pub fn fragment(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.trim().is_empty() {
            self.fragments.push(text);
        }
        self
    }

    /// Append the cluster-wide execution directive, when a cluster is known.
    ///
    /// Callers resolve the `distributed` flag against the environment first;
    /// an unknown cluster name renders nothing (soft-fail, see
    /// [`crate::reconcile`]).
    pub fn on_cluster(self, cluster: Option<&str>) -> Self {
        match cluster {
            Some(name) => self.fragment(format!("ON CLUSTER {}", quote(name))),
            None => self,
        }
    }

    pub fn render(&self) -> String {
        self.fragments.join(" ")
    }
}

/// `IDENTIFIED WITH ...` clause for a user.
///
/// An empty hash is the explicit no-password sentinel. The hash is
/// upper-cased so the rendered form matches the canonical comparison form
/// (the backend is case-insensitive here, but diff churn is not free).
fn identified_with(password_hash: &str) -> String {
    if password_hash.is_empty() {
        "IDENTIFIED WITH NO_PASSWORD".to_string()
    } else {
        format!("IDENTIFIED WITH SHA256_HASH BY {}", quote(&password_hash.to_uppercase()))
    }
}

/// `HOST ...` clause from the user's host-restriction rule categories.
///
/// Each non-empty category renders as `KEYWORD 'v1', 'v2'`; categories are
/// joined by commas. All-empty rules render no clause at all, meaning "no
/// restriction", not "deny all".
fn host_clause(user: &UserSpec) -> String {
    let categories: [(&str, &[String]); 4] = [
        ("IP", &user.host_ip),
        ("NAME", &user.host_names),
        ("LIKE", &user.host_like),
        ("REGEXP", &user.host_regexp),
    ];
    let rendered: Vec<String> = categories
        .iter()
        .filter(|(_, hosts)| !hosts.is_empty())
        .map(|(keyword, hosts)| format!("{} {}", keyword, quote_list(hosts)))
        .collect();
    if rendered.is_empty() {
        String::new()
    } else {
        format!("HOST {}", rendered.join(", "))
    }
}

fn settings_profile(profile: Option<&str>) -> String {
    match profile {
        Some(name) if !name.is_empty() => format!("SETTINGS PROFILE {}", quote(name)),
        _ => String::new(),
    }
}

/// CREATE or ALTER a user, carrying its full declared state.
///
/// `inline_profile` is false on server releases where profile inheritance in
/// CREATE/ALTER USER is defective; the caller then follows up with
/// [`assign_user_profile`].
pub fn create_or_alter_user(user: &UserSpec, action: Action, cluster: Option<&str>, inline_profile: bool) -> String {
    let stmt = Statement::new(format!("{} USER {}", action.verb(), quote(&user.name)))
        .on_cluster(cluster)
        .fragment(identified_with(&user.password_hash))
        .fragment(host_clause(user));
    let stmt = if inline_profile {
        stmt.fragment(settings_profile(user.profile.as_deref()))
    } else {
        stmt
    };
    stmt.render()
}

/// Follow-up profile assignment for releases with the inheritance defect.
pub fn assign_user_profile(name: &str, profile: &str, cluster: Option<&str>) -> String {
    Statement::new(format!("ALTER USER {}", quote(name)))
        .on_cluster(cluster)
        .fragment(settings_profile(Some(profile)))
        .render()
}

pub fn drop_user(name: &str, cluster: Option<&str>) -> String {
    Statement::new(format!("DROP USER {}", quote(name))).on_cluster(cluster).render()
}

pub fn create_or_alter_role(role: &RoleSpec, action: Action, cluster: Option<&str>, inline_profile: bool) -> String {
    let stmt = Statement::new(format!("{} ROLE {}", action.verb(), quote(&role.name))).on_cluster(cluster);
    let stmt = if inline_profile {
        stmt.fragment(settings_profile(role.profile.as_deref()))
    } else {
        stmt
    };
    stmt.render()
}

pub fn assign_role_profile(name: &str, profile: &str, cluster: Option<&str>) -> String {
    Statement::new(format!("ALTER ROLE {}", quote(name)))
        .on_cluster(cluster)
        .fragment(settings_profile(Some(profile)))
        .render()
}

pub fn drop_role(name: &str, cluster: Option<&str>) -> String {
    Statement::new(format!("DROP ROLE {}", quote(name))).on_cluster(cluster).render()
}

/// CREATE or ALTER a settings profile with its full settings map.
pub fn create_or_alter_profile(profile: &ProfileSpec, action: Action, cluster: Option<&str>) -> String {
    let settings = profile
        .settings_as_strings()
        .iter()
        .map(|(key, value)| format!("{} = {}", key, quote(value)))
        .collect::<Vec<_>>()
        .join(", ");
    Statement::new(format!("{} SETTINGS PROFILE {}", action.verb(), quote(&profile.name)))
        .on_cluster(cluster)
        .fragment(format!("SETTINGS {settings}"))
        .render()
}

pub fn drop_profile(name: &str, cluster: Option<&str>) -> String {
    Statement::new(format!("DROP SETTINGS PROFILE {}", quote(name)))
        .on_cluster(cluster)
        .render()
}

/// Full-state `CREATE QUOTA OR REPLACE`.
///
/// Always a replace, never an alter: carries keying, randomization, interval
/// duration, every limit and the subject list in one statement. A quota with
/// no limits renders `NO LIMITS` with a zero-second interval.
pub fn create_or_replace_quota(quota: &QuotaSpec, cluster: Option<&str>) -> String {
    let limits = quota.limits();
    let limit_clause = if limits.is_empty() {
        "NO LIMITS".to_string()
    } else {
        limits
            .iter()
            .map(|(name, value)| format!("MAX {name} = {value}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let interval_keyword = if quota.randomized_interval {
        "FOR RANDOMIZED INTERVAL"
    } else {
        "FOR INTERVAL"
    };

    let stmt = Statement::new(format!("CREATE QUOTA OR REPLACE {}", quote(&quota.name))).on_cluster(cluster);
    let stmt = if quota.keyed_by.is_empty() {
        stmt
    } else {
        stmt.fragment(format!("KEYED BY {}", quota.keyed_by.join(", ")))
    };
    let stmt = stmt
        .fragment(format!("{} {} SECOND", interval_keyword, quota.effective_interval()))
        .fragment(limit_clause);
    let stmt = if quota.users.is_empty() {
        stmt
    } else {
        stmt.fragment(format!("TO {}", quote_list(&quota.users)))
    };
    stmt.render()
}

pub fn drop_quota(name: &str, cluster: Option<&str>) -> String {
    Statement::new(format!("DROP QUOTA {}", quote(name))).on_cluster(cluster).render()
}

/// GRANT privileges on a table target.
///
/// `with_option` re-asserts the grant option alongside the privileges being
/// granted. Grant statements are not a full-replace primitive on ClickHouse:
/// an option held before the statement survives it, so the caller decides
/// carry-forward explicitly.
pub fn grant_privileges<S: AsRef<str>>(user: &str, table: &str, privileges: &[S], with_option: bool, cluster: Option<&str>) -> String {
    let privileges = privileges.iter().map(|p| p.as_ref().to_string()).collect::<Vec<_>>().join(", ");
    let stmt = Statement::new("GRANT")
        .on_cluster(cluster)
        .fragment(privileges)
        .fragment(format!("ON {table}"))
        .fragment(format!("TO {}", quote(user)));
    let stmt = if with_option { stmt.fragment("WITH GRANT OPTION") } else { stmt };
    stmt.render()
}

pub fn revoke_privileges<S: AsRef<str>>(user: &str, table: &str, privileges: &[S], cluster: Option<&str>) -> String {
    let privileges = privileges.iter().map(|p| p.as_ref().to_string()).collect::<Vec<_>>().join(", ");
    Statement::new("REVOKE")
        .on_cluster(cluster)
        .fragment(privileges)
        .fragment(format!("ON {table}"))
        .fragment(format!("FROM {}", quote(user)))
        .render()
}

/// Strip the grant option without touching the privileges themselves.
pub fn revoke_grant_option(user: &str, table: &str, cluster: Option<&str>) -> String {
    Statement::new("REVOKE")
        .on_cluster(cluster)
        .fragment(format!("GRANT OPTION FOR ALL ON {table}"))
        .fragment(format!("FROM {}", quote(user)))
        .render()
}

/// Grant a role to specific users.
pub fn grant_role<S: AsRef<str>>(role: &str, users: &[S], cluster: Option<&str>) -> String {
    Statement::new("GRANT")
        .on_cluster(cluster)
        .fragment(quote(role))
        .fragment(format!("TO {}", quote_list(users)))
        .render()
}

/// Revoke a role from exactly the named users. Incremental membership
/// shrink, never a blanket revoke.
pub fn revoke_role<S: AsRef<str>>(role: &str, users: &[S], cluster: Option<&str>) -> String {
    Statement::new("REVOKE")
        .on_cluster(cluster)
        .fragment(quote(role))
        .fragment(format!("FROM {}", quote_list(users)))
        .render()
}

/// Wipe every membership of a role in one statement. Used only when the role
/// grant itself is declared absent.
pub fn revoke_role_from_all(role: &str, cluster: Option<&str>) -> String {
    Statement::new("REVOKE")
        .on_cluster(cluster)
        .fragment(quote(role))
        .fragment("FROM ALL")
        .render()
}
