//! The reconciliation pass.
//!
//! One pass walks every declared entity in dependency order (profiles, then
//! users and roles that inherit them, then grants and role memberships on top,
//! quotas last), computes a plan from observed state and executes it. Each
//! entity is planned by a pure function in its submodule; this module owns
//! observation, execution, dry-run and error isolation.
//!
//! A failing entity is reported and skipped, never retried within the pass;
//! the remaining entities still reconcile. The pass is idempotent: running a
//! converged plan again issues no statements.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::errors::Error;
use crate::observe::Observer;
use crate::privileges::AllPrivileges;
use crate::spec::Declarations;
use crate::transport::{has_profile_inheritance_bug, ResultFormat, Transport};

mod grants;
mod profiles;
mod quotas;
mod role_grants;
mod roles;
mod users;

/// Server-side facts a pass runs against.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub version: Option<String>,
    pub cluster: Option<String>,
}

impl Environment {
    /// The cluster to target for an entity that asked for cluster-wide
    /// execution. Unknown cluster name soft-fails to local execution.
    pub fn cluster_for(&self, distributed: bool) -> Option<&str> {
        if !distributed {
            return None;
        }
        if self.cluster.is_none() {
            warn!("cluster-wide execution requested but no cluster name is known, executing locally");
        }
        self.cluster.as_deref()
    }

    /// Whether a profile assignment can ride inline on CREATE/ALTER
    /// USER/ROLE. Defective releases get a separate follow-up statement.
    pub fn inline_profile(&self) -> bool {
        !self.version.as_deref().map(has_profile_inheritance_bug).unwrap_or(false)
    }
}

/// What happened to one declared entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Converged,
    Created,
    Altered,
    Dropped,
    Failed,
}

/// Statements for one entity plus the outcome they produce when they all
/// succeed. An empty plan means the entity is already converged.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub outcome: Outcome,
    pub statements: Vec<String>,
}

impl Plan {
    pub fn converged() -> Self {
        Self {
            outcome: Outcome::Converged,
            statements: vec![],
        }
    }

    pub fn new(outcome: Outcome, statements: Vec<String>) -> Self {
        Self { outcome, statements }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityReport {
    pub kind: &'static str,
    pub name: String,
    pub outcome: Outcome,
    pub statements: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full report of one pass, serializable for machine consumption.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub entities: Vec<EntityReport>,
}

impl PassReport {
    pub fn failed(&self) -> usize {
        self.entities.iter().filter(|e| e.outcome == Outcome::Failed).count()
    }

    pub fn changed(&self) -> usize {
        self.entities
            .iter()
            .filter(|e| !matches!(e.outcome, Outcome::Converged | Outcome::Failed))
            .count()
    }
}

pub struct Reconciler<'a> {
    transport: &'a dyn Transport,
    env: Environment,
    all: AllPrivileges,
    dry_run: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(transport: &'a dyn Transport, env: Environment, all: AllPrivileges, dry_run: bool) -> Self {
        Self {
            transport,
            env,
            all,
            dry_run,
        }
    }

    /// Run one full pass over the declarations.
    #[instrument(skip_all, fields(dry_run = self.dry_run))]
    pub async fn run(&self, declarations: &Declarations) -> PassReport {
        let observer = Observer::new(self.transport, &self.all);
        let mut report = PassReport::default();

        let observed = observer.profiles().await;
        for spec in &declarations.profiles {
            let found = observed.iter().find(|o| o.name == spec.name);
            let plan = profiles::plan(spec, found, &self.env);
            self.apply("profile", &spec.name, plan, &mut report).await;
        }

        let observed = observer.users().await;
        for spec in &declarations.users {
            let found = observed.iter().find(|o| o.name == spec.name);
            let plan = users::plan(spec, found, &self.env);
            self.apply("user", &spec.name, plan, &mut report).await;
        }

        let observed = observer.roles().await;
        for spec in &declarations.roles {
            let found = observed.iter().find(|o| o.name == spec.name);
            let plan = roles::plan(spec, found, &self.env);
            self.apply("role", &spec.name, plan, &mut report).await;
        }

        let observed = observer.grants().await;
        for spec in &declarations.grants {
            let found = observed.iter().find(|o| o.user == spec.user && o.table == spec.table);
            let plan = grants::plan(spec, found, &self.all, &self.env);
            self.apply("grant", &spec.identity(), plan, &mut report).await;
        }

        let observed = observer.role_grants().await;
        for spec in &declarations.role_grants {
            let found = observed.iter().find(|o| o.role == spec.role);
            let plan = role_grants::plan(spec, found, &self.env);
            self.apply("role_grant", &spec.role, plan, &mut report).await;
        }

        let observed = observer.quotas().await;
        for spec in &declarations.quotas {
            let found = observed.iter().find(|o| o.name == spec.name);
            let plan = quotas::plan(spec, found, &self.env);
            self.apply("quota", &spec.name, plan, &mut report).await;
        }

        info!(
            entities = report.entities.len(),
            changed = report.changed(),
            failed = report.failed(),
            "pass complete"
        );
        report
    }

    /// Execute one entity's plan, isolating its failures from the pass.
    async fn apply(&self, kind: &'static str, name: &str, plan: Plan, report: &mut PassReport) {
        let mut entry = EntityReport {
            kind,
            name: name.to_string(),
            outcome: plan.outcome,
            statements: plan.statements,
            error: None,
        };
        if entry.statements.is_empty() {
            report.entities.push(entry);
            return;
        }
        for statement in &entry.statements {
            if self.dry_run {
                info!(kind, name, statement = %statement, "dry run, skipping execution");
                continue;
            }
            if let Err(source) = self.transport.execute(statement, ResultFormat::Raw).await {
                let error = Error::Execution {
                    entity: kind,
                    name: name.to_string(),
                    source,
                };
                warn!(kind, name, "reconciliation failed: {error}");
                entry.outcome = Outcome::Failed;
                entry.error = Some(error.to_string());
                break;
            }
        }
        if entry.outcome != Outcome::Failed && !self.dry_run {
            info!(kind, name, outcome = ?entry.outcome, "reconciled");
        }
        report.entities.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Ensure, GrantSpec, QuotaSpec, RoleGrantSpec, UserSpec};
    use crate::transport::MockTransport;
    use serde_json::json;

    fn env() -> Environment {
        Environment::default()
    }

    fn reconciler(mock: &MockTransport) -> Reconciler<'_> {
        Reconciler::new(mock, env(), AllPrivileges::for_version(None), false)
    }

    fn user(name: &str) -> UserSpec {
        UserSpec {
            name: name.to_string(),
            ensure: Ensure::Present,
            distributed: false,
            password_hash: String::new(),
            profile: None,
            host_ip: vec!["::/0".to_string()],
            host_names: vec![],
            host_like: vec![],
            host_regexp: vec![],
        }
    }

    fn grant(user: &str, table: &str, privileges: &[&str]) -> GrantSpec {
        GrantSpec {
            user: user.to_string(),
            table: table.to_string(),
            privileges: privileges.iter().map(|p| p.to_string()).collect(),
            grant_option: None,
            ensure: Ensure::Present,
            distributed: false,
        }
    }

    // Fresh server: everything is created, nothing is dropped.
    #[test_log::test(tokio::test)]
    async fn empty_server_creates_declared_entities() {
        let mock = MockTransport::new();
        let declarations = Declarations {
            users: vec![user("alice")],
            grants: vec![grant("alice", "db.t", &["SELECT"])],
            ..Default::default()
        };

        let report = reconciler(&mock).run(&declarations).await;
        assert_eq!(report.failed(), 0);
        assert_eq!(report.changed(), 2);

        let executed = mock.executed();
        assert!(executed.contains(&"CREATE USER 'alice' IDENTIFIED WITH NO_PASSWORD HOST IP '::/0'".to_string()));
        assert!(executed.contains(&"GRANT SELECT ON db.t TO 'alice'".to_string()));
        assert!(
            !executed.iter().any(|s| s.starts_with("DROP") || s.starts_with("REVOKE")),
            "nothing may be dropped on an empty server: {executed:?}"
        );
    }

    // Converged server: a second pass issues no mutating statements.
    #[test_log::test(tokio::test)]
    async fn converged_state_issues_no_statements() {
        let mock = MockTransport::new();
        mock.stub_table(
            "SELECT u.name",
            json!([{
                "name": "alice", "id": "u-1", "auth_type": "no_password",
                "host_ip": ["::/0"], "host_names": [], "host_like": [], "host_regexp": [],
                "profile": ""
            }]),
        );
        mock.stub_lines("SELECT name FROM system.users", &["alice"]);
        mock.stub_lines("SHOW GRANTS FOR 'alice'", &["GRANT SELECT ON db.t TO alice"]);

        let declarations = Declarations {
            users: vec![user("alice")],
            grants: vec![grant("alice", "db.t", &["select"])],
            ..Default::default()
        };

        let report = reconciler(&mock).run(&declarations).await;
        assert_eq!(report.changed(), 0);
        assert_eq!(report.failed(), 0);
        assert!(report.entities.iter().all(|e| e.outcome == Outcome::Converged));
        assert!(
            !mock.executed().iter().any(|s| {
                s.starts_with("CREATE") || s.starts_with("ALTER") || s.starts_with("GRANT") || s.starts_with("REVOKE") || s.starts_with("DROP")
            }),
            "converged pass must only read: {:?}",
            mock.executed()
        );
    }

    // Privilege drift: symmetric difference becomes one revoke and one grant.
    #[test_log::test(tokio::test)]
    async fn privilege_drift_is_repaired_with_revoke_and_grant() {
        let mock = MockTransport::new();
        mock.stub_lines("SELECT name FROM system.users", &["bob"]);
        mock.stub_lines(
            "SHOW GRANTS FOR 'bob'",
            &["GRANT SELECT, INSERT(old) ON db.t TO bob"],
        );

        let declarations = Declarations {
            grants: vec![grant("bob", "db.t", &["SELECT", "INSERT(new)"])],
            ..Default::default()
        };

        let report = reconciler(&mock).run(&declarations).await;
        assert_eq!(report.failed(), 0);
        let executed = mock.executed();
        let revoke = executed.iter().position(|s| s == "REVOKE INSERT(old) ON db.t FROM 'bob'");
        let grant = executed.iter().position(|s| s == "GRANT INSERT(new) ON db.t TO 'bob'");
        assert!(revoke.is_some() && grant.is_some(), "got {executed:?}");
        assert!(revoke < grant, "revokes run before grants");
    }

    // Explicit removal: ensure absent drops, plain disappearance does not.
    #[test_log::test(tokio::test)]
    async fn only_explicit_absence_drops_objects() {
        let mock = MockTransport::new();
        mock.stub_table(
            "SELECT u.name",
            json!([
                {"name": "old", "id": "u-9", "auth_type": "no_password",
                 "host_ip": ["::/0"], "host_names": [], "host_like": [], "host_regexp": [], "profile": ""},
                {"name": "stray", "id": "u-10", "auth_type": "no_password",
                 "host_ip": ["::/0"], "host_names": [], "host_like": [], "host_regexp": [], "profile": ""}
            ]),
        );

        let mut absent = user("old");
        absent.ensure = Ensure::Absent;
        // "stray" exists on the server but is simply not declared.
        let declarations = Declarations {
            users: vec![absent],
            ..Default::default()
        };

        let report = reconciler(&mock).run(&declarations).await;
        assert_eq!(report.entities[0].outcome, Outcome::Dropped);
        let executed = mock.executed();
        assert!(executed.contains(&"DROP USER 'old'".to_string()));
        assert!(!executed.iter().any(|s| s.contains("stray")), "undeclared objects are untouched");
    }

    // One failing entity must not stop the pass.
    #[test_log::test(tokio::test)]
    async fn execution_failures_are_isolated_per_entity() {
        let mock = MockTransport::new();
        mock.fail("CREATE USER 'alice'", "Code: 497. Not enough privileges.");

        let declarations = Declarations {
            users: vec![user("alice"), user("bob")],
            ..Default::default()
        };

        let report = reconciler(&mock).run(&declarations).await;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.entities[0].outcome, Outcome::Failed);
        assert!(report.entities[0].error.as_deref().unwrap_or("").contains("497"));
        assert_eq!(report.entities[1].outcome, Outcome::Created);
        assert!(mock.executed().contains(&"CREATE USER 'bob' IDENTIFIED WITH NO_PASSWORD HOST IP '::/0'".to_string()));
    }

    // Dry run: full plan in the report, nothing mutating on the wire.
    #[test_log::test(tokio::test)]
    async fn dry_run_plans_but_does_not_execute() {
        let mock = MockTransport::new();
        let declarations = Declarations {
            users: vec![user("alice")],
            ..Default::default()
        };

        let reconciler = Reconciler::new(&mock, env(), AllPrivileges::for_version(None), true);
        let report = reconciler.run(&declarations).await;
        assert_eq!(report.entities[0].outcome, Outcome::Created);
        assert_eq!(report.entities[0].statements.len(), 1);
        assert!(
            !mock.executed().iter().any(|s| s.starts_with("CREATE")),
            "dry run must not execute: {:?}",
            mock.executed()
        );
    }

    // Membership shrink: departing users are revoked, nobody else touched.
    #[test_log::test(tokio::test)]
    async fn role_membership_shrink_revokes_departing_users() {
        let mock = MockTransport::new();
        mock.stub_table(
            "SELECT g.user_name",
            json!([
                {"user_name": "u1", "role": "ingest"},
                {"user_name": "u2", "role": "ingest"}
            ]),
        );

        let declarations = Declarations {
            role_grants: vec![RoleGrantSpec {
                role: "ingest".to_string(),
                users: vec!["u2".to_string(), "u3".to_string()],
                ensure: Ensure::Present,
                distributed: false,
            }],
            ..Default::default()
        };

        let report = reconciler(&mock).run(&declarations).await;
        assert_eq!(report.failed(), 0);
        let executed = mock.executed();
        assert!(executed.contains(&"REVOKE 'ingest' FROM 'u1'".to_string()));
        assert!(executed.contains(&"GRANT 'ingest' TO 'u3'".to_string()));
        assert!(!executed.iter().any(|s| s.contains("FROM ALL")), "shrink must stay incremental");
    }

    // Profiles are created before the users that reference them, and users
    // before their grants.
    #[test_log::test(tokio::test)]
    async fn pass_creates_prerequisites_before_dependents() {
        let mock = MockTransport::new();
        let mut alice = user("alice");
        alice.profile = Some("readonly".to_string());
        let declarations = Declarations {
            profiles: vec![crate::spec::ProfileSpec {
                name: "readonly".to_string(),
                ensure: Ensure::Present,
                distributed: false,
                settings: Default::default(),
            }],
            users: vec![alice],
            grants: vec![grant("alice", "db.t", &["SELECT"])],
            ..Default::default()
        };

        let report = reconciler(&mock).run(&declarations).await;
        assert_eq!(report.failed(), 0);
        let executed = mock.executed();
        let profile = executed.iter().position(|s| s.starts_with("CREATE SETTINGS PROFILE 'readonly'"));
        let user = executed.iter().position(|s| s.starts_with("CREATE USER 'alice'"));
        let grant = executed.iter().position(|s| s.starts_with("GRANT SELECT ON db.t"));
        assert!(profile.is_some() && user.is_some() && grant.is_some(), "got {executed:?}");
        assert!(profile < user && user < grant, "creation must follow dependency order: {executed:?}");
    }

    // Quotas are replaced wholesale whenever anything differs.
    #[test_log::test(tokio::test)]
    async fn drifted_quota_is_replaced_in_full() {
        let mock = MockTransport::new();
        mock.stub_table(
            "SELECT q.name",
            json!([{
                "name": "per-user", "id": "q-1", "keys": [], "apply_to_list": ["alice"],
                "duration": "3600", "is_randomized_interval": 0,
                "max_queries": "50", "max_errors": null, "max_result_rows": null,
                "max_result_bytes": null, "max_read_rows": null, "max_read_bytes": null,
                "max_execution_time": null
            }]),
        );

        let declarations = Declarations {
            quotas: vec![QuotaSpec {
                name: "per-user".to_string(),
                ensure: Ensure::Present,
                distributed: false,
                interval: crate::spec::Interval::Seconds(3600),
                randomized_interval: false,
                keyed_by: vec![],
                max_queries: Some(100),
                max_errors: None,
                max_read_rows: None,
                max_read_bytes: None,
                max_result_rows: None,
                max_result_bytes: None,
                max_execution_time: None,
                users: vec!["alice".to_string()],
            }],
            ..Default::default()
        };

        let report = reconciler(&mock).run(&declarations).await;
        assert_eq!(report.entities[0].outcome, Outcome::Altered);
        assert!(mock
            .executed()
            .contains(&"CREATE QUOTA OR REPLACE 'per-user' FOR INTERVAL 3600 SECOND MAX QUERIES = 100 TO 'alice'".to_string()));
    }
}
