//! User planning.
//!
//! A present user converges when its authentication kind, inherited profile
//! and host restrictions all match the declaration. The hash value itself is
//! not observable over the wire, so a change of password behind the same
//! authentication kind is invisible; any other drift re-issues the full
//! ALTER, which re-asserts the declared hash as a side effect.

use tracing::warn;

use super::{Environment, Outcome, Plan};
use crate::observe::ObservedUser;
use crate::spec::{Ensure, UserSpec};
use crate::statement::{assign_user_profile, create_or_alter_user, drop_user, Action};

fn sorted(values: &[String]) -> Vec<&str> {
    let mut values: Vec<&str> = values.iter().map(String::as_str).collect();
    values.sort_unstable();
    values.dedup();
    values
}

fn converged(spec: &UserSpec, observed: &ObservedUser) -> bool {
    let expected_auth = if spec.password_hash.is_empty() {
        "no_password"
    } else {
        "sha256_password"
    };
    observed.auth_type.eq_ignore_ascii_case(expected_auth)
        && observed.profile == spec.profile
        && sorted(&observed.host_ip) == sorted(&spec.host_ip)
        && sorted(&observed.host_names) == sorted(&spec.host_names)
        && sorted(&observed.host_like) == sorted(&spec.host_like)
        && sorted(&observed.host_regexp) == sorted(&spec.host_regexp)
}

pub(super) fn plan(spec: &UserSpec, observed: Option<&ObservedUser>, env: &Environment) -> Plan {
    let cluster = env.cluster_for(spec.distributed);
    let exists = observed.map(|o| !o.id.is_empty()).unwrap_or(false);

    if spec.ensure == Ensure::Absent {
        return if exists {
            Plan::new(Outcome::Dropped, vec![drop_user(&spec.name, cluster)])
        } else {
            Plan::converged()
        };
    }

    if let Some(observed) = observed {
        if exists && converged(spec, observed) {
            return Plan::converged();
        }
    }

    let action = if exists { Action::Alter } else { Action::Create };
    let inline = env.inline_profile();
    let mut statements = vec![create_or_alter_user(spec, action, cluster, inline)];
    if !inline {
        if let Some(profile) = spec.profile.as_deref() {
            warn!(
                user = %spec.name,
                "this server release mishandles inline profile inheritance, assigning profile in a follow-up statement"
            );
            statements.push(assign_user_profile(&spec.name, profile, cluster));
        }
    }
    let outcome = match action {
        Action::Create => Outcome::Created,
        Action::Alter => Outcome::Altered,
    };
    Plan::new(outcome, statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> UserSpec {
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

    fn observed(name: &str) -> ObservedUser {
        ObservedUser {
            name: name.to_string(),
            id: "u-1".to_string(),
            auth_type: "no_password".to_string(),
            profile: None,
            host_ip: vec!["::/0".to_string()],
            host_names: vec![],
            host_like: vec![],
            host_regexp: vec![],
        }
    }

    #[test]
    fn missing_user_is_created() {
        let plan = plan(&spec("alice"), None, &Environment::default());
        assert_eq!(plan.outcome, Outcome::Created);
        assert_eq!(plan.statements, vec!["CREATE USER 'alice' IDENTIFIED WITH NO_PASSWORD HOST IP '::/0'"]);
    }

    #[test]
    fn matching_user_is_converged() {
        let plan = plan(&spec("alice"), Some(&observed("alice")), &Environment::default());
        assert_eq!(plan, Plan::converged());
    }

    #[test]
    fn auth_kind_drift_triggers_alter() {
        let mut s = spec("alice");
        s.password_hash = "ab".repeat(32);
        let plan = plan(&s, Some(&observed("alice")), &Environment::default());
        assert_eq!(plan.outcome, Outcome::Altered);
        assert!(plan.statements[0].starts_with("ALTER USER 'alice' IDENTIFIED WITH SHA256_HASH BY"));
    }

    #[test]
    fn host_restrictions_compare_as_sets() {
        let mut s = spec("alice");
        s.host_ip = vec!["10.0.0.0/8".to_string(), "::/0".to_string()];
        let mut o = observed("alice");
        o.host_ip = vec!["::/0".to_string(), "10.0.0.0/8".to_string()];
        assert_eq!(plan(&s, Some(&o), &Environment::default()), Plan::converged());

        o.host_ip = vec!["::/0".to_string()];
        assert_eq!(plan(&s, Some(&o), &Environment::default()).outcome, Outcome::Altered);
    }

    #[test]
    fn defective_release_assigns_profile_in_follow_up() {
        let mut s = spec("alice");
        s.profile = Some("restricted".to_string());
        let env = Environment {
            version: Some("20.8.11.17".to_string()),
            cluster: None,
        };
        let plan = plan(&s, None, &env);
        assert_eq!(
            plan.statements,
            vec![
                "CREATE USER 'alice' IDENTIFIED WITH NO_PASSWORD HOST IP '::/0'",
                "ALTER USER 'alice' SETTINGS PROFILE 'restricted'",
            ]
        );
    }

    #[test]
    fn recent_release_inlines_the_profile() {
        let mut s = spec("alice");
        s.profile = Some("restricted".to_string());
        let env = Environment {
            version: Some("21.3.2.5".to_string()),
            cluster: None,
        };
        let plan = plan(&s, None, &env);
        assert_eq!(
            plan.statements,
            vec!["CREATE USER 'alice' IDENTIFIED WITH NO_PASSWORD HOST IP '::/0' SETTINGS PROFILE 'restricted'"]
        );
    }

    #[test]
    fn absent_user_drops_only_when_present() {
        let mut s = spec("alice");
        s.ensure = Ensure::Absent;
        assert_eq!(plan(&s, None, &Environment::default()), Plan::converged());

        let p = plan(&s, Some(&observed("alice")), &Environment::default());
        assert_eq!(p.outcome, Outcome::Dropped);
        assert_eq!(p.statements, vec!["DROP USER 'alice'"]);
    }

    #[test]
    fn distributed_user_targets_the_cluster() {
        let mut s = spec("alice");
        s.distributed = true;
        let env = Environment {
            version: None,
            cluster: Some("main".to_string()),
        };
        let p = plan(&s, None, &env);
        assert!(p.statements[0].starts_with("CREATE USER 'alice' ON CLUSTER 'main'"));

        // Unknown cluster soft-fails to local execution.
        let p = plan(&s, None, &Environment::default());
        assert!(!p.statements[0].contains("ON CLUSTER"));
    }
}
