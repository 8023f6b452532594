//! Role-membership planning.
//!
//! Membership reconciles incrementally: users joining the declared list are
//! granted the role, departing users get a targeted revoke naming exactly
//! them. The blanket `FROM ALL` form is reserved for an explicitly absent
//! declaration, where the whole membership is wiped in one statement.

use super::{Environment, Outcome, Plan};
use crate::diff::diff;
use crate::observe::ObservedRoleGrant;
use crate::spec::{Ensure, RoleGrantSpec};
use crate::statement::{grant_role, revoke_role, revoke_role_from_all};

pub(super) fn plan(spec: &RoleGrantSpec, observed: Option<&ObservedRoleGrant>, env: &Environment) -> Plan {
    let cluster = env.cluster_for(spec.distributed);

    if spec.ensure == Ensure::Absent {
        return match observed {
            Some(observed) if !observed.users.is_empty() => {
                Plan::new(Outcome::Dropped, vec![revoke_role_from_all(&spec.role, cluster)])
            }
            _ => Plan::converged(),
        };
    }

    let desired = spec.sorted_users();
    let current = observed.map(|o| o.users.clone()).unwrap_or_default();
    let d = diff(&current, &desired);

    let mut statements = vec![];
    if !d.to_remove.is_empty() {
        statements.push(revoke_role(&spec.role, &d.to_remove, cluster));
    }
    if !d.to_add.is_empty() {
        statements.push(grant_role(&spec.role, &d.to_add, cluster));
    }
    if statements.is_empty() {
        return Plan::converged();
    }
    let outcome = if observed.is_some() { Outcome::Altered } else { Outcome::Created };
    Plan::new(outcome, statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(users: &[&str]) -> RoleGrantSpec {
        RoleGrantSpec {
            role: "ingest".to_string(),
            users: users.iter().map(|u| u.to_string()).collect(),
            ensure: Ensure::Present,
            distributed: false,
        }
    }

    fn observed(users: &[&str]) -> ObservedRoleGrant {
        ObservedRoleGrant {
            role: "ingest".to_string(),
            users: users.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[test]
    fn fresh_membership_grants_everyone() {
        let p = plan(&spec(&["u2", "u1"]), None, &Environment::default());
        assert_eq!(p.outcome, Outcome::Created);
        assert_eq!(p.statements, vec!["GRANT 'ingest' TO 'u1', 'u2'"]);
    }

    #[test]
    fn matching_membership_converges_regardless_of_order() {
        let p = plan(&spec(&["u2", "u1"]), Some(&observed(&["u1", "u2"])), &Environment::default());
        assert_eq!(p, Plan::converged());
    }

    #[test]
    fn shrink_revokes_only_departing_users() {
        let p = plan(&spec(&["u2", "u3"]), Some(&observed(&["u1", "u2"])), &Environment::default());
        assert_eq!(
            p.statements,
            vec!["REVOKE 'ingest' FROM 'u1'", "GRANT 'ingest' TO 'u3'"]
        );
    }

    #[test]
    fn absent_declaration_wipes_membership_in_one_statement() {
        let mut s = spec(&[]);
        s.ensure = Ensure::Absent;
        assert_eq!(plan(&s, None, &Environment::default()), Plan::converged());

        let p = plan(&s, Some(&observed(&["u1", "u2"])), &Environment::default());
        assert_eq!(p.outcome, Outcome::Dropped);
        assert_eq!(p.statements, vec!["REVOKE 'ingest' FROM ALL"]);
    }
}
