//! Table-grant planning.
//!
//! Both sides of the comparison are canonical privilege sets for one
//! user/table pairing; the plan is the symmetric difference rendered as one
//! REVOKE and one GRANT. Revokes run first so a changed column list never
//! widens access in between.
//!
//! The grant option needs care because GRANT is not a full-replace
//! primitive: an option held before a statement survives it. The declared
//! tri-state resolves as
//! - omitted: whatever the server holds is carried forward on re-grants;
//! - `true`: the full desired set is granted with the option, even when the
//!   privileges themselves are already converged;
//! - `false`: the option is stripped first with a blanket
//!   `REVOKE GRANT OPTION FOR ALL`, privileges stay.

use super::{Environment, Outcome, Plan};
use crate::diff::diff;
use crate::observe::ObservedGrant;
use crate::privileges::{canonicalize_privileges, AllPrivileges};
use crate::spec::{Ensure, GrantSpec};
use crate::statement::{grant_privileges, revoke_grant_option, revoke_privileges};

pub(super) fn plan(spec: &GrantSpec, observed: Option<&ObservedGrant>, all: &AllPrivileges, env: &Environment) -> Plan {
    let cluster = env.cluster_for(spec.distributed);

    if spec.ensure == Ensure::Absent {
        return match observed {
            Some(observed) if !observed.privileges.is_empty() => Plan::new(
                Outcome::Dropped,
                vec![revoke_privileges(&spec.user, &spec.table, &observed.privileges, cluster)],
            ),
            _ => Plan::converged(),
        };
    }

    let desired = canonicalize_privileges(&spec.privileges, all);
    let observed_privileges = observed.map(|o| o.privileges.clone()).unwrap_or_default();
    let observed_option = observed.map(|o| o.grant_option).unwrap_or(false);
    let d = diff(&observed_privileges, &desired);

    let mut statements = vec![];
    if observed_option && spec.grant_option == Some(false) {
        statements.push(revoke_grant_option(&spec.user, &spec.table, cluster));
    }
    if !d.to_remove.is_empty() {
        statements.push(revoke_privileges(&spec.user, &spec.table, &d.to_remove, cluster));
    }
    if spec.grant_option == Some(true) && !observed_option {
        // Re-grant the whole set so the option attaches to every privilege.
        statements.push(grant_privileges(&spec.user, &spec.table, &desired, true, cluster));
    } else if !d.to_add.is_empty() {
        let carry = observed_option && spec.grant_option != Some(false);
        statements.push(grant_privileges(&spec.user, &spec.table, &d.to_add, carry, cluster));
    }

    if statements.is_empty() {
        return Plan::converged();
    }
    let outcome = if observed.is_some() { Outcome::Altered } else { Outcome::Created };
    Plan::new(outcome, statements)
}
