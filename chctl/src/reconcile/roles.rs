//! Role planning. A role carries only a name and an optional inherited
//! profile, so convergence is just the profile comparison.

use tracing::warn;

use super::{Environment, Outcome, Plan};
use crate::observe::ObservedRole;
use crate::spec::{Ensure, RoleSpec};
use crate::statement::{assign_role_profile, create_or_alter_role, drop_role, Action};

pub(super) fn plan(spec: &RoleSpec, observed: Option<&ObservedRole>, env: &Environment) -> Plan {
    let cluster = env.cluster_for(spec.distributed);
    let exists = observed.map(|o| !o.id.is_empty()).unwrap_or(false);

    if spec.ensure == Ensure::Absent {
        return if exists {
            Plan::new(Outcome::Dropped, vec![drop_role(&spec.name, cluster)])
        } else {
            Plan::converged()
        };
    }

    if let Some(observed) = observed {
        if exists && observed.profile == spec.profile {
            return Plan::converged();
        }
    }

    let action = if exists { Action::Alter } else { Action::Create };
    let inline = env.inline_profile();
    let mut statements = vec![create_or_alter_role(spec, action, cluster, inline)];
    if !inline {
        if let Some(profile) = spec.profile.as_deref() {
            warn!(
                role = %spec.name,
                "this server release mishandles inline profile inheritance, assigning profile in a follow-up statement"
            );
            statements.push(assign_role_profile(&spec.name, profile, cluster));
        }
    }
    let outcome = match action {
        Action::Create => Outcome::Created,
        Action::Alter => Outcome::Altered,
    };
    Plan::new(outcome, statements)
}
