//! Quota planning.
//!
//! Quotas never converge piecemeal: any drift in keying, interval, limits or
//! subjects replaces the whole object with `CREATE QUOTA OR REPLACE`. The
//! backend leaves orphaned limit rows behind when only the interval of an
//! existing quota is altered, so in-place alteration is avoided entirely.

use super::{Environment, Outcome, Plan};
use crate::observe::ObservedQuota;
use crate::spec::{Ensure, QuotaSpec};
use crate::statement::{create_or_replace_quota, drop_quota};

fn sorted(values: &[String]) -> Vec<&str> {
    let mut values: Vec<&str> = values.iter().map(String::as_str).collect();
    values.sort_unstable();
    values
}

fn converged(spec: &QuotaSpec, observed: &ObservedQuota) -> bool {
    if observed.users != spec.sorted_users() || sorted(&observed.keyed_by) != sorted(&spec.keyed_by) {
        return false;
    }
    let desired = spec.limits();
    if desired.is_empty() {
        // A no-limits quota stores a zero-duration row with no limit values,
        // which the observation layer folds into "no intervals".
        return observed.intervals.is_empty();
    }
    match observed.intervals.as_slice() {
        [interval] => {
            interval.duration == spec.effective_interval()
                && interval.randomized == spec.randomized_interval
                && interval.limits == desired
        }
        _ => false,
    }
}

pub(super) fn plan(spec: &QuotaSpec, observed: Option<&ObservedQuota>, env: &Environment) -> Plan {
    let cluster = env.cluster_for(spec.distributed);
    let exists = observed.map(|o| !o.id.is_empty()).unwrap_or(false);

    if spec.ensure == Ensure::Absent {
        return if exists {
            Plan::new(Outcome::Dropped, vec![drop_quota(&spec.name, cluster)])
        } else {
            Plan::converged()
        };
    }

    if let Some(observed) = observed {
        if exists && converged(spec, observed) {
            return Plan::converged();
        }
    }

    let outcome = if exists { Outcome::Altered } else { Outcome::Created };
    Plan::new(outcome, vec![create_or_replace_quota(spec, cluster)])
}
