//! Settings-profile planning. The full settings map rides on every
//! CREATE/ALTER, so convergence is a straight map comparison against the
//! string-coerced observed settings.

use super::{Environment, Outcome, Plan};
use crate::observe::ObservedProfile;
use crate::spec::{Ensure, ProfileSpec};
use crate::statement::{create_or_alter_profile, drop_profile, Action};

pub(super) fn plan(spec: &ProfileSpec, observed: Option<&ObservedProfile>, env: &Environment) -> Plan {
    let cluster = env.cluster_for(spec.distributed);
    let exists = observed.map(|o| !o.id.is_empty()).unwrap_or(false);

    if spec.ensure == Ensure::Absent {
        return if exists {
            Plan::new(Outcome::Dropped, vec![drop_profile(&spec.name, cluster)])
        } else {
            Plan::converged()
        };
    }

    if let Some(observed) = observed {
        if exists && observed.settings == spec.settings_as_strings() {
            return Plan::converged();
        }
    }

    let action = if exists { Action::Alter } else { Action::Create };
    let outcome = match action {
        Action::Create => Outcome::Created,
        Action::Alter => Outcome::Altered,
    };
    Plan::new(outcome, vec![create_or_alter_profile(spec, action, cluster)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SettingValue;
    use std::collections::BTreeMap;

    fn spec(name: &str) -> ProfileSpec {
        let mut settings = BTreeMap::new();
        settings.insert("readonly".to_string(), SettingValue::Int(1));
        ProfileSpec {
            name: name.to_string(),
            ensure: Ensure::Present,
            distributed: false,
            settings,
        }
    }

    fn observed(name: &str) -> ObservedProfile {
        let mut settings = BTreeMap::new();
        settings.insert("readonly".to_string(), "1".to_string());
        ObservedProfile {
            name: name.to_string(),
            id: "p-1".to_string(),
            settings,
        }
    }

    #[test]
    fn missing_profile_is_created_with_settings() {
        let p = plan(&spec("restricted"), None, &Environment::default());
        assert_eq!(p.outcome, Outcome::Created);
        assert_eq!(p.statements, vec!["CREATE SETTINGS PROFILE 'restricted' SETTINGS readonly = '1'"]);
    }

    #[test]
    fn matching_settings_converge() {
        assert_eq!(
            plan(&spec("restricted"), Some(&observed("restricted")), &Environment::default()),
            Plan::converged()
        );
    }

    #[test]
    fn setting_drift_rewrites_the_full_map() {
        let mut o = observed("restricted");
        o.settings.insert("readonly".to_string(), "0".to_string());
        let p = plan(&spec("restricted"), Some(&o), &Environment::default());
        assert_eq!(p.outcome, Outcome::Altered);
        assert_eq!(p.statements, vec!["ALTER SETTINGS PROFILE 'restricted' SETTINGS readonly = '1'"]);
    }

    #[test]
    fn absent_profile_drops_only_when_present() {
        let mut s = spec("restricted");
        s.ensure = Ensure::Absent;
        assert_eq!(plan(&s, None, &Environment::default()), Plan::converged());
        let p = plan(&s, Some(&observed("restricted")), &Environment::default());
        assert_eq!(p.statements, vec!["DROP SETTINGS PROFILE 'restricted'"]);
    }
}
