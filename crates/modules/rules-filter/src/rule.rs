use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use ulatency_core::{ActionOutcome, Filter, FilterError, MatchOutcome, ProcessSnapshot, Uid};

use crate::RulesFilterError;

/// Rule as written in the rule files.
///
/// ```yaml
/// - name: stress
///   basename: ^stress$
///   timeout: 10
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRule {
    pub name: String,
    pub basename: Option<String>,
    pub cmdline: Option<String>,
    pub uid: Option<u32>,
    /// Seconds before the process is evaluated again. `0` never re-evaluates
    /// it, absent evaluates it every tick.
    pub timeout: Option<u64>,
    /// Stop the evaluation of every following filter on match.
    #[serde(default)]
    pub stop: bool,
}

/// Compiled conditions of a [`UserRule`]. Every condition present must hold.
#[derive(Debug)]
pub(crate) struct RuleData {
    name: String,
    basename: Option<Regex>,
    cmdline: Option<Regex>,
    uid: Option<Uid>,
    outcome: ActionOutcome,
    stop: bool,
}

impl RuleData {
    fn is_match(&self, process: &ProcessSnapshot) -> bool {
        self.basename
            .as_ref()
            .is_none_or(|re| re.is_match(process.basename()))
            && self
                .cmdline
                .as_ref()
                .is_none_or(|re| re.is_match(process.cmdline()))
            && self.uid.is_none_or(|uid| uid == process.uid())
    }
}

impl UserRule {
    pub fn compile(self) -> Result<Filter, RulesFilterError> {
        let data = RuleData {
            basename: pattern(&self.name, "basename", self.basename.as_deref())?,
            cmdline: pattern(&self.name, "cmdline", self.cmdline.as_deref())?,
            uid: self.uid.map(Uid::from_raw),
            outcome: match self.timeout {
                None => ActionOutcome::NoCache,
                Some(secs) => ActionOutcome::after(Duration::from_secs(secs)),
            },
            stop: self.stop,
            name: self.name.clone(),
        };
        Ok(Filter::native(self.name, data, check, action))
    }
}

fn pattern(
    rule: &str,
    field: &'static str,
    pattern: Option<&str>,
) -> Result<Option<Regex>, RulesFilterError> {
    pattern
        .map(Regex::new)
        .transpose()
        .map_err(|error| RulesFilterError::Pattern {
            rule: rule.to_string(),
            field,
            error,
        })
}

fn check(process: &ProcessSnapshot, rule: &RuleData) -> Result<MatchOutcome, FilterError> {
    Ok(match (rule.is_match(process), rule.stop) {
        (false, _) => MatchOutcome::NoMatch,
        (true, false) => MatchOutcome::Match,
        (true, true) => MatchOutcome::StopAll,
    })
}

fn action(process: &ProcessSnapshot, rule: &RuleData) -> Result<ActionOutcome, FilterError> {
    log::info!(
        "{}: process {} ({}) matched",
        rule.name,
        process.pid(),
        process.basename()
    );
    Ok(rule.outcome)
}

#[cfg(test)]
mod tests {
    use ulatency_core::{Pid, parse_rules};

    use super::*;

    fn rule(yaml: &str) -> Filter {
        let mut rules: Vec<UserRule> = parse_rules(yaml, "test.yaml").unwrap();
        rules.remove(0).compile().unwrap()
    }

    fn stress(uid: u32) -> ProcessSnapshot {
        ProcessSnapshot::builder(Pid::from_raw(100))
            .basename("stress")
            .argv(["stress", "--cpu", "4"])
            .uid(Uid::from_raw(uid))
            .build()
    }

    #[test]
    fn every_condition_must_hold() {
        let filter = rule("- {name: r, basename: ^stress$, cmdline: --cpu, uid: 1000}");
        assert_eq!(filter.check(&stress(1000)), Ok(MatchOutcome::Match));
        assert_eq!(filter.check(&stress(0)), Ok(MatchOutcome::NoMatch));

        let filter = rule("- {name: r, cmdline: --io}");
        assert_eq!(filter.check(&stress(1000)), Ok(MatchOutcome::NoMatch));
    }

    #[test]
    fn no_condition_matches_everything() {
        let filter = rule("- {name: r}");
        assert_eq!(filter.check(&stress(0)), Ok(MatchOutcome::Match));
        assert_eq!(filter.action(&stress(0)), Ok(ActionOutcome::NoCache));
    }

    #[test]
    fn stop_rule() {
        let filter = rule("- {name: r, basename: stress, stop: true}");
        assert_eq!(filter.check(&stress(0)), Ok(MatchOutcome::StopAll));
    }

    #[test]
    fn timeouts() {
        let filter = rule("- {name: r, timeout: 10}");
        assert_eq!(
            filter.action(&stress(0)),
            Ok(ActionOutcome::SkipFor(Duration::from_secs(10)))
        );
        let filter = rule("- {name: r, timeout: 0}");
        assert_eq!(filter.action(&stress(0)), Ok(ActionOutcome::SkipForever));
    }

    #[test]
    fn invalid_pattern() {
        let rules: Vec<UserRule> =
            parse_rules("- {name: r, basename: '(oops'}", "test.yaml").unwrap();
        assert!(matches!(
            rules.into_iter().next().unwrap().compile(),
            Err(RulesFilterError::Pattern { field: "basename", .. })
        ));
    }
}
