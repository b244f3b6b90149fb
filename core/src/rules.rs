//! Rule evaluation and the time-expiring rule-set cache.
//!
//! A rule set is an ordered list of named rules. Each rule is a
//! conjunction of `fact <op> operand` conditions; the first rule whose
//! conditions all hold is the match. Rule sets live in the store and are
//! loaded by name through a [`RuleSource`].

use crate::{
    error::{SimError, SimResult},
    types::Timestamp,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

pub type NumericFacts = BTreeMap<String, f64>;
pub type StringFacts = BTreeMap<String, String>;

/// Matches a fact set against rules; returns the first matching rule name.
pub trait RuleEvaluator {
    fn evaluate(&self, numeric: &NumericFacts, strings: &StringFacts) -> SimResult<Option<String>>;
}

/// Where rule definitions come from.
pub trait RuleSource {
    fn load_rules(&self, rule_set: &str) -> SimResult<Vec<RuleDefinition>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    fn holds_f64(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
        }
    }

    fn holds_str(&self, lhs: &str, rhs: &str) -> Option<bool> {
        match self {
            Self::Eq => Some(lhs == rhs),
            Self::Ne => Some(lhs != rhs),
            _ => None,
        }
    }
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Value(f64),
    Fact(String),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub fact: String,
    pub op: CompareOp,
    pub operand: Operand,
}

impl Condition {
    pub fn new(fact: &str, op: CompareOp, operand: Operand) -> Self {
        Self {
            fact: fact.to_string(),
            op,
            operand,
        }
    }

    fn holds(&self, rule_set: &str, numeric: &NumericFacts, strings: &StringFacts) -> SimResult<bool> {
        let number = |name: &str| {
            numeric
                .get(name)
                .copied()
                .ok_or_else(|| undefined_fact(rule_set, name))
        };
        match &self.operand {
            Operand::Value(v) => Ok(self.op.holds_f64(number(&self.fact)?, *v)),
            Operand::Fact(other) => Ok(self.op.holds_f64(number(&self.fact)?, number(other)?)),
            Operand::Text(expected) => {
                let actual = strings
                    .get(&self.fact)
                    .ok_or_else(|| undefined_fact(rule_set, &self.fact))?;
                self.op.holds_str(actual, expected).ok_or_else(|| {
                    SimError::configuration(
                        rule_set,
                        format!("operator {:?} cannot compare text fact '{}'", self.op, self.fact),
                    )
                })
            }
        }
    }
}

fn undefined_fact(rule_set: &str, fact: &str) -> SimError {
    SimError::configuration(rule_set, format!("fact '{fact}' is not defined"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    pub conditions: Vec<Condition>,
}

/// A loaded, named rule set with the time after which it must be reloaded.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<RuleDefinition>,
    pub expires_at: Timestamp,
}

impl RuleSet {
    pub fn new(name: &str, rules: Vec<RuleDefinition>, expires_at: Timestamp) -> SimResult<Self> {
        if rules.is_empty() {
            return Err(SimError::configuration(name, "no rules defined"));
        }
        if let Some(bad) = rules.iter().find(|r| r.conditions.is_empty()) {
            return Err(SimError::configuration(
                name,
                format!("rule '{}' has no conditions", bad.name),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            rules,
            expires_at,
        })
    }

    pub fn expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

impl RuleEvaluator for RuleSet {
    fn evaluate(&self, numeric: &NumericFacts, strings: &StringFacts) -> SimResult<Option<String>> {
        for rule in &self.rules {
            let mut all = true;
            for condition in &rule.conditions {
                if !condition.holds(&self.name, numeric, strings)? {
                    all = false;
                    break;
                }
            }
            if all {
                return Ok(Some(rule.name.clone()));
            }
        }
        Ok(None)
    }
}

/// Explicit rule-set cache: payload plus expiry, refreshed single-flight.
///
/// The refreshing caller holds the lock while loading, so concurrent
/// callers wait for that load and then reuse its result instead of
/// issuing their own.
pub struct RuleSetCache {
    name: String,
    ttl_ms: i64,
    slot: Mutex<CacheSlot>,
}

#[derive(Default)]
struct CacheSlot {
    current: Option<Arc<RuleSet>>,
    loads: u64,
}

impl RuleSetCache {
    pub fn new(name: &str, ttl_ms: i64) -> Self {
        Self {
            name: name.to_string(),
            ttl_ms,
            slot: Mutex::new(CacheSlot::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cached rule set, reloaded from `source` when absent or expired.
    /// A failed load leaves the cache empty so the next call retries.
    pub fn get(&self, source: &dyn RuleSource, now: Timestamp) -> SimResult<Arc<RuleSet>> {
        let mut slot = self.slot.lock();
        if let Some(rs) = &slot.current {
            if !rs.expired(now) {
                return Ok(Arc::clone(rs));
            }
        }
        slot.current = None;
        slot.loads += 1;
        let rules = source.load_rules(&self.name)?;
        let rs = Arc::new(RuleSet::new(&self.name, rules, now + self.ttl_ms)?);
        log::debug!("t={now} rules: loaded '{}' ({} rules)", self.name, rs.rules.len());
        slot.current = Some(Arc::clone(&rs));
        Ok(rs)
    }

    /// How many times the cache went to the source.
    pub fn loads(&self) -> u64 {
        self.slot.lock().loads
    }

    pub fn invalidate(&self) {
        self.slot.lock().current = None;
    }
}

/// The stock rule set: known-bad evidence first, then busyness patterns.
pub fn default_rules() -> Vec<RuleDefinition> {
    use CompareOp::*;
    let rule = |name: &str, conditions: Vec<Condition>| RuleDefinition {
        name: name.to_string(),
        conditions,
    };
    let suspicious = || Condition::new("thisDeviceIsSuspicious", Eq, Operand::Value(1.0));
    let very_busy = || {
        Condition::new(
            "actualBusynessPercentage",
            Ge,
            Operand::Fact("busynessPercentage".into()),
        )
    };
    vec![
        rule(
            "all_incoming_calls_from_known_bad_numbers",
            vec![
                suspicious(),
                Condition::new("actualBusyInCallPct", Ge, Operand::Value(1.0)),
                Condition::new(
                    "actualBusyInCallSuspiciousPct",
                    Eq,
                    Operand::Fact("actualBusyInCallPct".into()),
                ),
            ],
        ),
        rule(
            "some_incoming_calls_from_known_bad_numbers",
            vec![
                suspicious(),
                Condition::new("actualBusyInCallSuspiciousPct", Gt, Operand::Value(1.0)),
            ],
        ),
        rule(
            "suspicious_device_has_no_incoming_calls",
            vec![
                suspicious(),
                Condition::new("incomingCallCount", Eq, Operand::Value(0.0)),
                Condition::new("outgoingCallCount", Gt, Operand::Value(0.0)),
            ],
        ),
        rule("suspiciously_moving_device", vec![suspicious()]),
        rule(
            "total_incoming_outgoing_ratio_bad",
            vec![
                very_busy(),
                Condition::new(
                    "outgoingIncomingRatioTrip",
                    Lt,
                    Operand::Fact("outgoingCallCount".into()),
                ),
            ],
        ),
        rule(
            "topn_incoming_outgoing_ratio_bad",
            vec![
                very_busy(),
                Condition::new(
                    "outCallTopBottomNRatio",
                    Lt,
                    Operand::Fact("topBottomNRatio".into()),
                ),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingSource {
        calls: Cell<u32>,
        rules: Vec<RuleDefinition>,
    }

    impl RuleSource for CountingSource {
        fn load_rules(&self, _rule_set: &str) -> SimResult<Vec<RuleDefinition>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.rules.clone())
        }
    }

    fn facts(pairs: &[(&str, f64)]) -> NumericFacts {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn first_matching_rule_wins() {
        let rs = RuleSet::new("T", default_rules(), 0).unwrap();
        let numeric = facts(&[
            ("thisDeviceIsSuspicious", 1.0),
            ("actualBusyInCallPct", 20.0),
            ("actualBusyInCallSuspiciousPct", 20.0),
            ("incomingCallCount", 3.0),
            ("outgoingCallCount", 1.0),
        ]);
        let hit = rs.evaluate(&numeric, &StringFacts::new()).unwrap();
        assert_eq!(hit.as_deref(), Some("all_incoming_calls_from_known_bad_numbers"));
    }

    #[test]
    fn no_rule_matches_quiet_device() {
        let rs = RuleSet::new("T", default_rules(), 0).unwrap();
        let numeric = facts(&[
            ("thisDeviceIsSuspicious", 0.0),
            ("actualBusynessPercentage", 5.0),
            ("busynessPercentage", 30.0),
        ]);
        assert_eq!(rs.evaluate(&numeric, &StringFacts::new()).unwrap(), None);
    }

    #[test]
    fn undefined_fact_is_configuration_error() {
        let rs = RuleSet::new(
            "T",
            vec![RuleDefinition {
                name: "r".into(),
                conditions: vec![Condition::new("missing", CompareOp::Gt, Operand::Value(0.0))],
            }],
            0,
        )
        .unwrap();
        let err = rs.evaluate(&NumericFacts::new(), &StringFacts::new()).unwrap_err();
        assert!(matches!(err, SimError::Configuration { .. }));
    }

    #[test]
    fn text_conditions_compare_string_facts() {
        let rs = RuleSet::new(
            "T",
            vec![RuleDefinition {
                name: "outbound".into(),
                conditions: vec![Condition::new("direction", CompareOp::Eq, Operand::Text("out".into()))],
            }],
            0,
        )
        .unwrap();
        let mut strings = StringFacts::new();
        strings.insert("direction".into(), "out".into());
        assert_eq!(
            rs.evaluate(&NumericFacts::new(), &strings).unwrap().as_deref(),
            Some("outbound")
        );
    }

    #[test]
    fn cache_reloads_only_after_expiry() {
        let source = CountingSource {
            calls: Cell::new(0),
            rules: default_rules(),
        };
        let cache = RuleSetCache::new("SIMBOX", 60_000);
        cache.get(&source, 1_000).unwrap();
        cache.get(&source, 30_000).unwrap();
        cache.get(&source, 60_999).unwrap();
        assert_eq!(source.calls.get(), 1);
        cache.get(&source, 61_000).unwrap();
        assert_eq!(source.calls.get(), 2);
        assert_eq!(cache.loads(), 2);
    }

    #[test]
    fn failed_load_is_retried_on_next_call() {
        let empty = CountingSource {
            calls: Cell::new(0),
            rules: Vec::new(),
        };
        let cache = RuleSetCache::new("SIMBOX", 60_000);
        assert!(matches!(cache.get(&empty, 0), Err(SimError::Configuration { .. })));
        assert!(cache.get(&empty, 1).is_err());
        assert_eq!(empty.calls.get(), 2);
    }

    #[test]
    fn rules_round_trip_through_json() {
        let json = serde_json::to_string(&default_rules()).unwrap();
        let back: Vec<RuleDefinition> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, default_rules());
    }
}
