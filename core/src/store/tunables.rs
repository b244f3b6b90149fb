//! Named integer parameters and stored rule sets.

use super::SimStore;
use crate::{
    error::{SimError, SimResult},
    rules::{Condition, RuleDefinition, RuleSource},
};
use rusqlite::{params, OptionalExtension};

impl SimStore {
    pub fn set_parameter(&self, name: &str, value: i64) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO parameter (name, value) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET value = excluded.value",
            params![name, value],
        )?;
        Ok(())
    }

    pub fn get_parameter(&self, name: &str) -> SimResult<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM parameter WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()?)
    }

    pub fn parameter_or(&self, name: &str, default: i64) -> SimResult<i64> {
        Ok(self.get_parameter(name)?.unwrap_or(default))
    }

    /// Replace every rule of `rule_set` with `rules`, keeping their order.
    pub fn seed_rule_set(&self, rule_set: &str, rules: &[RuleDefinition]) -> SimResult<()> {
        self.conn.execute(
            "DELETE FROM rule_definition WHERE rule_set = ?1",
            params![rule_set],
        )?;
        for (ordinal, rule) in rules.iter().enumerate() {
            self.conn.execute(
                "INSERT INTO rule_definition (rule_set, ordinal, rule_name, conditions)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    rule_set,
                    ordinal as i64,
                    rule.name,
                    serde_json::to_string(&rule.conditions)?,
                ],
            )?;
        }
        Ok(())
    }

    /// Store raw condition text for one rule, bypassing serialization.
    pub fn put_raw_rule(&self, rule_set: &str, ordinal: i64, rule_name: &str, conditions: &str) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO rule_definition (rule_set, ordinal, rule_name, conditions)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (rule_set, ordinal) DO UPDATE SET
                rule_name = excluded.rule_name, conditions = excluded.conditions",
            params![rule_set, ordinal, rule_name, conditions],
        )?;
        Ok(())
    }
}

impl RuleSource for SimStore {
    fn load_rules(&self, rule_set: &str) -> SimResult<Vec<RuleDefinition>> {
        let mut stmt = self.conn.prepare(
            "SELECT rule_name, conditions FROM rule_definition
             WHERE rule_set = ?1 ORDER BY ordinal",
        )?;
        let rows = stmt
            .query_map(params![rule_set], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if rows.is_empty() {
            return Err(SimError::configuration(rule_set, "rule set not found"));
        }
        rows.into_iter()
            .map(|(name, json)| {
                let conditions: Vec<Condition> = serde_json::from_str(&json).map_err(|e| {
                    SimError::configuration(rule_set, format!("rule '{name}' unparseable: {e}"))
                })?;
                Ok(RuleDefinition { name, conditions })
            })
            .collect()
    }
}
