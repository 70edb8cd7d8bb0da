//! Job input hydration.
//!
//! [`ConfigHydrator`] is the seam a secrets-aware hydrator plugs into. The
//! shipped [`EnvVarHydrator`] resolves `${VAR}` references in string values.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Organization and workspace a payload is hydrated for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationScope {
    pub organization_id: Option<Uuid>,
    pub workspace_id: Option<Uuid>,
}

impl HydrationScope {
    /// Read `organizationId` / `workspaceId` from a job payload.
    /// Missing or malformed ids are left unset.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        let id = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
        };
        Self {
            organization_id: id("organizationId"),
            workspace_id: id("workspaceId"),
        }
    }
}

/// Turns a raw job payload into one ready for execution.
pub trait ConfigHydrator: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if any reference in `payload` cannot be resolved.
    fn hydrate(&self, payload: Value, scope: &HydrationScope) -> anyhow::Result<Value>;
}

/// Replace every `${NAME}` in `input` through `lookup`, pushing unresolved
/// names onto `missing`.
pub(crate) fn substitute_vars(
    input: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
    missing: &mut Vec<String>,
) -> String {
    ENV_VAR_RE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            if let Some(value) = lookup(name) {
                value
            } else {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                caps[0].to_string()
            }
        })
        .into_owned()
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves `${VAR}` references from the process environment.
pub struct EnvVarHydrator {
    lookup: Lookup,
}

impl EnvVarHydrator {
    #[must_use]
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve names through `lookup` instead of the environment.
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn walk(&self, value: Value, missing: &mut Vec<String>) -> Value {
        match value {
            Value::String(s) => Value::String(substitute_vars(&s, &*self.lookup, missing)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.walk(v, missing)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.walk(v, missing)))
                    .collect(),
            ),
            other => other,
        }
    }
}

impl Default for EnvVarHydrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigHydrator for EnvVarHydrator {
    fn hydrate(&self, payload: Value, scope: &HydrationScope) -> anyhow::Result<Value> {
        let mut missing = Vec::new();
        let hydrated = self.walk(payload, &mut missing);
        if !missing.is_empty() {
            anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
        }
        tracing::debug!(
            organization_id = ?scope.organization_id,
            workspace_id = ?scope.workspace_id,
            "Hydrated job input"
        );
        Ok(hydrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hydrator() -> EnvVarHydrator {
        EnvVarHydrator::with_lookup(|name| match name {
            "PG_HOST" => Some("db.internal".into()),
            "PG_PASS" => Some("s3cret".into()),
            _ => None,
        })
    }

    #[test]
    fn test_resolves_nested_strings() {
        let payload = json!({
            "config": {"host": "${PG_HOST}", "port": 5432, "tags": ["${PG_HOST}:${PG_PASS}"]},
        });
        let out = hydrator()
            .hydrate(payload, &HydrationScope::default())
            .unwrap();
        assert_eq!(out["config"]["host"], "db.internal");
        assert_eq!(out["config"]["port"], 5432);
        assert_eq!(out["config"]["tags"][0], "db.internal:s3cret");
    }

    #[test]
    fn test_reports_every_missing_variable_once() {
        let payload = json!({"a": "${NOPE_A}", "b": "${NOPE_B} ${NOPE_A}"});
        let err = hydrator()
            .hydrate(payload, &HydrationScope::default())
            .unwrap_err()
            .to_string();
        assert_eq!(err, "Missing environment variable(s): NOPE_A, NOPE_B");
    }

    #[test]
    fn test_plain_payload_passes_through() {
        let payload = json!({"connectionId": "c1", "n": null, "ok": true});
        let out = hydrator()
            .hydrate(payload.clone(), &HydrationScope::default())
            .unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_scope_from_payload() {
        let org = Uuid::new_v4();
        let scope = HydrationScope::from_payload(&json!({
            "organizationId": org.to_string(),
            "workspaceId": "not-a-uuid",
        }));
        assert_eq!(scope.organization_id, Some(org));
        assert_eq!(scope.workspace_id, None);
    }
}
