//! The progress-data accumulator carried by every provisioning job.
//!
//! Each successful step returns a partial patch which is merged into the
//! job's progress data with a shallow, object-level merge: existing keys are
//! kept unless the patch sets the same key. Later steps read the artifacts
//! produced by earlier ones (database name, session token, remote ids...).

use serde_json::{Map, Value};

/// Open key/value accumulator persisted as JSONB.
pub type ProgressData = Map<String, Value>;

/// Well-known progress keys. Each step owns the keys it writes.
pub mod keys {
    pub const INITIALIZED_AT: &str = "initialized_at";
    pub const TENANT_NAME: &str = "tenant_name";
    pub const DATABASE_NAME: &str = "database_name";
    pub const SESSION_TOKEN: &str = "session_token";
    pub const ADMIN_UID: &str = "admin_uid";
    pub const ADMIN_LOGIN: &str = "admin_login";
    pub const ADMIN_PASSWORD: &str = "admin_password";
    pub const API_KEY: &str = "api_key";
    pub const REMOTE_TENANT_ID: &str = "remote_tenant_id";
    pub const BILLING_REGISTERED: &str = "billing_registered";
    pub const REMOTE_USER_ID: &str = "remote_user_id";
    pub const METADATA_PUBLISHED: &str = "metadata_published";
    pub const FINALIZED_AT: &str = "finalized_at";
    pub const CREDENTIALS_SENT: &str = "credentials_sent";

    /// Every key a step writes.
    pub const ALL: [&str; 14] = [
        INITIALIZED_AT,
        TENANT_NAME,
        DATABASE_NAME,
        SESSION_TOKEN,
        ADMIN_UID,
        ADMIN_LOGIN,
        ADMIN_PASSWORD,
        API_KEY,
        REMOTE_TENANT_ID,
        BILLING_REGISTERED,
        REMOTE_USER_ID,
        METADATA_PUBLISHED,
        FINALIZED_AT,
        CREDENTIALS_SENT,
    ];
}

/// Keys of `data` that a step owns, in map order.
pub fn step_owned_keys(data: &ProgressData) -> Vec<&str> {
    data.keys()
        .map(String::as_str)
        .filter(|k| keys::ALL.contains(k))
        .collect()
}

/// Keys whose values are credentials and must never leave the service.
pub const SECRET_KEYS: [&str; 3] = [keys::SESSION_TOKEN, keys::ADMIN_PASSWORD, keys::API_KEY];

/// Copy of `data` with every [`SECRET_KEYS`] value replaced by
/// [`crate::redact::REDACTED`].
pub fn redacted(data: &ProgressData) -> ProgressData {
    data.iter()
        .map(|(k, v)| {
            if SECRET_KEYS.contains(&k.as_str()) && !v.is_null() {
                (k.clone(), Value::String(crate::redact::REDACTED.to_string()))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

/// Merge `patch` into `target`, overwriting only the keys the patch sets.
pub fn merge(target: &mut ProgressData, patch: ProgressData) {
    for (key, value) in patch {
        target.insert(key, value);
    }
}

/// Return `true` if `key` is present and not JSON `null`, `false` or `""`.
///
/// Used by step runners as their completion-marker check.
pub fn has_marker(data: &ProgressData, key: &str) -> bool {
    match data.get(key) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Read a non-empty string value.
pub fn get_str<'a>(data: &'a ProgressData, key: &str) -> Option<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Read an integer value, accepting numeric strings written by older rows.
pub fn get_i64(data: &ProgressData, key: &str) -> Option<i64> {
    match data.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Build a patch from `(key, value)` pairs.
pub fn patch<I, V>(entries: I) -> ProgressData
where
    I: IntoIterator<Item = (&'static str, V)>,
    V: Into<Value>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn data(value: Value) -> ProgressData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn merge_keeps_untouched_keys() {
        let mut target = data(json!({"database_name": "tenant_acme", "session_token": "s1"}));
        merge(&mut target, data(json!({"remote_tenant_id": 42})));

        assert_eq!(target["database_name"], "tenant_acme");
        assert_eq!(target["session_token"], "s1");
        assert_eq!(target["remote_tenant_id"], 42);
    }

    #[test]
    fn merge_overwrites_keys_set_by_the_patch() {
        let mut target = data(json!({"session_token": "old"}));
        merge(&mut target, data(json!({"session_token": "new"})));
        assert_eq!(target["session_token"], "new");
    }

    #[test]
    fn merge_is_shallow() {
        let mut target = data(json!({"meta": {"a": 1, "b": 2}}));
        merge(&mut target, data(json!({"meta": {"a": 3}})));
        assert_eq!(target["meta"], json!({"a": 3}));
    }

    #[test]
    fn step_owned_keys_ignores_caller_keys() {
        let seed = data(json!({"admin_password": "x", "referrer": "partner", "database_name": "db"}));
        let mut owned = step_owned_keys(&seed);
        owned.sort_unstable();
        assert_eq!(owned, vec!["admin_password", "database_name"]);
        assert!(step_owned_keys(&data(json!({"referrer": "partner"}))).is_empty());
    }

    #[test]
    fn has_marker_rejects_empty_values() {
        let d = data(json!({
            "a": null,
            "b": false,
            "c": "",
            "d": "x",
            "e": true,
            "f": 0
        }));
        assert!(!has_marker(&d, "a"));
        assert!(!has_marker(&d, "b"));
        assert!(!has_marker(&d, "c"));
        assert!(has_marker(&d, "d"));
        assert!(has_marker(&d, "e"));
        assert!(has_marker(&d, "f"));
        assert!(!has_marker(&d, "missing"));
    }

    #[test]
    fn get_i64_accepts_numeric_strings() {
        let d = data(json!({"n": 7, "s": "8", "bad": "x"}));
        assert_eq!(get_i64(&d, "n"), Some(7));
        assert_eq!(get_i64(&d, "s"), Some(8));
        assert_eq!(get_i64(&d, "bad"), None);
    }

    #[test]
    fn redacted_hides_credentials_only() {
        let d = data(json!({
            "admin_password": "hunter2",
            "api_key": "k-123",
            "session_token": "s1",
            "database_name": "tenant_acme"
        }));
        let out = redacted(&d);
        assert_eq!(out["admin_password"], "[REDACTED]");
        assert_eq!(out["api_key"], "[REDACTED]");
        assert_eq!(out["session_token"], "[REDACTED]");
        assert_eq!(out["database_name"], "tenant_acme");
    }

    #[test]
    fn patch_builds_a_map() {
        let p = patch([(keys::DATABASE_NAME, "tenant_acme")]);
        assert_eq!(get_str(&p, keys::DATABASE_NAME), Some("tenant_acme"));
    }
}
