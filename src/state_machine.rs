use std::collections::HashMap;
use thiserror::Error;

/// A single-command result is never an `Err` once it reaches the log: the
/// sentinel string is itself the state-machine result (§4.3). This type is
/// only used to reject a command *before* it is turned into a log entry at
/// all, e.g. at the HTTP gateway.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("command must not be empty")]
    Empty,
}

/// Result returned for any unrecognized or under-argumented command. Applying
/// it is still a deterministic state transition (a no-op), so it is never an
/// error at the log-application layer.
pub const INVALID_COMMAND: &str = "Invalid command";

/// The deterministic key-value store every replica's log is replayed into.
/// Iteration order is irrelevant per the data model, so a `HashMap` suffices.
#[derive(Debug, Default)]
pub struct KvStore {
    store: HashMap<String, String>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a command string, which may be a `"; "`-separated transaction,
    /// and return the result of the last command executed (stopping at the
    /// first invalid one), per §4.3.
    pub fn apply(&mut self, command: &str) -> String {
        let mut result = String::new();
        for single in command.split("; ") {
            result = self.apply_single(single.trim());
            if result == INVALID_COMMAND {
                break;
            }
        }
        result
    }

    fn apply_single(&mut self, command: &str) -> String {
        let parts: Vec<&str> = command.split_whitespace().collect();
        let Some(&name) = parts.first() else {
            return INVALID_COMMAND.to_string();
        };

        match name {
            "ping" => "PONG".to_string(),
            "get" => match parts.get(1) {
                Some(key) => self.get(key),
                None => INVALID_COMMAND.to_string(),
            },
            "set" => {
                if parts.len() < 3 {
                    return INVALID_COMMAND.to_string();
                }
                self.set(parts[1], parts[2..].join(" "))
            }
            "append" => {
                if parts.len() < 3 {
                    return INVALID_COMMAND.to_string();
                }
                self.append(parts[1], &parts[2..].join(" "))
            }
            "strln" => match parts.get(1) {
                Some(key) => self.strln(key).to_string(),
                None => INVALID_COMMAND.to_string(),
            },
            "del" => match parts.get(1) {
                Some(key) => self.del(key),
                None => INVALID_COMMAND.to_string(),
            },
            _ => INVALID_COMMAND.to_string(),
        }
    }

    fn get(&self, key: &str) -> String {
        self.store.get(key).cloned().unwrap_or_default()
    }

    fn set(&mut self, key: &str, value: String) -> String {
        self.store.insert(key.to_string(), value);
        "OK".to_string()
    }

    fn append(&mut self, key: &str, value: &str) -> String {
        self.store.entry(key.to_string()).or_default().push_str(value);
        "OK".to_string()
    }

    fn strln(&self, key: &str) -> usize {
        self.store.get(key).map(|v| v.len()).unwrap_or(0)
    }

    fn del(&mut self, key: &str) -> String {
        self.store.remove(key).unwrap_or_default()
    }
}

/// Reject obviously-empty commands before they become a log entry at all.
/// Used by the HTTP gateway for its "syntactically rejected" 400 path; the
/// Raft core itself never calls this — an under-argumented command is still
/// a valid, deterministic log entry that resolves to [`INVALID_COMMAND`].
pub fn validate_command(command: &str) -> Result<(), CommandError> {
    if command.trim().is_empty() {
        return Err(CommandError::Empty);
    }
    Ok(())
}

/// The leader intercepts this at the Raft layer rather than forwarding it
/// into the state machine, per §4.3.
pub const REQUEST_LOG_COMMAND: &str = "request_log";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_returns_pong() {
        let mut kv = KvStore::new();
        assert_eq!(kv.apply("ping"), "PONG");
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut kv = KvStore::new();
        assert_eq!(kv.apply("set kunci value"), "OK");
        assert_eq!(kv.apply("get kunci"), "value");
    }

    #[test]
    fn set_value_with_spaces_is_remainder_joined() {
        let mut kv = KvStore::new();
        kv.apply("set key multi word value");
        assert_eq!(kv.apply("get key"), "multi word value");
    }

    #[test]
    fn get_missing_key_is_empty_string() {
        let mut kv = KvStore::new();
        assert_eq!(kv.apply("get nope"), "");
    }

    #[test]
    fn append_to_missing_key_behaves_like_set() {
        let mut kv = KvStore::new();
        assert_eq!(kv.apply("append k 123"), "OK");
        assert_eq!(kv.apply("get k"), "123");
        kv.apply("append k 456");
        assert_eq!(kv.apply("get k"), "123456");
    }

    #[test]
    fn strln_equals_length_of_get() {
        let mut kv = KvStore::new();
        kv.apply("set k hello");
        assert_eq!(kv.apply("strln k"), "5");
        assert_eq!(kv.apply("get k").len(), 5);
    }

    #[test]
    fn del_returns_previous_value_then_empties() {
        let mut kv = KvStore::new();
        kv.apply("set k v");
        assert_eq!(kv.apply("del k"), "v");
        assert_eq!(kv.apply("get k"), "");
        assert_eq!(kv.apply("del k"), "");
    }

    #[test]
    fn unrecognized_command_is_invalid() {
        let mut kv = KvStore::new();
        assert_eq!(kv.apply("frobnicate"), INVALID_COMMAND);
    }

    #[test]
    fn under_argumented_command_is_invalid() {
        let mut kv = KvStore::new();
        assert_eq!(kv.apply("set onlykey"), INVALID_COMMAND);
        assert_eq!(kv.apply("get"), INVALID_COMMAND);
    }

    #[test]
    fn transaction_applies_left_to_right_and_returns_last_result() {
        let mut kv = KvStore::new();
        let result = kv.apply("set kunci value; append kunci 123; get kunci");
        assert_eq!(result, "value123");
    }

    #[test]
    fn transaction_stops_at_first_invalid_command() {
        let mut kv = KvStore::new();
        let result = kv.apply("set k v; frobnicate; set k other");
        assert_eq!(result, INVALID_COMMAND);
        // the third command never ran
        assert_eq!(kv.apply("get k"), "v");
    }

    #[test]
    fn validate_command_rejects_empty() {
        assert_eq!(validate_command(""), Err(CommandError::Empty));
        assert_eq!(validate_command("   "), Err(CommandError::Empty));
        assert!(validate_command("ping").is_ok());
    }
}
