//! Frame logging with credential masking.
//!
//! Every service logs frame traffic at debug level. Bodies pass through
//! [`sanitize`] first so passwords and match tokens never reach a log sink,
//! and oversized bodies (board snapshots) are truncated.

use log::debug;

const BODY_LOG_LIMIT: usize = 240;

/// Masks secret-bearing fields in a frame body and truncates long bodies.
///
/// Masked: the values of `pass=`, `password=`, `token=`, `auth=` and
/// `secret=` arguments, and the positional credentials of `REGISTER` and
/// `LOGIN` commands.
pub fn sanitize(body: &str) -> String {
    let mut sanitized: String = body
        .split(' ')
        .map(mask_kv_token)
        .collect::<Vec<_>>()
        .join(" ");

    for command in ["REGISTER", "LOGIN"] {
        if let Some(rest) = sanitized.strip_prefix(command) {
            if let Some(user) = rest.strip_prefix(' ').and_then(|r| r.split_whitespace().next()) {
                sanitized = format!("{} {} ***", command, user);
            }
            break;
        }
    }

    if sanitized.len() > BODY_LOG_LIMIT {
        let head: String = sanitized.chars().take(BODY_LOG_LIMIT - 20).collect();
        sanitized = format!("{}...<{} bytes>", head, body.len());
    }
    sanitized
}

fn mask_kv_token(token: &str) -> String {
    const SECRET_KEYS: [&str; 5] = ["pass", "password", "token", "auth", "secret"];
    if let Some((key, _)) = token.split_once('=') {
        if SECRET_KEYS.contains(&key) {
            return format!("{}=***", key);
        }
    }
    token.to_string()
}

/// Logs one frame of traffic. `direction` is `"TX"` or `"RX"`.
pub fn log_comm(module: &str, direction: &str, peer: &str, body: &str) {
    debug!("[{}] COMM {} peer={} body={}", module, direction, peer, sanitize(body));
}
