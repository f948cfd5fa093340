//! Tool-call identifier normalization.
//!
//! Anthropic requires `tool_use.id` to match `^[A-Za-z0-9_-]+$`, while upstream
//! chat-completion providers hand out ids such as `call:1` or `toolu.abc/2`.
//! Every id that crosses the protocol boundary goes through [`sanitize_id`].

use rand::Rng;

const FALLBACK_PREFIX: &str = "id_";
const FALLBACK_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn is_valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Returns true when `id` matches `^[A-Za-z0-9_-]+$`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(is_valid_char)
}

/// Map an arbitrary id onto the Anthropic id grammar.
///
/// Valid ids are returned untouched. Otherwise every offending character is
/// replaced with `_`; the mapping is character-by-character so a `tool_use`
/// id and the `tool_use_id` of its result always sanitize to the same value.
/// An id with no usable characters at all gets a random `id_xxxxxxxxx`.
pub fn sanitize_id(id: &str) -> String {
    if is_valid_id(id) {
        return id.to_string();
    }

    let sanitized: String = id
        .chars()
        .map(|c| if is_valid_char(c) { c } else { '_' })
        .collect();

    if sanitized.chars().all(|c| c == '_') {
        let fallback = random_id();
        tracing::debug!(original = %id, fallback = %fallback, "Tool id had no valid characters");
        return fallback;
    }

    sanitized
}

fn random_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..FALLBACK_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}{}", FALLBACK_PREFIX, suffix)
}
