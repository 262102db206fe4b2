//! Public tool naming rule (spec.md §4.2).
//!
//! Proxied tools are exposed as `<server>_<tool>`; builtin tools are exposed
//! unprefixed. The separator is `_`, resolved as an Open Question in
//! spec.md §9 in favor of the literal test values in spec.md §8.

pub const SEPARATOR: char = '_';

/// A server name must not contain the separator, or the prefix rule stops
/// being reversible (we couldn't tell where the server name ends and the
/// original tool name begins).
pub fn validate_server_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("server name must not be empty".to_string());
    }
    if name.contains(SEPARATOR) {
        return Err(format!(
            "server name `{name}` must not contain `{SEPARATOR}` (reserved as the tool-name separator)"
        ));
    }
    Ok(())
}

/// Build the public name for a tool proxied through `server`.
pub fn public_name(server: &str, original: &str) -> String {
    format!("{server}{SEPARATOR}{original}")
}

/// Reverse the naming rule given the set of known (proxied) server names.
/// Builtin tools are looked up directly by their unprefixed name by the
/// caller and never go through this function.
///
/// Picks the longest known server name that is a prefix of `public`, so a
/// server named `gh` and a tool `list_repos` round-trips even though
/// `list_repos` itself contains `_`.
///
/// `validate_server_name` is only enforced at the persistence boundary
/// (`Store::upsert_server`); a `ServerDefinition` built directly and handed
/// to `UpstreamManager` (`register_server`/`build_client`/`load`) skips it.
/// Given two such unvalidated names where one is `other_name` prefixed by
/// `shorter` + the separator (i.e. `shorter` itself contains the
/// separator), both could match the same public name and the longest match
/// is the only way to prefer the more specific server. The longest-match
/// branch is therefore unreachable for names that went through
/// `validate_server_name`, but stays load-bearing against callers that
/// construct definitions outside the store.
pub fn split_public_name<'a>(
    public: &'a str,
    known_servers: impl IntoIterator<Item = &'a str>,
) -> Option<(&'a str, &'a str)> {
    let mut best: Option<(&str, &str)> = None;
    for server in known_servers {
        let prefix = format!("{server}{SEPARATOR}");
        if let Some(rest) = public.strip_prefix(&prefix) {
            if best.map(|(s, _)| s.len()).unwrap_or(0) < server.len() {
                best = Some((server, rest));
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_separator_in_server_name() {
        assert!(validate_server_name("gh_hub").is_err());
        assert!(validate_server_name("gh").is_ok());
    }

    #[test]
    fn builds_and_splits_public_name() {
        let name = public_name("gh", "list_repos");
        assert_eq!(name, "gh_list_repos");
        let (server, original) = split_public_name(&name, ["gh", "weather"]).unwrap();
        assert_eq!(server, "gh");
        assert_eq!(original, "list_repos");
    }

    #[test]
    fn prefers_longest_matching_server_name() {
        // `gh_enterprise` could not itself pass `validate_server_name` (it
        // contains the separator), so this exercises a `ServerDefinition`
        // built directly and registered with the manager without going
        // through `Store::upsert_server` — the one path where two known
        // server names can still collide on the same public prefix. Under
        // validated names this branch can't be exercised: a validated name
        // never contains the separator, so a shorter validated name's
        // prefix (`"gh_"`) can never also prefix a longer validated name's
        // prefix (it would require the longer name to start with
        // `"gh_"`, i.e. to contain the separator itself).
        let name = public_name("gh_enterprise", "list_repos");
        let (server, original) = split_public_name(&name, ["gh", "gh_enterprise"]).unwrap();
        assert_eq!(server, "gh_enterprise");
        assert_eq!(original, "list_repos");
    }

    #[test]
    fn unknown_server_does_not_split() {
        assert!(split_public_name("weather_get_weather", ["gh"]).is_none());
    }
}
